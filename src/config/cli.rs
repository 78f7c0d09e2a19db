use super::OverlayMode;
use super::impls::parse_view_argument;
use crate::resources::Capacity;
use crate::types::ViewEntry;
use clap::Parser;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None,
    override_usage = "\n    jobspace [OPTIONS] [ACTION] [ACTION_ARGUMENTS...]\n    jobspace [OPTIONS] <JOB_COMMAND ...>")]
pub struct Args {
    /**********************/
    /* Flags and settings */
    /**********************/
    /// Set the log level to one of trace, debug, info, warn, or error.
    /// `-v` is shorthand for enabling verbose (trace) logging.
    #[arg(short = 'v',
        long,
        global = true,
        default_missing_value = "trace",
        num_args = 0..=1,
        require_equals = true,
        value_parser = parse_log_level
    )]
    pub log_level: Option<log::LevelFilter>,

    /// Base storage directory for job directories. Defaults to `/tmp/jobspace-<uid>`
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Name of the job, used for its directory. Defaults to a timestamped name.
    #[arg(long, global = true)]
    pub job_name: Option<String>,

    /// Physical repository root. Defaults to the directory holding the
    /// nearest `.jobspace.toml`, or the current directory.
    #[arg(long, global = true)]
    pub repo_root: Option<String>,

    /// Where the job sees its temp directory, e.g. `/tmp`
    #[arg(long, global = true)]
    pub tmp_view: Option<String>,

    /// Where the job sees the repository root, e.g. `/repo`
    #[arg(long, global = true)]
    pub repo_view: Option<String>,

    /// Overlay a directory: MERGE=UPPER:LOWER. Can be specified multiple
    /// times; overlays are activated in the order given.
    #[arg(
        long = "view",
        global = true,
        value_name = "MERGE=UPPER:LOWER",
        value_parser = parse_view_argument,
        action = clap::ArgAction::Append
    )]
    pub views: Option<Vec<ViewEntry>>,

    /// Size of the job's temp storage, e.g. `100M`. A bare number is in megabytes.
    #[arg(long, global = true, value_parser = parse_capacity)]
    pub tmp_size: Option<Capacity>,

    /// Total temp storage that may be reserved at once. Defaults to the free
    /// space of the storage directory.
    #[arg(long, global = true, value_parser = parse_capacity)]
    pub tmp_ceiling: Option<Capacity>,

    /// How overlays are realized
    #[arg(long, global = true, value_enum)]
    pub overlay: Option<OverlayMode>,

    /// Keep the directories created for the job once it is done.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub keep_dirs: bool,

    /// Kill the job after this many seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Formats action output as a JSON blob. Does nothing for job commands.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub json: bool,

    /// Do not load config files.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub no_config: bool,

    /***************/
    /* Subcommands */
    /***************/
    #[command(subcommand)]
    pub action: Option<Action>,

    /***************/
    /* Job Command */
    /***************/
    /// The command to run in the job's sandbox. If no command is provided,
    /// the current shell will be used.
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 0..,
        value_parser = validate_command,
        help_heading = "Job Command",
    )]
    pub job_command: Option<Vec<String>>,
}

#[derive(clap::Subcommand, Clone, Debug)]
#[command(subcommand_help_heading = "Actions")]
pub enum Action {
    /// Get current configuration options
    Config {
        /// The keys to get from the configuration
        #[arg(value_name = "KEYS", num_args = 0..)]
        keys: Option<Vec<String>>,
    },

    /// Show the environment, overlays and reservation a job would get,
    /// without creating anything
    Plan,
}

static ARG_COUNT: AtomicUsize = AtomicUsize::new(0);

// Because of the way clap works, if someone tries to pass a parameter that doesn't exist, we'll
// see it here as a command. This is a bit of a hack to catch that case.
fn validate_command(s: &str) -> Result<String, String> {
    ARG_COUNT.fetch_add(1, Ordering::Relaxed);
    if ARG_COUNT.load(Ordering::Relaxed) == 1 {
        if s.starts_with('-') && s != "--" {
            Err(String::from("Unknown option"))
        } else {
            Ok(s.to_string())
        }
    } else {
        Ok(s.to_string())
    }
}

fn parse_log_level(s: &str) -> Result<log::LevelFilter, String> {
    s.parse::<log::LevelFilter>().map_err(|e| e.to_string())
}

fn parse_capacity(s: &str) -> Result<Capacity, String> {
    s.parse::<Capacity>()
}
