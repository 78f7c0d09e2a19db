use super::cli::Args;
use super::{Config, OverlayMode, PartialConfig, Resources};
use crate::resources::Capacity;
use crate::types::ViewEntry;
use crate::util::{expand_tilde_path, home_dir};
use anyhow::{Context, Result, anyhow};
use chrono::Local;
use log::trace;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

const PROJECT_CONFIG_FILE: &str = ".jobspace.toml";

pub fn resolve_config(cli: Args) -> Result<Config> {
    let cwd = env::current_dir().context("Failed to get current directory")?;
    let (mut partial_config, mut sources) = load_partial(cli.no_config, &cwd)?;

    // Override with environment variables if set
    if let Some(log_level) = env_value("JOBSPACE_LOG_LEVEL") {
        if let Ok(log_level) = log::LevelFilter::from_str(&log_level) {
            partial_config.log_level = Some(log_level);
            sources.insert("log_level".into(), "environment".into());
        } else {
            return Err(anyhow!("Invalid log level: {}", log_level));
        }
    }
    if let Some(storage_dir) = env_value("JOBSPACE_STORAGE_DIR") {
        partial_config.storage_dir = Some(storage_dir);
        sources.insert("storage_dir".into(), "environment".into());
    }
    if let Some(tmp_view) = env_value("JOBSPACE_TMP_VIEW") {
        partial_config.tmp_view = Some(tmp_view);
        sources.insert("tmp_view".into(), "environment".into());
    }
    if let Some(repo_view) = env_value("JOBSPACE_REPO_VIEW") {
        partial_config.repo_view = Some(repo_view);
        sources.insert("repo_view".into(), "environment".into());
    }
    if let Some(overlay) = env_value("JOBSPACE_OVERLAY") {
        partial_config.overlay =
            Some(OverlayMode::from_str(&overlay).map_err(|e| anyhow!(e))?);
        sources.insert("overlay".into(), "environment".into());
    }
    if let Some(ceiling) = env_value("JOBSPACE_TMP_CEILING") {
        partial_config.tmp_ceiling = Some(
            Capacity::from_str(&ceiling)
                .map_err(|e| anyhow!(e))
                .context("Invalid JOBSPACE_TMP_CEILING")?,
        );
        sources.insert("tmp_ceiling".into(), "environment".into());
    }

    // Override with CLI args if provided (highest precedence)
    if let Some(log_level) = cli.log_level {
        partial_config.log_level = Some(log_level);
        sources.insert("log_level".into(), "cli".into());
    }
    if let Some(storage_dir) = cli.storage_dir {
        partial_config.storage_dir = Some(storage_dir);
        sources.insert("storage_dir".into(), "cli".into());
    }
    if let Some(job_name) = cli.job_name {
        partial_config.job_name = Some(job_name);
        sources.insert("job_name".into(), "cli".into());
    }
    if let Some(repo_root) = cli.repo_root {
        partial_config.repo_root = Some(repo_root);
        sources.insert("repo_root".into(), "cli".into());
    }
    if let Some(tmp_view) = cli.tmp_view {
        partial_config.tmp_view = Some(tmp_view);
        sources.insert("tmp_view".into(), "cli".into());
    }
    if let Some(repo_view) = cli.repo_view {
        partial_config.repo_view = Some(repo_view);
        sources.insert("repo_view".into(), "cli".into());
    }
    if let Some(tmp_size) = cli.tmp_size {
        partial_config.resources = Some(Resources { tmp: Some(tmp_size) });
        sources.insert("tmp_size".into(), "cli".into());
    }
    if let Some(tmp_ceiling) = cli.tmp_ceiling {
        partial_config.tmp_ceiling = Some(tmp_ceiling);
        sources.insert("tmp_ceiling".into(), "cli".into());
    }
    if let Some(overlay) = cli.overlay {
        partial_config.overlay = Some(overlay);
        sources.insert("overlay".into(), "cli".into());
    }
    if cli.keep_dirs {
        partial_config.keep_dirs = Some(true);
        sources.insert("keep_dirs".into(), "cli".into());
    }
    if let Some(timeout) = cli.timeout {
        partial_config.timeout = Some(timeout);
        sources.insert("timeout".into(), "cli".into());
    }
    // Views from the CLI are additive
    if let Some(cli_views) = cli.views {
        add_views(&mut partial_config.views, cli_views)?;
        sources.insert("views".into(), "cli".into());
    }

    // If nothing else, fill in with some default values
    let storage_dir = match partial_config.storage_dir {
        Some(storage_dir) => expand_tilde_path(Path::new(&storage_dir))?,
        None => default_storage_dir(),
    };
    let job_name = partial_config.job_name.unwrap_or_else(generate_job_name);
    let job_dir = storage_dir.join(&job_name);
    sources.insert("job_dir".into(), "derived from storage_dir".into());

    let repo_root = match partial_config.repo_root {
        Some(repo_root) => {
            let repo_root = expand_tilde_path(Path::new(&repo_root))?;
            cwd.join(repo_root)
        }
        None => find_repo_root(&cwd),
    };
    let repo_root = repo_root.canonicalize().context(format!(
        "Failed to resolve repository root {}",
        repo_root.display()
    ))?;
    let relative_cwd = cwd
        .strip_prefix(&repo_root)
        .map(Path::to_path_buf)
        .map_err(|_| {
            anyhow!(
                "Current directory {} is not inside the repository root {}",
                cwd.display(),
                repo_root.display()
            )
        })?;
    sources.insert("relative_cwd".into(), "derived from repo_root".into());

    for key in [
        "log_level",
        "storage_dir",
        "job_name",
        "repo_root",
        "overlay",
        "keep_dirs",
    ] {
        if !sources.contains_key(key) {
            sources.insert(key.into(), "default".into());
        }
    }

    let config = Config {
        log_level: partial_config.log_level.unwrap_or(log::LevelFilter::Info),
        storage_dir,
        job_name,
        job_dir,
        repo_root,
        relative_cwd,
        tmp_view: partial_config.tmp_view.map(PathBuf::from),
        repo_view: partial_config.repo_view.map(PathBuf::from),
        views: partial_config.views.unwrap_or_default(),
        tmp_size: partial_config.resources.and_then(|r| r.tmp),
        tmp_ceiling: partial_config.tmp_ceiling,
        overlay: partial_config.overlay.unwrap_or(OverlayMode::Auto),
        keep_dirs: partial_config.keep_dirs.unwrap_or(false),
        timeout: partial_config.timeout,
        sources,
    };

    validate_config(&config)?;

    trace!("Storage dir: {}", config.storage_dir.display());
    trace!("Job: {}", config.job_name);

    Ok(config)
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(format!("/tmp/jobspace-{}", nix::unistd::getuid()))
}

fn generate_job_name() -> String {
    let suffix: String =
        Uuid::new_v4().simple().to_string().chars().take(8).collect();
    format!("job_{}_{}", Local::now().format("%Y-%m-%d_%H-%M-%S"), suffix)
}

/// The directory holding the nearest project config file, or `cwd`.
fn find_repo_root(cwd: &Path) -> PathBuf {
    cwd.ancestors()
        .find(|dir| dir.join(PROJECT_CONFIG_FILE).is_file())
        .unwrap_or(cwd)
        .to_path_buf()
}

pub fn load_partial(
    no_config: bool,
    cwd: &Path,
) -> Result<(PartialConfig, HashMap<String, String>)> {
    let config_paths = if no_config {
        vec![]
    } else {
        config_file_candidates(cwd, home_dir().as_deref())
            .into_iter()
            .filter(|path| {
                path.is_file()
                    && nix::unistd::access(
                        path.as_path(),
                        nix::unistd::AccessFlags::R_OK,
                    )
                    .is_ok()
            })
            .collect()
    };
    let mut sources = HashMap::new();
    if config_paths.is_empty() {
        trace!("No config files found, using default config");
        return Ok((PartialConfig::default(), sources));
    }

    let mut merged_config = PartialConfig::default();
    for path in config_paths.iter() {
        let config_str = std::fs::read_to_string(path).context(format!(
            "Failed to read config file {}",
            path.display()
        ))?;

        let config: PartialConfig = toml::from_str(&config_str).context(
            format!("Failed to parse config file {}", path.display()),
        )?;

        merge_configs(
            &mut merged_config,
            &mut sources,
            config,
            path.to_str()
                .context("Failed to convert config path to str")?,
        )?;
        trace!("Loaded config file: {}", path.display());
    }

    Ok((merged_config, sources))
}

/** Every place a config file may live, lowest precedence first */
fn config_file_candidates(cwd: &Path, home: Option<&Path>) -> Vec<PathBuf> {
    let mut paths_to_check = Vec::new();

    // Any project specific files, nearest first
    for dir in cwd.ancestors() {
        paths_to_check.push(dir.join(PROJECT_CONFIG_FILE));
    }

    // ~/.config/jobspace/config.toml
    if let Some(home) = home {
        paths_to_check.push(home.join(".config/jobspace/config.toml"));
    }

    // /etc/jobspace.toml
    paths_to_check.push(PathBuf::from("/etc/jobspace.toml"));

    // Finally reverse them so we can process them in order nicely
    paths_to_check.reverse();
    paths_to_check
}

fn add_views(
    existing: &mut Option<Vec<ViewEntry>>,
    views: Vec<ViewEntry>,
) -> Result<()> {
    let existing = existing.get_or_insert_with(Vec::new);
    for view in views {
        if existing.iter().any(|v| v.merge_point == view.merge_point) {
            return Err(anyhow!(
                "Merge point {} is defined more than once",
                view.merge_point.display()
            ));
        }
        existing.push(view);
    }
    Ok(())
}

fn merge_configs(
    base: &mut PartialConfig,
    sources: &mut HashMap<String, String>,
    override_config: PartialConfig,
    source: &str,
) -> Result<()> {
    if let Some(log_level) = override_config.log_level {
        base.log_level = Some(log_level);
        sources.insert("log_level".into(), source.into());
    }
    if let Some(storage_dir) = override_config.storage_dir {
        base.storage_dir = Some(storage_dir);
        sources.insert("storage_dir".into(), source.into());
    }
    if let Some(job_name) = override_config.job_name {
        base.job_name = Some(job_name);
        sources.insert("job_name".into(), source.into());
    }
    if let Some(repo_root) = override_config.repo_root {
        base.repo_root = Some(repo_root);
        sources.insert("repo_root".into(), source.into());
    }
    if let Some(tmp_view) = override_config.tmp_view {
        base.tmp_view = Some(tmp_view);
        sources.insert("tmp_view".into(), source.into());
    }
    if let Some(repo_view) = override_config.repo_view {
        base.repo_view = Some(repo_view);
        sources.insert("repo_view".into(), source.into());
    }
    if let Some(overlay) = override_config.overlay {
        base.overlay = Some(overlay);
        sources.insert("overlay".into(), source.into());
    }
    if let Some(tmp_ceiling) = override_config.tmp_ceiling {
        base.tmp_ceiling = Some(tmp_ceiling);
        sources.insert("tmp_ceiling".into(), source.into());
    }
    if let Some(keep_dirs) = override_config.keep_dirs {
        base.keep_dirs = Some(keep_dirs);
        sources.insert("keep_dirs".into(), source.into());
    }
    if let Some(timeout) = override_config.timeout {
        base.timeout = Some(timeout);
        sources.insert("timeout".into(), source.into());
    }
    if let Some(Resources { tmp: Some(tmp) }) = override_config.resources {
        base.resources = Some(Resources { tmp: Some(tmp) });
        sources.insert("tmp_size".into(), source.into());
    }
    // Handle views additively
    if let Some(views) = override_config.views {
        add_views(&mut base.views, views)
            .context(format!("Invalid views in {}", source))?;
        sources.insert("views".into(), source.into());
    }
    Ok(())
}

fn validate_config(config: &Config) -> Result<()> {
    if config.job_name.is_empty()
        || config.job_name.contains('/')
        || config.job_name == "."
        || config.job_name == ".."
    {
        return Err(anyhow!("Invalid job name: {}", config.job_name));
    }
    if config.timeout == Some(0) {
        return Err(anyhow!("Timeout must be at least one second"));
    }

    Ok(())
}
