#![deny(
    clippy::get_unwrap,
    clippy::panic,
    clippy::print_stdout,
    clippy::unwrap_used,
    clippy::use_debug
)]

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use jobspace::actions;
use jobspace::config::{cli, resolve_config};
use jobspace::logger::JobspaceLogger;
use jobspace::util::{
    print_json_output, set_json_output, set_should_print_output,
};
use log::Log;
use serde_json::Value;

pub fn main() -> Result<()> {
    let logger = JobspaceLogger::new(log::LevelFilter::Trace)
        .init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;
    let cli: cli::Args = cli::Args::parse();

    if let Some(log_level) = cli.log_level {
        logger.set_level(log_level);
    } else {
        logger.set_level(log::LevelFilter::Info);
    };

    let json = cli.json;
    let action = cli.action.clone();
    let job_command = cli.job_command.clone();
    let config = resolve_config(cli).context("Resolving config")?;

    // Messages emitted while loading the config were held back until the
    // final log level was known.
    logger.set_level(config.log_level);
    logger.print_deferred();

    set_should_print_output(!json);

    if let Some(action) = action {
        let result = match action {
            cli::Action::Config { keys } => actions::config(&config, keys),
            cli::Action::Plan => actions::plan(&config),
        };
        if json {
            match &result {
                Ok(()) => set_json_output(
                    "status",
                    &Value::String("success".to_string()),
                ),
                Err(e) => {
                    set_json_output(
                        "status",
                        &Value::String("error".to_string()),
                    );
                    set_json_output("error", &Value::String(format!("{:#}", e)));
                }
            }
            print_json_output()?;
            if result.is_err() {
                logger.flush();
                std::process::exit(1);
            }
        }
        logger.flush();
        return result;
    }

    //
    // No action: run a job, by default an interactive shell
    //
    let command = match job_command {
        Some(command) => command,
        None => vec![std::env::var("SHELL").unwrap_or("sh".to_string())],
    };

    let code = actions::run(&config, &command)?;
    logger.flush();
    std::process::exit(code);
}
