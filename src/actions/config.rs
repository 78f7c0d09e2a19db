#![allow(clippy::option_map_unit_fn)]
use crate::config::Config;
use crate::outln;
use crate::util::set_json_output;
use anyhow::Result;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;

const ALL_KEYS: [&str; 14] = [
    "log_level",
    "storage_dir",
    "job_name",
    "job_dir",
    "repo_root",
    "relative_cwd",
    "tmp_view",
    "repo_view",
    "views",
    "tmp_size",
    "tmp_ceiling",
    "overlay",
    "keep_dirs",
    "timeout",
];

pub fn config(config: &Config, keys: Option<Vec<String>>) -> Result<()> {
    let keys = keys
        .unwrap_or_else(|| ALL_KEYS.map(String::from).to_vec());
    let multi_line = keys.len() > 1;

    for key in keys {
        let key = key.replace('-', "_");
        let value = config_value(config, &key)
            .ok_or_else(|| anyhow::anyhow!("Unknown key: {}", key))?;
        print_config_line(&key, &value, multi_line, &config.sources);
    }

    Ok(())
}

fn optional<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(T::to_string).unwrap_or_default()
}

fn config_value(config: &Config, key: &str) -> Option<String> {
    let value = match key {
        "log_level" => config.log_level.as_str().to_string(),
        "storage_dir" => config.storage_dir.display().to_string(),
        "job_name" => config.job_name.clone(),
        "job_dir" => config.job_dir.display().to_string(),
        "repo_root" => config.repo_root.display().to_string(),
        "relative_cwd" => config.relative_cwd.display().to_string(),
        "tmp_view" => optional(&config.tmp_view.as_ref().map(|p| p.display())),
        "repo_view" => {
            optional(&config.repo_view.as_ref().map(|p| p.display()))
        }
        "views" => config
            .views
            .iter()
            .map(|v| {
                format!(
                    "{}={}:{}",
                    v.merge_point.display(),
                    v.upper.display(),
                    v.lower.display()
                )
            })
            .collect::<Vec<_>>()
            .join(","),
        "tmp_size" => optional(&config.tmp_size),
        "tmp_ceiling" => optional(&config.tmp_ceiling),
        "overlay" => config.overlay.to_string(),
        "keep_dirs" => config.keep_dirs.to_string(),
        "timeout" => optional(&config.timeout),
        _ => return None,
    };
    Some(value)
}

fn print_config_line(
    key: &str,
    value: &str,
    multi_line: bool,
    sources: &HashMap<String, String>,
) {
    sources.get(key).map(|s| {
        debug!("{}={} set from {}", key, value, s);
    });
    set_json_output(key, &Value::String(value.to_string()));

    if multi_line {
        outln!("{}={}", key, value);
    } else {
        outln!("{}", value);
    }
}
