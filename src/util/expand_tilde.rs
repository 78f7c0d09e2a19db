use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};

/// The invoking user's home directory, from `$HOME`.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

/// Expands a path that starts with ~ to use the user's home directory
pub fn expand_tilde_path(path: &Path) -> Result<PathBuf> {
    expand_tilde_with(path, home_dir().as_deref())
}

fn expand_tilde_with(path: &Path, home: Option<&Path>) -> Result<PathBuf> {
    let Some(path_str) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    if path_str == "~" || path_str.starts_with("~/") {
        let home = home.ok_or_else(|| {
            anyhow!("Cannot expand {}: HOME is not set", path.display())
        })?;
        return Ok(match path_str.strip_prefix("~/") {
            Some(rest) => home.join(rest),
            None => home.to_path_buf(),
        });
    }
    Ok(path.to_path_buf())
}
