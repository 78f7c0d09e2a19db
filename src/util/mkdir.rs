use crate::error::SandboxError;
use nix::sys::stat::SFlag;
use std::path::{Path, PathBuf};

/* Makes the directory and any missing parents. Returns the directories that
 * were actually created, outermost first, so the caller can remove exactly
 * those and nothing that existed before. Fails if the path exists but is not
 * a directory.
 */
pub fn mkdir(path: &Path) -> Result<Vec<PathBuf>, SandboxError> {
    if path.exists() {
        let metadata = nix::sys::stat::stat(path)?;
        if metadata.st_mode & SFlag::S_IFMT.bits() != SFlag::S_IFDIR.bits() {
            return Err(SandboxError::io(
                format!(
                    "{} already exists but is not a directory",
                    path.display()
                ),
                std::io::Error::from(std::io::ErrorKind::AlreadyExists),
            ));
        }
        return Ok(vec![]);
    }

    let mut missing: Vec<PathBuf> = path
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .map(Path::to_path_buf)
        .collect();
    missing.reverse();

    let mut created = Vec::with_capacity(missing.len());
    for dir in missing {
        match std::fs::create_dir(&dir) {
            Ok(_) => created.push(dir),
            // lost a race with someone else creating it, which is fine
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => (),
            Err(e) => {
                remove_created(&created);
                return Err(SandboxError::io(
                    format!("Failed to create directory {}", dir.display()),
                    e,
                ));
            }
        }
    }

    Ok(created)
}

/// Best effort removal of directories returned by [`mkdir`], innermost first.
pub fn remove_created(created: &[PathBuf]) {
    for dir in created.iter().rev() {
        let _ = std::fs::remove_dir(dir);
    }
}
