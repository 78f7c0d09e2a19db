use crate::error::SandboxError;
use crate::resources::Capacity;
use std::path::Path;

/// Space available to unprivileged users on the file system holding `path`.
pub fn available_space(path: &Path) -> Result<Capacity, SandboxError> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|e| {
        SandboxError::io(
            format!("Failed to stat file system of {}", path.display()),
            e.into(),
        )
    })?;
    Ok(Capacity::from_bytes(
        (stat.blocks_available() as u64)
            .saturating_mul(stat.fragment_size() as u64),
    ))
}
