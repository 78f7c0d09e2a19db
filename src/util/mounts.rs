use crate::error::SandboxError;
use std::ffi::CStr;
use std::path::{Path, PathBuf};

/// Mount points at or below `base`, deepest first.
pub fn get_mounts(base: &Path) -> Result<Vec<PathBuf>, SandboxError> {
    let mut mounts = Vec::new();

    let system_mounts =
        unsafe { libc::setmntent(c"/proc/mounts".as_ptr(), c"r".as_ptr()) };

    if system_mounts.is_null() {
        return Err(SandboxError::io(
            "Failed to open /proc/mounts",
            std::io::Error::last_os_error(),
        ));
    }

    loop {
        let mnt = unsafe { libc::getmntent(system_mounts) };
        if mnt.is_null() {
            break;
        }

        let mnt_dir = String::from(unsafe {
            CStr::from_ptr((*mnt).mnt_dir).to_string_lossy()
        });

        if Path::new(&mnt_dir).starts_with(base) {
            mounts.push(PathBuf::from(mnt_dir));
        }
    }

    unsafe { libc::endmntent(system_mounts) };

    mounts.sort_by(|a, b| b.cmp(a));
    mounts.dedup();

    Ok(mounts)
}
