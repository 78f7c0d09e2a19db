use crate::error::SandboxError;
use log::trace;
use nix::mount::{MntFlags, MsFlags};
use std::ffi::OsStr;
use std::io;
use std::path::Path;

pub fn mount<S1, S3, S4>(
    source: Option<S1>,
    target: &Path,
    fstype: Option<S3>,
    flags: MsFlags,
    data: Option<S4>,
) -> Result<(), SandboxError>
where
    S1: AsRef<OsStr>,
    S3: AsRef<OsStr>,
    S4: AsRef<OsStr>,
{
    let source = source.as_ref().map(|s| s.as_ref());
    let fstype = fstype.as_ref().map(|s| s.as_ref());
    let data = data.as_ref().map(|s| s.as_ref());

    trace!(
        "mount {} {} [type={}, flags={}, data={}]",
        source.map(|s| s.to_string_lossy()).unwrap_or_default(),
        target.display(),
        fstype.map(|s| s.to_string_lossy()).unwrap_or_default(),
        flags.bits(),
        data.map(|s| s.to_string_lossy()).unwrap_or_default(),
    );

    let result = nix::mount::mount(source, target, fstype, flags, data);

    if let Err(e) = result {
        let op = match fstype.and_then(|s| s.to_str()) {
            Some("overlay") => "mount overlay on",
            Some("tmpfs") => "mount tmpfs on",
            _ if flags.contains(MsFlags::MS_BIND) => "bind mount onto",
            _ => "mount",
        };

        if e == nix::errno::Errno::EINVAL && op == "mount overlay on" {
            return Err(SandboxError::mount(
                op,
                target,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "overlayfs refused the layers (the kernel limits overlay stacking depth, \
                    and upper must not itself be on an overlay)",
                ),
            ));
        }

        return Err(SandboxError::mount(op, target, e));
    }

    Ok(())
}

/// Lazily detaches whatever is mounted at `target`.
pub fn unmount(target: &Path) -> Result<(), SandboxError> {
    trace!("umount {}", target.display());
    nix::mount::umount2(target, MntFlags::MNT_DETACH)
        .map_err(|e| SandboxError::mount("unmount", target, e))
}

/**
 * Checks a path that will be spliced into overlayfs mount options.
 *
 * This is probably overly restrictive, but it keeps `,` and `:` (option and
 * layer separators) as well as whitespace out of the option string.
 */
pub fn check_path_for_mount_option_compatibility(
    path: &Path,
) -> Result<(), SandboxError> {
    let components = path.components();

    if components.count() == 0 {
        return Err(SandboxError::config(format!(
            "Path {} is empty",
            path.display()
        )));
    }

    path.components().try_for_each(|component| {
        let component_str = match component.as_os_str().to_str() {
            Some(s) => s,
            None => {
                return Err(SandboxError::config(format!(
                    "Path {} contains invalid character",
                    path.display(),
                )));
            }
        };

        if !component_str.chars().all(|c| {
            c.is_alphanumeric()
                || c == '_'
                || c == '-'
                || c == '.'
                || c == '/'
                || c == '@'
                || c == '%'
                || c == '+'
        }) {
            Err(SandboxError::config(format!(
                "Path {} contains invalid character {}",
                path.display(),
                component_str
            )))
        } else {
            Ok(())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_check_path_for_mount_option_compatibility() {
        let path = Path::new("/tmp/test");
        assert!(check_path_for_mount_option_compatibility(path).is_ok());
    }

    #[test]
    fn test_check_path_for_mount_option_no_spaces() {
        let path = Path::new("/tmp/test test");
        assert!(check_path_for_mount_option_compatibility(path).is_err());
    }

    #[test]
    fn test_check_path_for_mount_option_no_separators() {
        for p in ["/tmp/a,b", "/tmp/a:b"] {
            let err =
                check_path_for_mount_option_compatibility(Path::new(p))
                    .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config);
        }
    }

    #[test]
    fn test_check_path_for_mount_option_compatibility_empty() {
        let path = Path::new("");
        assert!(check_path_for_mount_option_compatibility(path).is_err());
    }

    #[test]
    fn test_check_path_for_mount_option_compatibility_non_utf8() {
        let invalid_utf8 = vec![0xFF, 0xFF];
        let os_string = OsString::from_vec(invalid_utf8);
        let path = Path::new(&os_string);

        assert!(check_path_for_mount_option_compatibility(path).is_err());
    }

    #[test]
    fn test_unmount_of_unmounted_dir_is_a_mount_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = unmount(dir.path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Mount);
    }
}
