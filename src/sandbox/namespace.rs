use crate::error::SandboxError;
use crate::util::mount;
use log::{debug, trace};
use nix::mount::MsFlags;
use nix::sched::{CloneFlags, unshare};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork, getgid, getuid};
use std::path::Path;

fn write_proc(path: &str, content: &str) -> Result<(), SandboxError> {
    trace!("{} <- {}", path, content);
    std::fs::write(path, content)
        .map_err(|e| SandboxError::io(format!("Failed to write {}", path), e))
}

/**
 * Moves the calling process into a new user and mount namespace where it is
 * root, mapped onto its current uid/gid, and makes every mount private so
 * nothing propagates back to the host.
 *
 * Must be called while the process is still single threaded.
 */
pub fn enter_user_namespace() -> Result<(), SandboxError> {
    let uid = getuid();
    let gid = getgid();

    unshare(CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNS).map_err(
        |e| SandboxError::mount("unshare mount namespace for", "/", e),
    )?;

    write_proc("/proc/self/setgroups", "deny")?;
    write_proc("/proc/self/uid_map", &format!("{} {} 1", uid, uid))?;
    write_proc("/proc/self/gid_map", &format!("{} {} 1", gid, gid))?;

    mount(
        None::<&str>,
        Path::new("/"),
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )?;

    debug!("Entered private user and mount namespace as {}:{}", uid, gid);
    Ok(())
}

/**
 * Tells whether this host lets us run jobs on real mounts: a forked child
 * enters a user namespace and tries an overlay mount in a throwaway dir.
 */
pub fn kernel_overlay_supported(probe_dir: &Path) -> bool {
    let layers = ["upper", "lower", "work", "merged"].map(|l| probe_dir.join(l));
    for layer in &layers {
        if std::fs::create_dir_all(layer).is_err() {
            return false;
        }
    }
    let [upper, lower, work, merged] = layers;
    let data = format!(
        "userxattr,upperdir={},lowerdir={},workdir={}",
        upper.display(),
        lower.display(),
        work.display()
    );

    let supported = match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            let ok = enter_user_namespace().is_ok()
                && nix::mount::mount(
                    Some("overlay"),
                    &merged,
                    Some("overlay"),
                    MsFlags::empty(),
                    Some(data.as_str()),
                )
                .is_ok();
            unsafe { libc::_exit(if ok { 0 } else { 1 }) }
        }
        Ok(ForkResult::Parent { child }) => {
            matches!(waitpid(child, None), Ok(WaitStatus::Exited(_, 0)))
        }
        Err(e) => {
            debug!("Could not fork capability probe: {}", e);
            false
        }
    };

    let _ = std::fs::remove_dir_all(probe_dir);
    debug!(
        "Kernel overlay mounts are {}",
        if supported { "available" } else { "unavailable" }
    );
    supported
}
