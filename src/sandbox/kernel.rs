use super::platform::{ActiveMount, Journal, MountKind, MountPlatform};
use crate::error::SandboxError;
use crate::resources::Reservation;
use crate::types::{OverlayMount, ResolvedEnvironment};
use crate::util::{
    check_path_for_mount_option_compatibility, mount, unmount,
};
use log::{debug, trace};
use nix::mount::MsFlags;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Mount namespace + overlayfs implementation.
///
/// Expects the process to already live in its own user and mount namespace
/// (see [`enter_user_namespace`](super::enter_user_namespace)), so that every
/// mount made here is invisible to the host and disappears with the process.
#[derive(Debug)]
pub struct KernelPlatform {
    /// Directory whose entries populate the private root, `/` outside tests.
    host_root: PathBuf,
}

impl KernelPlatform {
    pub fn new() -> Self {
        Self {
            host_root: PathBuf::from("/"),
        }
    }
}

impl Default for KernelPlatform {
    fn default() -> Self {
        Self::new()
    }
}

fn top_level(path: &Path) -> Option<&std::ffi::OsStr> {
    match path.components().nth(1) {
        Some(Component::Normal(name)) => Some(name),
        _ => None,
    }
}

/// How a top level host entry is carried into the private root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootEntry {
    /// Recreated with the same link text.
    Link,
    /// Bind mounted onto a created directory.
    Dir,
    /// Bind mounted onto a created empty file.
    File,
}

impl RootEntry {
    fn of(meta: &std::fs::Metadata) -> Option<Self> {
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            Some(RootEntry::Link)
        } else if file_type.is_dir() {
            Some(RootEntry::Dir)
        } else if file_type.is_file() {
            Some(RootEntry::File)
        } else {
            None
        }
    }
}

fn bind(
    source: &Path,
    target: &Path,
    journal: &mut Journal,
) -> Result<(), SandboxError> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )?;
    journal.mounted(ActiveMount {
        target: target.to_path_buf(),
        kind: MountKind::Bind,
    });
    Ok(())
}

impl MountPlatform for KernelPlatform {
    fn name(&self) -> &'static str {
        "kernel"
    }

    fn validate(&self, env: &ResolvedEnvironment) -> Result<(), SandboxError> {
        if let Some(tmp_view) = &env.tmp_view {
            if env.repo_view.is_none()
                && env.physical_repo_root.starts_with(tmp_view)
            {
                return Err(SandboxError::config(format!(
                    "tmp_view {} would hide the repository at {}",
                    tmp_view.display(),
                    env.physical_repo_root.display()
                )));
            }
        }
        Ok(())
    }

    /* Builds <job_dir>/root out of the host's top level entries. Entries
     * that a view replaces are left out, the view mapping creates them. */
    fn prepare_root(
        &mut self,
        env: &ResolvedEnvironment,
        job_dir: &Path,
        journal: &mut Journal,
    ) -> Result<Option<PathBuf>, SandboxError> {
        if env.tmp_view.is_none() && env.repo_view.is_none() {
            return Ok(None);
        }

        let root = job_dir.join("root");
        journal.mkdir(&root)?;

        let replaced: Vec<_> = [&env.tmp_view, &env.repo_view]
            .into_iter()
            .flatten()
            .filter_map(|v| top_level(v))
            .collect();

        let entries = std::fs::read_dir(&self.host_root).map_err(|e| {
            SandboxError::io(
                format!("Failed to read {}", self.host_root.display()),
                e,
            )
        })?;
        let mut names: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|e| e.file_name())
            .collect();
        names.sort();

        for name in names {
            if replaced.iter().any(|r| *r == name.as_os_str()) {
                continue;
            }
            let source = self.host_root.join(&name);
            let target = root.join(&name);
            let meta = match source.symlink_metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    debug!("Skipping {}: {}", source.display(), e);
                    continue;
                }
            };
            match RootEntry::of(&meta) {
                Some(RootEntry::Link) => {
                    let link = std::fs::read_link(&source).map_err(|e| {
                        SandboxError::io(
                            format!("Failed to read link {}", source.display()),
                            e,
                        )
                    })?;
                    std::os::unix::fs::symlink(&link, &target).map_err(
                        |e| {
                            SandboxError::io(
                                format!(
                                    "Failed to create link {}",
                                    target.display()
                                ),
                                e,
                            )
                        },
                    )?;
                    journal.created_file(target);
                }
                Some(RootEntry::Dir) => {
                    journal.mkdir(&target)?;
                    bind(&source, &target, journal)?;
                }
                Some(RootEntry::File) => {
                    std::fs::File::create(&target).map_err(|e| {
                        SandboxError::io(
                            format!("Failed to create {}", target.display()),
                            e,
                        )
                    })?;
                    journal.created_file(target.clone());
                    bind(&source, &target, journal)?;
                }
                None => {
                    trace!(
                        "Not mapping {} into private root",
                        source.display()
                    );
                }
            }
        }

        Ok(Some(root))
    }

    fn chroot_into_root(&self) -> bool {
        true
    }

    fn map_tmp(
        &mut self,
        target: &Path,
        scratch: &Path,
        reservation: &Reservation,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        journal.mkdir(target)?;
        if reservation.is_bounded() {
            mount(
                Some("tmpfs"),
                target,
                Some("tmpfs"),
                MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
                Some(format!(
                    "mode=0700,size={}m",
                    reservation.granted().mib_ceil()
                )),
            )?;
            journal.mounted(ActiveMount {
                target: target.to_path_buf(),
                kind: MountKind::Tmpfs,
            });
            Ok(())
        } else if target == scratch {
            Ok(())
        } else {
            bind(scratch, target, journal)
        }
    }

    fn map_repo(
        &mut self,
        target: &Path,
        repo_root: &Path,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        journal.mkdir(target)?;
        bind(repo_root, target, journal)
    }

    fn activate_overlay(
        &mut self,
        overlay: &OverlayMount,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        journal.mkdir(&overlay.upper)?;
        journal.mkdir(&overlay.lower)?;
        journal.mkdir(&overlay.merge_point)?;

        // overlayfs wants its work dir on the same file system as upper
        let mut work = overlay.upper.clone().into_os_string();
        work.push(".work");
        let work = PathBuf::from(work);
        journal.mkdir_private(&work)?;

        for path in [&overlay.upper, &overlay.lower, &work] {
            check_path_for_mount_option_compatibility(path)?;
        }

        mount(
            Some("overlay"),
            &overlay.merge_point,
            Some("overlay"),
            MsFlags::empty(),
            Some(format!(
                "userxattr,upperdir={},lowerdir={},workdir={}",
                overlay.upper.display(),
                overlay.lower.display(),
                work.display()
            )),
        )?;
        journal.mounted(ActiveMount {
            target: overlay.merge_point.clone(),
            kind: MountKind::Overlay,
        });
        Ok(())
    }

    fn deactivate(&mut self, active: &ActiveMount) -> Result<(), SandboxError> {
        match active.kind {
            MountKind::Bind | MountKind::Tmpfs | MountKind::Overlay => {
                unmount(&active.target)
            }
            _ => Err(SandboxError::mount(
                "unmount",
                &active.target,
                io::Error::new(
                    io::ErrorKind::Unsupported,
                    "not a kernel mount",
                ),
            )),
        }
    }
}
