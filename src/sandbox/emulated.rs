use super::platform::{ActiveMount, Journal, MountKind, MountPlatform};
use crate::error::SandboxError;
use crate::overlay::MergedView;
use crate::resources::Reservation;
use crate::types::{OverlayMount, ResolvedEnvironment};
use log::{debug, trace, warn};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Runs jobs without mount privileges.
///
/// A merge point becomes a symlink to its `upper`, so whatever the job writes
/// through it lands in `upper` right away. Entries only `lower` has are
/// copied into `upper` on activation and the unmodified copies are removed
/// again on deactivation; `lower` is never written. A merge point nested in
/// another one shadows the outer content at that path until it is
/// deactivated. Temp views are plain directories and repository views are
/// symlinks.
#[derive(Debug, Default)]
pub struct EmulatedPlatform {
    staging_root: Option<PathBuf>,
    active: Vec<ActiveOverlay>,
    shadowed: usize,
}

#[derive(Debug)]
struct ActiveOverlay {
    merge_point: PathBuf,
    upper: PathBuf,
}

impl EmulatedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lays job paths out below `root` instead of `/`. The job is not
    /// chrooted, it sees the staged paths.
    pub fn staged_under(root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Upper layer backing the innermost active merge point `path` lies in.
    fn enclosing_upper(&self, path: &Path) -> Option<PathBuf> {
        self.active
            .iter()
            .filter(|a| {
                path != a.merge_point && path.starts_with(&a.merge_point)
            })
            .max_by_key(|a| a.merge_point.components().count())
            .map(|a| a.upper.clone())
    }

    /* Clears the way for the merge point link. Content of an enclosing
     * overlay is moved next to that overlay's upper and put back on
     * deactivation; anything else in the way is an error. */
    fn displace(
        &mut self,
        merge_point: &Path,
        journal: &mut Journal,
    ) -> Result<Displaced, SandboxError> {
        let fail = |e: io::Error| {
            SandboxError::mount("emulate overlay on", merge_point, e)
        };
        let meta = match merge_point.symlink_metadata() {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Displaced::Nothing);
            }
            Err(e) => return Err(fail(e)),
        };

        if let Some(outer_upper) = self.enclosing_upper(merge_point) {
            let shadows = with_suffix(&outer_upper, ".shadowed");
            journal.mkdir(&shadows)?;
            self.shadowed += 1;
            let stash = shadows.join(self.shadowed.to_string());
            std::fs::rename(merge_point, &stash).map_err(fail)?;
            debug!(
                "Shadowing {} while the nested overlay is active",
                merge_point.display()
            );
            return Ok(Displaced::Stashed(stash));
        }

        if meta.is_dir() && is_empty_dir(merge_point).map_err(fail)? {
            std::fs::remove_dir(merge_point).map_err(fail)?;
            return Ok(Displaced::EmptyDir);
        }
        Err(fail(io::Error::new(
            io::ErrorKind::DirectoryNotEmpty,
            "merge point is not empty",
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    ino: u64,
    len: u64,
    mtime: i64,
    mtime_nsec: i64,
}

impl Fingerprint {
    fn of(path: &Path) -> io::Result<Self> {
        let meta = path.symlink_metadata()?;
        Ok(Self {
            ino: meta.ino(),
            len: meta.len(),
            mtime: meta.mtime(),
            mtime_nsec: meta.mtime_nsec(),
        })
    }
}

/// An entry of `lower` copied into `upper` on activation. Directories have
/// no fingerprint.
#[derive(Debug)]
struct Filled {
    rel: PathBuf,
    fingerprint: Option<Fingerprint>,
}

/// What stood at the merge point before the link replaced it.
#[derive(Debug)]
enum Displaced {
    Nothing,
    EmptyDir,
    Stashed(PathBuf),
}

/// State of one emulated merge point.
#[derive(Debug)]
pub struct EmulatedOverlay {
    view: MergedView,
    filled: Vec<Filled>,
    displaced: Displaced,
}

impl EmulatedOverlay {
    fn new(view: MergedView) -> Self {
        Self {
            view,
            filled: Vec::new(),
            displaced: Displaced::Nothing,
        }
    }

    /// Copies every `lower` entry `upper` does not have into `upper`.
    /// Subtrees of `lower` that `upper` replaces by a non directory are
    /// skipped.
    fn fill_from_lower(&mut self) -> io::Result<()> {
        let lower = self.view.lower().to_path_buf();
        if !lower.is_dir() {
            return Ok(());
        }
        let mut entries = WalkDir::new(&lower)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();
        while let Some(entry) = entries.next() {
            let entry = entry.map_err(io::Error::other)?;
            let rel = relative(&lower, entry.path())?;
            let is_dir = entry.file_type().is_dir();
            match self.view.upper().join(&rel).symlink_metadata() {
                Ok(meta) => {
                    if is_dir && !meta.is_dir() {
                        entries.skip_current_dir();
                    }
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                Err(e) => return Err(e),
            }
            let target = self.view.copy_up(&rel)?;
            let fingerprint = if is_dir {
                None
            } else {
                Some(Fingerprint::of(&target)?)
            };
            trace!("Filled {} from lower", rel.display());
            self.filled.push(Filled { rel, fingerprint });
        }
        Ok(())
    }

    /// Removes filled entries the job left untouched, children first.
    /// Filled directories are kept when the job put something in them.
    fn prune(&self) -> io::Result<()> {
        for filled in self.filled.iter().rev() {
            let target = self.view.upper().join(&filled.rel);
            let result = match filled.fingerprint {
                Some(before) => match Fingerprint::of(&target) {
                    Ok(now) if now == before => std::fs::remove_file(&target),
                    Ok(_) => {
                        trace!("Keeping modified {}", filled.rel.display());
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
                None => std::fs::remove_dir(&target),
            };
            match result {
                Ok(()) => (),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound
                            | io::ErrorKind::DirectoryNotEmpty
                            | io::ErrorKind::NotADirectory
                    ) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn restore(&self, merge_point: &Path) -> io::Result<()> {
        match &self.displaced {
            Displaced::Nothing => Ok(()),
            Displaced::EmptyDir => std::fs::create_dir(merge_point),
            Displaced::Stashed(stash) => std::fs::rename(stash, merge_point),
        }
    }

    fn deactivate(&self, merge_point: &Path) -> io::Result<()> {
        match std::fs::remove_file(merge_point) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
            _ => (),
        }
        self.restore(merge_point)?;
        self.prune()
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.to_path_buf().into_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn relative(root: &Path, path: &Path) -> io::Result<PathBuf> {
    path.strip_prefix(root)
        .map(Path::to_path_buf)
        .map_err(io::Error::other)
}

fn is_empty_dir(path: &Path) -> io::Result<bool> {
    Ok(std::fs::read_dir(path)?.next().is_none())
}

impl MountPlatform for EmulatedPlatform {
    fn name(&self) -> &'static str {
        "emulated"
    }

    fn prepare_root(
        &mut self,
        _env: &ResolvedEnvironment,
        _job_dir: &Path,
        journal: &mut Journal,
    ) -> Result<Option<PathBuf>, SandboxError> {
        match &self.staging_root {
            Some(root) => {
                journal.mkdir(root)?;
                Ok(Some(root.clone()))
            }
            None => Ok(None),
        }
    }

    fn map_tmp(
        &mut self,
        target: &Path,
        _scratch: &Path,
        reservation: &Reservation,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        if reservation.is_bounded() {
            warn!(
                "Temp storage of {} is accounted but not enforced at {} without kernel mounts",
                reservation.granted(),
                target.display()
            );
        }
        // everything the job leaves there is scratch
        journal.mkdir_private(target)
    }

    fn map_repo(
        &mut self,
        target: &Path,
        repo_root: &Path,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        if target.symlink_metadata().is_ok() {
            let points_at_repo = match (
                target.canonicalize(),
                repo_root.canonicalize(),
            ) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            };
            if points_at_repo {
                debug!("{} already leads to the repository", target.display());
                return Ok(());
            }
            return Err(SandboxError::mount(
                "map repository onto",
                target,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "path exists and cannot be remapped without kernel mounts",
                ),
            ));
        }
        std::os::unix::fs::symlink(repo_root, target).map_err(|e| {
            SandboxError::mount("map repository onto", target, e)
        })?;
        journal.mounted(ActiveMount {
            target: target.to_path_buf(),
            kind: MountKind::Symlink,
        });
        Ok(())
    }

    fn activate_overlay(
        &mut self,
        mount: &OverlayMount,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        let fail = |e: io::Error| {
            SandboxError::mount("emulate overlay on", &mount.merge_point, e)
        };
        journal.mkdir(&mount.upper)?;
        journal.mkdir(&mount.lower)?;
        if let Some(parent) = mount.merge_point.parent() {
            journal.mkdir(parent)?;
        }

        let mut overlay =
            EmulatedOverlay::new(MergedView::new(&mount.upper, &mount.lower));
        if let Err(e) = overlay.fill_from_lower() {
            let _ = overlay.prune();
            return Err(fail(e));
        }

        overlay.displaced = match self.displace(&mount.merge_point, journal) {
            Ok(displaced) => displaced,
            Err(e) => {
                let _ = overlay.prune();
                return Err(e);
            }
        };

        if let Err(e) =
            std::os::unix::fs::symlink(&mount.upper, &mount.merge_point)
        {
            let _ = overlay.restore(&mount.merge_point);
            let _ = overlay.prune();
            return Err(fail(e));
        }

        self.active.push(ActiveOverlay {
            merge_point: mount.merge_point.clone(),
            upper: mount.upper.clone(),
        });
        journal.mounted(ActiveMount {
            target: mount.merge_point.clone(),
            kind: MountKind::Emulated(Box::new(overlay)),
        });
        Ok(())
    }

    fn deactivate(&mut self, mount: &ActiveMount) -> Result<(), SandboxError> {
        match &mount.kind {
            MountKind::Emulated(overlay) => {
                self.active.retain(|a| a.merge_point != mount.target);
                overlay.deactivate(&mount.target).map_err(|e| {
                    SandboxError::mount("deactivate overlay", &mount.target, e)
                })
            }
            MountKind::Symlink => std::fs::remove_file(&mount.target)
                .map_err(|e| SandboxError::mount("unmap", &mount.target, e)),
            kind => Err(SandboxError::mount(
                "unmount",
                &mount.target,
                io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("{} mounts are not emulated", kind.name()),
                ),
            )),
        }
    }
}
