use super::emulated::EmulatedOverlay;
use crate::error::SandboxError;
use crate::resources::Reservation;
use crate::types::{OverlayMount, ResolvedEnvironment};
use crate::util::mkdir;
use log::trace;
use std::path::{Path, PathBuf};

/// What kind of thing sits at an [`ActiveMount`]'s target.
#[derive(Debug)]
pub enum MountKind {
    Bind,
    Tmpfs,
    Overlay,
    /// A merge point emulated by a link to its upper layer.
    Emulated(Box<EmulatedOverlay>),
    /// A symlink standing in for a bind mount.
    Symlink,
}

impl MountKind {
    pub fn name(&self) -> &'static str {
        match self {
            MountKind::Bind => "bind",
            MountKind::Tmpfs => "tmpfs",
            MountKind::Overlay => "overlay",
            MountKind::Emulated(_) => "emulated overlay",
            MountKind::Symlink => "symlink",
        }
    }
}

#[derive(Debug)]
pub struct ActiveMount {
    pub target: PathBuf,
    pub kind: MountKind,
}

/// One side effect of `build`, recorded so it can be undone.
#[derive(Debug)]
pub enum Step {
    /// A directory that did not exist before. `recursive` directories are
    /// private to the job and removed with their content.
    CreatedDir { path: PathBuf, recursive: bool },
    /// A file or symlink that did not exist before.
    CreatedFile(PathBuf),
    Mounted(ActiveMount),
}

/// Ordered record of everything `build` did so far.
#[derive(Debug, Default)]
pub struct Journal {
    steps: Vec<Step>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `path` and its missing parents, recording each created one.
    pub fn mkdir(&mut self, path: &Path) -> Result<(), SandboxError> {
        for dir in mkdir(path)? {
            trace!("Created {}", dir.display());
            self.steps.push(Step::CreatedDir {
                path: dir,
                recursive: false,
            });
        }
        Ok(())
    }

    /// Like [`Journal::mkdir`], but the leaf is removed with its content at
    /// teardown.
    pub fn mkdir_private(&mut self, path: &Path) -> Result<(), SandboxError> {
        let created = mkdir(path)?;
        let n = created.len();
        for (i, dir) in created.into_iter().enumerate() {
            trace!("Created {}", dir.display());
            self.steps.push(Step::CreatedDir {
                path: dir,
                recursive: i + 1 == n,
            });
        }
        Ok(())
    }

    pub fn created_file(&mut self, path: PathBuf) {
        self.steps.push(Step::CreatedFile(path));
    }

    pub fn mounted(&mut self, mount: ActiveMount) {
        self.steps.push(Step::Mounted(mount));
    }

    pub fn mount_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::Mounted(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}

/// The host facility that makes views and overlays real.
///
/// [`KernelPlatform`](super::KernelPlatform) uses mount namespaces and
/// overlayfs, [`EmulatedPlatform`](super::EmulatedPlatform) works on plain
/// directories. Every side effect must be recorded in the journal before the
/// method returns, even when it then fails.
pub trait MountPlatform {
    fn name(&self) -> &'static str;

    /// Rejects environments this platform cannot build. Runs before
    /// anything is created.
    fn validate(&self, _env: &ResolvedEnvironment) -> Result<(), SandboxError> {
        Ok(())
    }

    /// Optionally builds a private root job paths are translated into.
    /// Paths handed to the other methods are then below that root.
    fn prepare_root(
        &mut self,
        _env: &ResolvedEnvironment,
        _job_dir: &Path,
        _journal: &mut Journal,
    ) -> Result<Option<PathBuf>, SandboxError> {
        Ok(None)
    }

    /// Whether the job process is chrooted into the root returned by
    /// [`MountPlatform::prepare_root`], rather than merely staged below it.
    fn chroot_into_root(&self) -> bool {
        false
    }

    /// Makes `target` the job's temp dir, backed by `scratch` or by storage
    /// bounded by `reservation`.
    fn map_tmp(
        &mut self,
        target: &Path,
        scratch: &Path,
        reservation: &Reservation,
        journal: &mut Journal,
    ) -> Result<(), SandboxError>;

    /// Makes the repository at `repo_root` visible at `target`.
    fn map_repo(
        &mut self,
        target: &Path,
        repo_root: &Path,
        journal: &mut Journal,
    ) -> Result<(), SandboxError>;

    /// Activates one overlay. Paths in `mount` are host paths.
    fn activate_overlay(
        &mut self,
        mount: &OverlayMount,
        journal: &mut Journal,
    ) -> Result<(), SandboxError>;

    fn deactivate(&mut self, mount: &ActiveMount) -> Result<(), SandboxError>;
}

impl<P: MountPlatform + ?Sized> MountPlatform for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn validate(&self, env: &ResolvedEnvironment) -> Result<(), SandboxError> {
        (**self).validate(env)
    }

    fn prepare_root(
        &mut self,
        env: &ResolvedEnvironment,
        job_dir: &Path,
        journal: &mut Journal,
    ) -> Result<Option<PathBuf>, SandboxError> {
        (**self).prepare_root(env, job_dir, journal)
    }

    fn chroot_into_root(&self) -> bool {
        (**self).chroot_into_root()
    }

    fn map_tmp(
        &mut self,
        target: &Path,
        scratch: &Path,
        reservation: &Reservation,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        (**self).map_tmp(target, scratch, reservation, journal)
    }

    fn map_repo(
        &mut self,
        target: &Path,
        repo_root: &Path,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        (**self).map_repo(target, repo_root, journal)
    }

    fn activate_overlay(
        &mut self,
        mount: &OverlayMount,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        (**self).activate_overlay(mount, journal)
    }

    fn deactivate(&mut self, mount: &ActiveMount) -> Result<(), SandboxError> {
        (**self).deactivate(mount)
    }
}
