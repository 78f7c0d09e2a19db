use super::platform::{MountPlatform, Step};
use crate::resources::Reservation;
use crate::types::{OverlayMount, ResolvedEnvironment};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SandboxState {
    Unbuilt,
    Building,
    Active,
    TearingDown,
    Released,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Directory private to the job. Private roots live below it and leftover
    /// mounts are looked for below it at teardown.
    pub job_dir: PathBuf,
    /// Leave directories created by `build` in place at teardown.
    pub keep_dirs: bool,
}

/// A job's constructed environment. Single use: once released it stays
/// released, and dropping an active sandbox tears it down.
pub struct Sandbox<P: MountPlatform> {
    pub(super) platform: P,
    pub(super) env: ResolvedEnvironment,
    pub(super) overlays: Vec<OverlayMount>,
    pub(super) steps: Vec<Step>,
    pub(super) reservation: Reservation,
    pub(super) root: Option<PathBuf>,
    pub(super) chrooted: bool,
    pub(super) options: BuildOptions,
    pub(super) state: SandboxState,
}

impl<P: MountPlatform> Sandbox<P> {
    pub fn state(&self) -> SandboxState {
        self.state
    }

    pub fn environment(&self) -> &ResolvedEnvironment {
        &self.env
    }

    pub fn overlays(&self) -> &[OverlayMount] {
        &self.overlays
    }

    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    pub fn platform_name(&self) -> &'static str {
        self.platform.name()
    }

    pub fn job_dir(&self) -> &Path {
        &self.options.job_dir
    }

    /// The private root job paths live under, if any.
    pub fn private_root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Where a path as seen by the job lives on the host.
    ///
    /// Inside a chroot every path goes through the private root. A staged
    /// root only holds the views, anything else (the physical repository and
    /// scratch dir included) is already a host path.
    pub fn host_path(&self, path: &Path) -> PathBuf {
        match &self.root {
            Some(root) if self.chrooted || self.is_remapped(path) => {
                root.join(path.strip_prefix("/").unwrap_or(path))
            }
            _ => path.to_path_buf(),
        }
    }

    fn is_remapped(&self, path: &Path) -> bool {
        if path.starts_with(&self.env.physical_repo_root)
            || path.starts_with(&self.env.physical_scratch_dir)
        {
            return false;
        }
        [&self.env.tmp_view, &self.env.repo_view]
            .into_iter()
            .flatten()
            .any(|view| path.starts_with(view))
    }

    /// How the job process will name `path`: chrooted jobs see job paths,
    /// staged jobs see host paths.
    pub fn visible_path(&self, path: &Path) -> PathBuf {
        if self.chrooted {
            path.to_path_buf()
        } else {
            self.host_path(path)
        }
    }

    /// Number of mounts (or emulated stand-ins) currently active.
    pub fn mount_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, Step::Mounted(_)))
            .count()
    }
}

impl<P: MountPlatform> Drop for Sandbox<P> {
    fn drop(&mut self) {
        if self.state != SandboxState::Released {
            if let Err(e) = self.teardown() {
                log::warn!("{}", e);
            }
        }
    }
}
