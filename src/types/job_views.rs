use crate::resources::Capacity;
use serde::Serialize;
use std::path::PathBuf;

/// One entry of a job's `views` mapping, as written by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewEntry {
    pub merge_point: PathBuf,
    pub upper: PathBuf,
    pub lower: PathBuf,
}

/// Everything a job asks of its private filesystem view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobViewSpec {
    pub tmp_view: Option<PathBuf>,
    pub repo_view: Option<PathBuf>,
    pub views: Vec<ViewEntry>,
    pub tmp_resource: Option<Capacity>,
}

/// The paths a job observes, derived from its [`JobViewSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedEnvironment {
    pub effective_tmpdir: PathBuf,
    pub effective_cwd: PathBuf,
    /// Repository root as seen by the job, `repo_view` or the physical root.
    pub effective_root: PathBuf,
    /// Where the physical scratch space lives, whether or not it is remapped.
    pub physical_scratch_dir: PathBuf,
    pub physical_repo_root: PathBuf,
    pub tmp_view: Option<PathBuf>,
    pub repo_view: Option<PathBuf>,
}

/// A single overlay activation, with absolute paths as seen by the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverlayMount {
    pub merge_point: PathBuf,
    pub upper: PathBuf,
    pub lower: PathBuf,
}

impl std::fmt::Display for OverlayMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} = {} over {}",
            self.merge_point.display(),
            self.upper.display(),
            self.lower.display()
        )
    }
}
