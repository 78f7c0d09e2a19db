use super::impls::{deserialize_level_filter, deserialize_views};
use crate::resources::Capacity;
use crate::types::{JobViewSpec, ViewEntry};
use serde::Deserialize;
use std::{collections::HashMap, path::PathBuf};

/// Which platform makes views and overlays real.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OverlayMode {
    /// Kernel mounts when the host allows them, emulation otherwise
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "kernel")]
    Kernel,
    #[serde(rename = "emulated")]
    Emulated,
}

/// `upper`/`lower` of a `[views."<merge point>"]` table.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ViewLayers {
    pub upper: PathBuf,
    pub lower: PathBuf,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Resources {
    pub tmp: Option<Capacity>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    #[serde(deserialize_with = "deserialize_level_filter", default)]
    pub log_level: Option<log::LevelFilter>,
    pub storage_dir: Option<String>,
    pub job_name: Option<String>,
    pub repo_root: Option<String>,
    pub tmp_view: Option<String>,
    pub repo_view: Option<String>,
    pub overlay: Option<OverlayMode>,
    pub tmp_ceiling: Option<Capacity>,
    pub keep_dirs: Option<bool>,
    pub timeout: Option<u64>,
    pub resources: Option<Resources>,
    #[serde(deserialize_with = "deserialize_views", default)]
    pub views: Option<Vec<ViewEntry>>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: log::LevelFilter,
    pub storage_dir: PathBuf,
    pub job_name: String,
    pub job_dir: PathBuf,
    pub repo_root: PathBuf,
    pub relative_cwd: PathBuf,
    pub tmp_view: Option<PathBuf>,
    pub repo_view: Option<PathBuf>,
    pub views: Vec<ViewEntry>,
    pub tmp_size: Option<Capacity>,
    /// Overrides the free space of the storage dir as reservation ceiling.
    pub tmp_ceiling: Option<Capacity>,
    pub overlay: OverlayMode,
    pub keep_dirs: bool,
    /// Seconds the job command may run before it is killed.
    pub timeout: Option<u64>,
    pub sources: HashMap<String, String>,
}

impl Config {
    pub fn job_view_spec(&self) -> JobViewSpec {
        JobViewSpec {
            tmp_view: self.tmp_view.clone(),
            repo_view: self.repo_view.clone(),
            views: self.views.clone(),
            tmp_resource: self.tmp_size,
        }
    }

    /// The job's private scratch directory on the host.
    pub fn scratch_dir(&self) -> PathBuf {
        self.job_dir.join("tmp")
    }
}
