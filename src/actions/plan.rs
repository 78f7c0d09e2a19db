use crate::config::Config;
use crate::outln;
use crate::overlay;
use crate::resolver::resolve;
use crate::resources::Capacity;
use crate::types::{OverlayMount, ResolvedEnvironment};
use crate::util::set_json_output;
use anyhow::{Context, Result};
use log::warn;
use serde_json::Value;

/// What a job will get, worked out from its configuration alone.
#[derive(Debug, Clone)]
pub struct JobLayout {
    pub env: ResolvedEnvironment,
    pub overlays: Vec<OverlayMount>,
    /// Temp storage to reserve. Only requested along with a `tmp_view`.
    pub tmp_resource: Option<Capacity>,
}

/// Validates the job's views. Nothing is created on disk.
pub fn job_layout(config: &Config) -> Result<JobLayout> {
    let spec = config.job_view_spec();
    let env = resolve(
        spec.tmp_view.as_deref(),
        spec.repo_view.as_deref(),
        &config.scratch_dir(),
        &config.repo_root,
        &config.relative_cwd,
    )
    .context("Resolving job views")?;
    let overlays = overlay::plan(&spec.views, &env.effective_root)
        .context("Planning overlays")?;
    let tmp_resource = match (spec.tmp_resource, &spec.tmp_view) {
        (Some(size), None) => {
            warn!("Ignoring temp storage size {} without a tmp_view", size);
            None
        }
        (size, _) => size,
    };
    Ok(JobLayout {
        env,
        overlays,
        tmp_resource,
    })
}

pub fn plan(config: &Config) -> Result<()> {
    let layout = job_layout(config)?;
    let env = &layout.env;

    outln!("TMPDIR={}", env.effective_tmpdir.display());
    outln!("PWD={}", env.effective_cwd.display());
    if let Some(tmp_view) = &env.tmp_view {
        outln!("tmp_view={} (scratch {})", tmp_view.display(), env.physical_scratch_dir.display());
    }
    if let Some(repo_view) = &env.repo_view {
        outln!("repo_view={} (repository {})", repo_view.display(), env.physical_repo_root.display());
    }
    for (i, mount) in layout.overlays.iter().enumerate() {
        outln!("overlay[{}] {}", i, mount);
    }
    if let Some(size) = layout.tmp_resource {
        outln!("reserve {} of temp storage", size);
    }

    set_json_output(
        "environment",
        &serde_json::to_value(env).context("Error serializing environment")?,
    );
    set_json_output(
        "overlays",
        &serde_json::to_value(&layout.overlays)
            .context("Error serializing overlays")?,
    );
    set_json_output(
        "tmp_size",
        &layout
            .tmp_resource
            .map(|s| Value::String(s.to_string()))
            .unwrap_or(Value::Null),
    );
    set_json_output("overlay_mode", &Value::String(config.overlay.to_string()));

    Ok(())
}
