use crate::error::SandboxError;
use crate::types::ResolvedEnvironment;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

/// Computes the temp dir and working dir a job will observe. Pure: nothing is
/// created or checked on disk.
pub fn resolve(
    tmp_view: Option<&Path>,
    repo_view: Option<&Path>,
    physical_scratch_dir: &Path,
    physical_repo_root: &Path,
    relative_cwd: &Path,
) -> Result<ResolvedEnvironment, SandboxError> {
    if let Some(tmp_view) = tmp_view {
        check_view("tmp_view", tmp_view)?;
    }
    if let Some(repo_view) = repo_view {
        check_view("repo_view", repo_view)?;
    }
    if let (Some(t), Some(r)) = (tmp_view, repo_view) {
        if t.starts_with(r) || r.starts_with(t) {
            return Err(SandboxError::config(format!(
                "tmp_view {} and repo_view {} must not overlap",
                t.display(),
                r.display()
            )));
        }
    }

    if !physical_scratch_dir.is_absolute() {
        return Err(SandboxError::config(format!(
            "scratch dir must be absolute: {}",
            physical_scratch_dir.display()
        )));
    }
    if !physical_repo_root.is_absolute() {
        return Err(SandboxError::config(format!(
            "repository root must be absolute: {}",
            physical_repo_root.display()
        )));
    }
    if relative_cwd.is_absolute()
        || relative_cwd
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(SandboxError::config(format!(
            "working directory must be relative to the repository root and stay inside it: {}",
            relative_cwd.display()
        )));
    }

    let effective_tmpdir = tmp_view
        .map(Path::to_path_buf)
        .unwrap_or_else(|| physical_scratch_dir.to_path_buf());
    let effective_root = repo_view
        .map(Path::to_path_buf)
        .unwrap_or_else(|| physical_repo_root.to_path_buf());
    let effective_cwd = join_relative(&effective_root, relative_cwd);

    Ok(ResolvedEnvironment {
        effective_tmpdir,
        effective_cwd,
        effective_root,
        physical_scratch_dir: physical_scratch_dir.to_path_buf(),
        physical_repo_root: physical_repo_root.to_path_buf(),
        tmp_view: tmp_view.map(Path::to_path_buf),
        repo_view: repo_view.map(Path::to_path_buf),
    })
}

fn check_view(what: &str, view: &Path) -> Result<(), SandboxError> {
    check_canonical(what, view)?;
    if !view.is_absolute() {
        return Err(SandboxError::config(format!(
            "{} must be an absolute path: {}",
            what,
            view.display()
        )));
    }
    match view.components().count() {
        1 => Err(SandboxError::config(format!("{} cannot be /", what))),
        2 => Ok(()),
        _ => Err(SandboxError::config(format!(
            "non top-level {} not yet implemented: {}",
            what,
            view.display()
        ))),
    }
}

/// Rejects paths with `.`, `..` or empty components. `Path::components`
/// silently folds some of these, so the raw bytes are inspected.
pub(crate) fn check_canonical(
    what: &str,
    path: &Path,
) -> Result<(), SandboxError> {
    let bytes = path.as_os_str().as_bytes();
    if bytes.is_empty() {
        return Err(SandboxError::config(format!("{} is empty", what)));
    }
    let trimmed = bytes.strip_prefix(b"/").unwrap_or(bytes);
    let trimmed = trimmed.strip_suffix(b"/").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(());
    }
    for segment in trimmed.split(|b| *b == b'/') {
        if segment.is_empty() || segment == b"." || segment == b".." {
            return Err(SandboxError::config(format!(
                "{} must be canonical: {}",
                what,
                path.display()
            )));
        }
    }
    Ok(())
}

fn join_relative(base: &Path, relative: &Path) -> PathBuf {
    relative
        .components()
        .filter(|c| *c != Component::CurDir)
        .fold(base.to_path_buf(), |acc, c| acc.join(c.as_os_str()))
}

/// Absolute paths are returned unchanged, relative ones are taken relative to
/// `root`.
pub(crate) fn absolutize(path: &Path, root: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        join_relative(root, path)
    }
}

pub(crate) fn strip_trailing_slash(path: &Path) -> PathBuf {
    let bytes = path.as_os_str().as_bytes();
    match bytes.strip_suffix(b"/") {
        Some(stripped) if !stripped.is_empty() => {
            PathBuf::from(OsStr::from_bytes(stripped))
        }
        _ => path.to_path_buf(),
    }
}
