use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Overlay semantics implemented on plain directories: writes land in
/// `upper`, reads prefer `upper` and fall back to `lower`, and `lower` is
/// never modified.
#[derive(Debug, Clone)]
pub struct MergedView {
    upper: PathBuf,
    lower: PathBuf,
}

impl MergedView {
    pub fn new(upper: impl Into<PathBuf>, lower: impl Into<PathBuf>) -> Self {
        Self {
            upper: upper.into(),
            lower: lower.into(),
        }
    }

    pub fn upper(&self) -> &Path {
        &self.upper
    }

    pub fn lower(&self) -> &Path {
        &self.lower
    }

    /// Physical location currently backing `rel`, if any.
    pub fn resolve(&self, rel: &Path) -> io::Result<Option<PathBuf>> {
        check_relative(rel)?;
        for layer in [&self.upper, &self.lower] {
            let p = layer.join(rel);
            if p.symlink_metadata().is_ok() {
                return Ok(Some(p));
            }
        }
        Ok(None)
    }

    pub fn exists(&self, rel: &Path) -> io::Result<bool> {
        Ok(self.resolve(rel)?.is_some())
    }

    pub fn read(&self, rel: &Path) -> io::Result<Vec<u8>> {
        match self.resolve(rel)? {
            Some(p) => std::fs::read(p),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found in merged view", rel.display()),
            )),
        }
    }

    /// Writes through the merged view. A file only present in `lower` is
    /// copied up by the write: the new content lands in `upper`.
    pub fn write(&self, rel: &Path, data: impl AsRef<[u8]>) -> io::Result<()> {
        check_relative(rel)?;
        let target = self.upper.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, data)
    }

    /// Copies `rel` from `lower` into `upper` unless `upper` already has it.
    pub fn copy_up(&self, rel: &Path) -> io::Result<PathBuf> {
        check_relative(rel)?;
        let target = self.upper.join(rel);
        if target.symlink_metadata().is_ok() {
            return Ok(target);
        }
        let source = self.lower.join(rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        copy_entry(&source, &target)?;
        Ok(target)
    }

    /// Removes `rel` from `upper`. Whatever `lower` holds at that path
    /// becomes visible again.
    pub fn remove(&self, rel: &Path) -> io::Result<()> {
        check_relative(rel)?;
        let target = self.upper.join(rel);
        match target.symlink_metadata() {
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(target),
            Ok(_) => std::fs::remove_file(target),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Relative paths of every entry visible through the view, parents
    /// before children.
    pub fn entries(&self) -> io::Result<BTreeSet<PathBuf>> {
        let mut entries = BTreeSet::new();
        for layer in [&self.lower, &self.upper] {
            if !layer.is_dir() {
                continue;
            }
            for entry in WalkDir::new(layer).min_depth(1).follow_links(false)
            {
                let entry = entry.map_err(io::Error::other)?;
                if let Ok(rel) = entry.path().strip_prefix(layer) {
                    entries.insert(rel.to_path_buf());
                }
            }
        }
        Ok(entries)
    }
}

/// Copies a single file, symlink or (empty) directory, preserving its kind.
fn copy_entry(source: &Path, target: &Path) -> io::Result<()> {
    let meta = source.symlink_metadata()?;
    if meta.file_type().is_symlink() {
        let link = std::fs::read_link(source)?;
        std::os::unix::fs::symlink(link, target)
    } else if meta.is_dir() {
        match std::fs::create_dir(target) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            r => r,
        }?;
        std::fs::set_permissions(target, meta.permissions())
    } else {
        std::fs::copy(source, target).map(|_| ())
    }
}

fn check_relative(rel: &Path) -> io::Result<()> {
    if rel.components().all(|c| matches!(c, Component::Normal(_)))
        && rel.components().next().is_some()
    {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a path inside the view", rel.display()),
        ))
    }
}
