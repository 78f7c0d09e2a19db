use crate::error::SandboxError;
use crate::resolver::{absolutize, check_canonical, strip_trailing_slash};
use crate::types::{OverlayMount, ViewEntry};
use crate::util::check_path_for_mount_option_compatibility;
use log::trace;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Turns a job's `views` into the ordered list of overlays to activate.
///
/// Relative paths are taken relative to `root`, the repository root as the
/// job sees it. Nothing is mounted or created here, so a rejected plan never
/// leaves anything behind.
pub fn plan(
    views: &[ViewEntry],
    root: &Path,
) -> Result<Vec<OverlayMount>, SandboxError> {
    let mut mounts: Vec<OverlayMount> = Vec::with_capacity(views.len());
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for entry in views {
        check_canonical("merge point", &entry.merge_point)?;
        check_canonical("upper dir", &entry.upper)?;
        check_canonical("lower dir", &entry.lower)?;

        let mount = OverlayMount {
            merge_point: normalize(&entry.merge_point, root),
            upper: normalize(&entry.upper, root),
            lower: normalize(&entry.lower, root),
        };

        if mount.merge_point == Path::new("/") {
            return Err(SandboxError::config("cannot overlay /"));
        }
        if !seen.insert(mount.merge_point.clone()) {
            return Err(SandboxError::config(format!(
                "merge point {} is mapped more than once",
                mount.merge_point.display()
            )));
        }
        if mount.upper == mount.lower {
            return Err(SandboxError::config(format!(
                "upper and lower of {} are both {}",
                mount.merge_point.display(),
                mount.upper.display()
            )));
        }
        for (what, dir) in [("upper", &mount.upper), ("lower", &mount.lower)]
        {
            if *dir == mount.merge_point {
                return Err(SandboxError::config(format!(
                    "{} dir of {} is the merge point itself",
                    what,
                    mount.merge_point.display()
                )));
            }
            check_path_for_mount_option_compatibility(dir)?;
        }

        trace!("Planned overlay {}", mount);
        mounts.push(mount);
    }

    // upper/lower dirs are read and written physically, they must not be
    // hidden by, or hide, any merge point of the plan
    for mount in &mounts {
        for other in &mounts {
            for (what, dir) in
                [("upper", &mount.upper), ("lower", &mount.lower)]
            {
                if dir.starts_with(&other.merge_point) {
                    return Err(SandboxError::config(format!(
                        "{} dir {} of {} lies within merge point {}",
                        what,
                        dir.display(),
                        mount.merge_point.display(),
                        other.merge_point.display()
                    )));
                }
                if other.merge_point.starts_with(dir) {
                    return Err(SandboxError::config(format!(
                        "{} dir {} of {} englobes merge point {}",
                        what,
                        dir.display(),
                        mount.merge_point.display(),
                        other.merge_point.display()
                    )));
                }
            }
        }
    }

    Ok(mounts)
}

fn normalize(path: &Path, root: &Path) -> PathBuf {
    strip_trailing_slash(&absolutize(path, root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn entry(m: &str, u: &str, l: &str) -> ViewEntry {
        ViewEntry {
            merge_point: m.into(),
            upper: u.into(),
            lower: l.into(),
        }
    }

    #[test]
    fn test_plan_keeps_insertion_order() {
        let views = vec![
            entry("/tmp/merged/", "/tmp/upper/", "/tmp/lower/"),
            entry("read_write/", "write/", "read/"),
            entry("/tmp/merged/sub", "/tmp/u2", "/tmp/l2"),
        ];
        let plan = plan(&views, Path::new("/repo")).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].merge_point, Path::new("/tmp/merged"));
        assert_eq!(plan[0].upper, Path::new("/tmp/upper"));
        assert_eq!(plan[0].lower, Path::new("/tmp/lower"));
        assert_eq!(plan[1].merge_point, Path::new("/repo/read_write"));
        assert_eq!(plan[1].upper, Path::new("/repo/write"));
        assert_eq!(plan[1].lower, Path::new("/repo/read"));
        assert_eq!(plan[2].merge_point, Path::new("/tmp/merged/sub"));
    }

    #[test]
    fn test_plan_rejects_duplicate_merge_point() {
        let views = vec![
            entry("/m", "/u1", "/l1"),
            entry("/m/", "/u2", "/l2"),
        ];
        let err = plan(&views, Path::new("/repo")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_plan_rejects_aliased_dirs() {
        for views in [
            vec![entry("/m", "/d", "/d")],
            vec![entry("/m", "/m", "/l")],
            vec![entry("/m", "/u", "/m/")],
            vec![entry("/m", "/m/u", "/l")],
            vec![entry("/m/x", "/m", "/l")],
            vec![entry("/m", "/u", "/l"), entry("/n", "/u2", "/m/l")],
        ] {
            let err = plan(&views, Path::new("/repo")).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config, "{:?}", views);
        }
    }

    #[test]
    fn test_plan_rejects_unmountable_paths() {
        for views in [
            vec![entry("/m", "/u,x", "/l")],
            vec![entry("/m", "/u", "/l:l2")],
            vec![entry("/m", "/u u", "/l")],
            vec![entry("/m", "/u/../v", "/l")],
            vec![entry("/", "/u", "/l")],
        ] {
            assert!(plan(&views, Path::new("/repo")).is_err(), "{:?}", views);
        }
    }

    #[test]
    fn test_plan_empty() {
        assert!(plan(&[], Path::new("/repo")).unwrap().is_empty());
    }
}
