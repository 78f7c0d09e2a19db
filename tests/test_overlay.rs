mod fixtures;

use fixtures::*;
use jobspace::error::{ErrorKind, SandboxError};
use jobspace::overlay;
use jobspace::resources::{Capacity, Reservation, ResourceAccountant};
use jobspace::sandbox::{
    ActiveMount, BuildOptions, EmulatedPlatform, Journal, MountPlatform,
    Sandbox, SandboxState,
};
use jobspace::types::{OverlayMount, ResolvedEnvironment, ViewEntry};
use rstest::*;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Emulated platform whose n-th overlay activation fails after having
/// created the merge point.
struct FailingPlatform {
    inner: EmulatedPlatform,
    fail_on: usize,
    activations: usize,
}

impl MountPlatform for FailingPlatform {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn map_tmp(
        &mut self,
        target: &Path,
        scratch: &Path,
        reservation: &Reservation,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        self.inner.map_tmp(target, scratch, reservation, journal)
    }

    fn map_repo(
        &mut self,
        target: &Path,
        repo_root: &Path,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        self.inner.map_repo(target, repo_root, journal)
    }

    fn activate_overlay(
        &mut self,
        mount: &OverlayMount,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        self.activations += 1;
        if self.activations == self.fail_on {
            journal.mkdir(&mount.merge_point)?;
            return Err(SandboxError::mount(
                "mount overlay on",
                &mount.merge_point,
                std::io::Error::other("injected failure"),
            ));
        }
        self.inner.activate_overlay(mount, journal)
    }

    fn deactivate(&mut self, mount: &ActiveMount) -> Result<(), SandboxError> {
        self.inner.deactivate(mount)
    }
}

fn listing(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .map(|e| e.unwrap().into_path())
        .collect();
    entries.sort();
    entries
}

fn views(base: &Path, n: usize) -> Vec<ViewEntry> {
    (1..=n)
        .map(|i| ViewEntry {
            merge_point: base.join(format!("m{}", i)),
            upper: base.join(format!("u{}", i)),
            lower: base.join(format!("l{}", i)),
        })
        .collect()
}

fn options(workspace: &JobWorkspace) -> BuildOptions {
    BuildOptions {
        job_dir: workspace.job_dir.clone(),
        keep_dirs: false,
    }
}

fn planned(
    workspace: &JobWorkspace,
    n: usize,
) -> (ResolvedEnvironment, Vec<OverlayMount>, PathBuf) {
    let base = workspace.base().canonicalize().unwrap().join("views");
    std::fs::create_dir(&base).unwrap();
    let env = workspace.environment(None, None, ".");
    let overlays =
        overlay::plan(&views(&base, n), &env.effective_root).unwrap();
    (env, overlays, base)
}

#[rstest]
fn test_overlay_round_trip(workspace: JobWorkspace) {
    let (env, overlays, base) = planned(&workspace, 1);
    std::fs::create_dir(base.join("l1")).unwrap();
    std::fs::write(base.join("l1/x"), "lower\n").unwrap();

    let mut sandbox = Sandbox::build(
        EmulatedPlatform::new(),
        options(&workspace),
        env,
        overlays,
        Reservation::none(),
    )
    .unwrap();
    assert_eq!(sandbox.mount_count(), 1);

    let output = sandbox
        .command("sh")
        .arg("-c")
        .arg(r#"cat "$1/x"; printf upper > "$1/x"; cat "$1/x""#)
        .arg("overlay")
        .arg(base.join("m1"))
        .output()
        .unwrap();
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "lower\nupper");
    assert_eq!(std::fs::read_to_string(base.join("m1/x")).unwrap(), "upper");

    sandbox.teardown().unwrap();
    assert_eq!(std::fs::read_to_string(base.join("l1/x")).unwrap(), "lower\n");
    assert_eq!(std::fs::read_to_string(base.join("u1/x")).unwrap(), "upper");
    // the merge point was created for the job and goes away with it
    assert!(!base.join("m1").exists());
}

#[rstest]
fn test_job_sees_its_writes_in_upper(workspace: JobWorkspace) {
    let (env, overlays, base) = planned(&workspace, 1);
    let mut sandbox = Sandbox::build(
        EmulatedPlatform::new(),
        options(&workspace),
        env,
        overlays,
        Reservation::none(),
    )
    .unwrap();

    let output = sandbox
        .command("sh")
        .arg("-c")
        .arg(
            r#"echo lower > "$1/l1/x"; echo upper > "$1/m1/x"; cat "$1/l1/x"; cat "$1/u1/x""#,
        )
        .arg("overlay")
        .arg(&base)
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stderr), "");
    assert_eq!(String::from_utf8_lossy(&output.stdout), "lower\nupper\n");
    assert!(output.status.success());

    sandbox.teardown().unwrap();
    assert_eq!(std::fs::read_to_string(base.join("l1/x")).unwrap(), "lower\n");
    assert_eq!(std::fs::read_to_string(base.join("u1/x")).unwrap(), "upper\n");
    assert!(!base.join("m1").exists());
}

#[rstest]
fn test_nested_merge_points(workspace: JobWorkspace) {
    let base = workspace.base().canonicalize().unwrap().join("views");
    std::fs::create_dir_all(base.join("l/sub")).unwrap();
    std::fs::write(base.join("l/sub/f"), "outer").unwrap();
    std::fs::create_dir(base.join("l2")).unwrap();
    std::fs::write(base.join("l2/g"), "inner").unwrap();
    let nested = vec![
        ViewEntry {
            merge_point: base.join("m"),
            upper: base.join("u"),
            lower: base.join("l"),
        },
        ViewEntry {
            merge_point: base.join("m/sub"),
            upper: base.join("u2"),
            lower: base.join("l2"),
        },
    ];
    let env = workspace.environment(None, None, ".");
    let overlays = overlay::plan(&nested, &env.effective_root).unwrap();
    let before = listing(&base);

    let mut sandbox = Sandbox::build(
        EmulatedPlatform::new(),
        options(&workspace),
        env,
        overlays,
        Reservation::none(),
    )
    .unwrap();
    assert_eq!(sandbox.mount_count(), 2);

    let output = sandbox
        .command("sh")
        .arg("-c")
        .arg(
            r#"cat "$1/m/sub/g"; test -e "$1/m/sub/f" || echo " shadowed"; echo h > "$1/m/sub/h""#,
        )
        .arg("overlay")
        .arg(&base)
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout), "inner shadowed\n");
    assert!(output.status.success());

    sandbox.teardown().unwrap();
    assert_eq!(std::fs::read_to_string(base.join("u2/h")).unwrap(), "h\n");
    assert!(!base.join("m").exists());
    assert!(!base.join("u").exists());
    assert!(!base.join("u.shadowed").exists());
    let mut after = listing(&base);
    after.retain(|p| !p.starts_with(base.join("u2")));
    assert_eq!(after, before);
}

#[rstest]
fn test_rollback_on_second_overlay(workspace: JobWorkspace) {
    let (env, overlays, base) = planned(&workspace, 3);
    for i in 1..=3 {
        std::fs::create_dir(base.join(format!("l{}", i))).unwrap();
        std::fs::write(base.join(format!("l{}/f", i)), "lower").unwrap();
    }
    let before = listing(workspace.base());

    let accountant = ResourceAccountant::new(Capacity::from_str("10M").unwrap());
    let reservation =
        accountant.reserve(Capacity::from_str("4M").unwrap()).unwrap();

    let platform = FailingPlatform {
        inner: EmulatedPlatform::new(),
        fail_on: 2,
        activations: 0,
    };
    let result = Sandbox::build(
        platform,
        options(&workspace),
        env,
        overlays,
        reservation,
    );
    let Err(err) = result else {
        panic!("build should have failed");
    };
    assert_eq!(err.kind(), ErrorKind::Mount);

    assert_eq!(listing(workspace.base()), before);
    assert!(
        jobspace::util::get_mounts(workspace.base())
            .unwrap()
            .is_empty()
    );
    assert_eq!(accountant.reserved(), Capacity::ZERO);
    assert_eq!(accountant.remaining(), accountant.ceiling());
}

#[rstest]
fn test_teardown_is_idempotent(workspace: JobWorkspace) {
    let (env, overlays, _) = planned(&workspace, 2);
    let accountant = ResourceAccountant::new(Capacity::from_str("1G").unwrap());
    let reservation =
        accountant.reserve(Capacity::from_str("100M").unwrap()).unwrap();

    let mut sandbox = Sandbox::build(
        EmulatedPlatform::new(),
        options(&workspace),
        env,
        overlays,
        reservation,
    )
    .unwrap();
    assert_eq!(accountant.reserved(), Capacity::from_str("100M").unwrap());

    sandbox.teardown().unwrap();
    assert_eq!(accountant.reserved(), Capacity::ZERO);
    sandbox.teardown().unwrap();
    assert_eq!(accountant.reserved(), Capacity::ZERO);
    assert_eq!(sandbox.state(), SandboxState::Released);
    assert_eq!(sandbox.mount_count(), 0);
}

#[rstest]
fn test_drop_tears_down(workspace: JobWorkspace) {
    let (env, overlays, base) = planned(&workspace, 1);
    {
        let _sandbox = Sandbox::build(
            EmulatedPlatform::new(),
            options(&workspace),
            env,
            overlays,
            Reservation::none(),
        )
        .unwrap();
        std::fs::write(base.join("m1/kept"), "yes").unwrap();
    }
    assert_eq!(std::fs::read_to_string(base.join("u1/kept")).unwrap(), "yes");
    assert!(!base.join("m1").exists());
    assert!(!workspace.job_dir.exists());
}

#[rstest]
fn test_invalid_views_rejected_before_side_effects(workspace: JobWorkspace) {
    let base = workspace.base().canonicalize().unwrap();
    let bad = vec![ViewEntry {
        merge_point: base.join("m"),
        upper: base.join("m/u"),
        lower: base.join("l"),
    }];
    let err = overlay::plan(&bad, &workspace.repo).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(!base.join("m").exists());
}
