mod fixtures;

use fixtures::*;
use rstest::*;

#[rstest]
fn test_cli(mut workspace: JobWorkspace) {
    assert!(workspace.pass(&["--version"]));
    assert!(workspace.xfail(&["--bad-option"]));

    assert!(workspace.pass(&["--job-name", "test-cli", "config"]));
    assert!(workspace.last_stdout.contains("job_name=test-cli"));
    assert!(workspace.pass(&["--overlay", "emulated", "config", "overlay"]));
    assert_eq!(workspace.last_stdout, "emulated\n");
    assert!(workspace.xfail(&["--overlay", "foobar", "config"]));
    assert!(workspace.xfail(&["config", "no_such_key"]));

    assert!(workspace.pass(&["--tmp-size", "100M", "config", "tmp-size"]));
    assert_eq!(workspace.last_stdout, "100M\n");
    assert!(workspace.xfail(&["--tmp-size", "100Q", "config"]));
}

#[rstest]
fn test_config_defaults(mut workspace: JobWorkspace) {
    assert!(workspace.pass(&["--json", "config"]));
    let json = workspace.json();
    assert_eq!(json["status"], "success");
    assert_eq!(json["repo_root"], workspace.repo.display().to_string());
    assert_eq!(json["relative_cwd"], "");
    assert_eq!(json["overlay"], "auto");
    assert_eq!(json["keep_dirs"], "false");
    assert_eq!(json["tmp_view"], "");
}

#[rstest]
fn test_plan_reports_views(mut workspace: JobWorkspace) {
    assert!(workspace.pass(&[
        "--json",
        "--tmp-view",
        "/new_tmp",
        "--repo-view",
        "/repo",
        "--view",
        "out=out.upper:out.lower",
        "plan",
    ]));
    let json = workspace.json();
    assert_eq!(json["status"], "success");
    assert_eq!(json["environment"]["effective_tmpdir"], "/new_tmp");
    assert_eq!(json["environment"]["effective_cwd"], "/repo");
    assert_eq!(json["overlays"][0]["merge_point"], "/repo/out");
    assert_eq!(json["overlays"][0]["upper"], "/repo/out.upper");
    // planning never touches the disk
    assert!(!workspace.storage_dir.exists());
}

#[rstest]
#[case(&["--tmp-view", "/tmp/deep", "plan"])]
#[case(&["--tmp-view", "/tmp", "--repo-view", "/tmp", "plan"])]
#[case(&["--view", "a=a:a", "plan"])]
fn test_plan_rejects_bad_views(
    mut workspace: JobWorkspace,
    #[case] args: &[&str],
) {
    let mut args = args.to_vec();
    args.insert(0, "--json");
    assert!(workspace.xfail(&args));
    let json = workspace.json();
    assert_eq!(json["status"], "error");
    assert!(json["error"].as_str().unwrap().contains("invalid job views"));
}

#[rstest]
fn test_run_job(mut workspace: JobWorkspace) {
    assert!(workspace.pass(&[
        "--overlay",
        "emulated",
        "--",
        "sh",
        "-c",
        "echo \"$TMPDIR\"; pwd -P",
    ]));
    let lines: Vec<&str> = workspace.last_stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with(&workspace.storage_dir.display().to_string()));
    assert!(lines[0].ends_with("/tmp"));
    assert_eq!(lines[1], workspace.repo.display().to_string());
}

#[rstest]
fn test_run_reports_exit_code(mut workspace: JobWorkspace) {
    assert!(!workspace.run(&["--overlay", "emulated", "--", "sh", "-c", "exit 7"]));
    assert!(workspace.xfail(&[
        "--overlay",
        "emulated",
        "--timeout",
        "1",
        "--",
        "sleep",
        "30",
    ]));
}

#[rstest]
fn test_run_with_overlay(mut workspace: JobWorkspace) {
    std::fs::create_dir(workspace.repo.join("out.lower")).unwrap();
    std::fs::write(workspace.repo.join("out.lower/a"), "from lower\n").unwrap();
    assert!(workspace.pass(&[
        "--overlay",
        "emulated",
        "--view",
        "out=out.upper:out.lower",
        "--",
        "sh",
        "-c",
        "cat out/a && echo written > out/b",
    ]));
    assert_eq!(workspace.last_stdout, "from lower\n");
    assert_eq!(
        std::fs::read_to_string(workspace.repo.join("out.upper/b")).unwrap(),
        "written\n"
    );
    assert!(!workspace.repo.join("out.lower/b").exists());
    assert!(!workspace.repo.join("out.upper/a").exists());
    assert!(!workspace.repo.join("out").exists());
}

#[rstest]
fn test_plan_tmp_size_needs_tmp_view(mut workspace: JobWorkspace) {
    assert!(workspace.pass(&[
        "--json",
        "--tmp-view",
        "/new_tmp",
        "--tmp-size",
        "50M",
        "plan"
    ]));
    assert_eq!(workspace.json()["tmp_size"], "50M");

    assert!(workspace.pass(&["--json", "--tmp-size", "50M", "plan"]));
    assert!(workspace.json()["tmp_size"].is_null());
}
