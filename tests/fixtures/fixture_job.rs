use jobspace::resolver::resolve;
use jobspace::sandbox::kernel_overlay_supported;
use jobspace::types::ResolvedEnvironment;
use rand::Rng;
use rstest::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub fn rid() -> String {
    let mut rng = rand::rng();
    (0..10)
        .map(|_| rng.sample(rand::distr::Alphanumeric) as char)
        .collect()
}

/// A throwaway repository and storage dir for one test.
pub struct JobWorkspace {
    dir: TempDir,
    pub repo: PathBuf,
    pub storage_dir: PathBuf,
    pub job_dir: PathBuf,
    pub last_stdout: String,
    pub last_stderr: String,
}

impl JobWorkspace {
    pub fn new() -> Self {
        Self::new_in(&std::env::temp_dir())
    }

    /// Like [`JobWorkspace::new`], with everything created below `parent`.
    pub fn new_in(parent: &Path) -> Self {
        std::fs::create_dir_all(parent).unwrap();
        let dir = tempfile::tempdir_in(parent).unwrap();
        let base = dir.path().canonicalize().unwrap();
        let repo = base.join("repo");
        std::fs::create_dir_all(repo.join("sub")).unwrap();
        std::fs::write(repo.join(".jobspace.toml"), "").unwrap();
        let storage_dir = base.join("storage");
        let job_dir = storage_dir.join(format!("job-{}", rid()));
        JobWorkspace {
            dir,
            repo,
            storage_dir,
            job_dir,
            last_stdout: String::new(),
            last_stderr: String::new(),
        }
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.job_dir.join("tmp")
    }

    pub fn environment(
        &self,
        tmp_view: Option<&str>,
        repo_view: Option<&str>,
        relative_cwd: &str,
    ) -> ResolvedEnvironment {
        resolve(
            tmp_view.map(Path::new),
            repo_view.map(Path::new),
            &self.scratch_dir(),
            &self.repo,
            Path::new(relative_cwd),
        )
        .unwrap()
    }

    /// Runs the binary from the repository with configuration files
    /// ignored. Returns whether it exited successfully.
    pub fn run(&mut self, args: &[&str]) -> bool {
        let output = Command::new(env!("CARGO_BIN_EXE_jobspace"))
            .current_dir(&self.repo)
            .env_remove("JOBSPACE_LOG_LEVEL")
            .env_remove("JOBSPACE_STORAGE_DIR")
            .env_remove("JOBSPACE_TMP_VIEW")
            .env_remove("JOBSPACE_REPO_VIEW")
            .env_remove("JOBSPACE_OVERLAY")
            .env_remove("JOBSPACE_TMP_CEILING")
            .arg("--no-config")
            .arg("--storage-dir")
            .arg(&self.storage_dir)
            .args(args)
            .output()
            .unwrap();
        self.last_stdout = String::from_utf8_lossy(&output.stdout).to_string();
        self.last_stderr = String::from_utf8_lossy(&output.stderr).to_string();
        output.status.success()
    }

    pub fn pass(&mut self, args: &[&str]) -> bool {
        let ok = self.run(args);
        if !ok {
            eprintln!("stdout: {}\nstderr: {}", self.last_stdout, self.last_stderr);
        }
        ok
    }

    pub fn xfail(&mut self, args: &[&str]) -> bool {
        !self.run(args)
    }

    /// Whether jobs can get kernel overlays on this host, next to this
    /// workspace.
    pub fn kernel_overlays_available(&self) -> bool {
        let check_dir = self.base().join(format!("kernel-check-{}", rid()));
        let supported = kernel_overlay_supported(&check_dir);
        if !supported {
            eprintln!("Kernel overlays unavailable, skipping");
        }
        supported
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.last_stdout).unwrap()
    }
}

#[fixture]
pub fn workspace() -> JobWorkspace {
    JobWorkspace::new()
}

/// A workspace outside of `/tmp`, so that a `/tmp` view does not hide it.
#[fixture]
pub fn kernel_workspace() -> JobWorkspace {
    JobWorkspace::new_in(Path::new(env!("CARGO_TARGET_TMPDIR")))
}
