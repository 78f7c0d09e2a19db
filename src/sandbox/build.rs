use super::platform::{Journal, MountPlatform};
use super::sandbox_struct::{BuildOptions, Sandbox, SandboxState};
use crate::error::SandboxError;
use crate::resources::Reservation;
use crate::types::{OverlayMount, ResolvedEnvironment};
use log::{debug, info, warn};

impl<P: MountPlatform> Sandbox<P> {
    /**
     * Materializes `env` and `overlays` through `platform`.
     *
     * Either every step succeeds and an active sandbox is returned, or
     * everything done so far is unwound, `reservation` is released, and the
     * error that stopped the build is returned.
     */
    pub fn build(
        platform: P,
        options: BuildOptions,
        env: ResolvedEnvironment,
        overlays: Vec<OverlayMount>,
        reservation: Reservation,
    ) -> Result<Self, SandboxError> {
        let mut sandbox = Sandbox {
            platform,
            env,
            overlays,
            steps: Vec::new(),
            reservation,
            root: None,
            chrooted: false,
            options,
            state: SandboxState::Unbuilt,
        };

        sandbox.state = SandboxState::Building;
        debug!(
            "Building sandbox in {} with {} platform",
            sandbox.options.job_dir.display(),
            sandbox.platform.name()
        );

        let mut journal = Journal::new();
        let result = sandbox.run_build_steps(&mut journal);
        sandbox.steps = journal.into_steps();

        match result {
            Ok(()) => {
                sandbox.state = SandboxState::Active;
                info!(
                    "Sandbox ready: TMPDIR={} cwd={} ({} mounts)",
                    sandbox.env.effective_tmpdir.display(),
                    sandbox.env.effective_cwd.display(),
                    sandbox.mount_count()
                );
                Ok(sandbox)
            }
            Err(e) => {
                warn!("Sandbox build failed, rolling back: {}", e);
                sandbox.state = SandboxState::TearingDown;
                let errors = sandbox.unwind(false);
                for error in &errors {
                    warn!("Rollback: {}", error);
                }
                sandbox.reservation.release();
                sandbox.state = SandboxState::Released;
                Err(e)
            }
        }
    }

    fn run_build_steps(
        &mut self,
        journal: &mut Journal,
    ) -> Result<(), SandboxError> {
        self.platform.validate(&self.env)?;
        journal.mkdir(&self.options.job_dir)?;

        self.root = self.platform.prepare_root(
            &self.env,
            &self.options.job_dir,
            journal,
        )?;
        self.chrooted =
            self.root.is_some() && self.platform.chroot_into_root();

        let scratch = self.env.physical_scratch_dir.clone();
        journal.mkdir_private(&scratch)?;

        match &self.env.tmp_view {
            Some(view) => {
                let target = self.host_path(view);
                debug!("Mapping temp view {}", view.display());
                self.platform.map_tmp(
                    &target,
                    &scratch,
                    &self.reservation,
                    journal,
                )?;
            }
            None if self.reservation.is_bounded() => {
                self.platform.map_tmp(
                    &scratch,
                    &scratch,
                    &self.reservation,
                    journal,
                )?;
            }
            None => (),
        }

        if let Some(view) = &self.env.repo_view {
            let target = self.host_path(view);
            debug!("Mapping repository view {}", view.display());
            self.platform.map_repo(
                &target,
                &self.env.physical_repo_root,
                journal,
            )?;
        }

        for overlay in &self.overlays {
            let on_host = OverlayMount {
                merge_point: self.host_path(&overlay.merge_point),
                upper: self.host_path(&overlay.upper),
                lower: self.host_path(&overlay.lower),
            };
            debug!("Activating overlay {}", overlay);
            self.platform.activate_overlay(&on_host, journal)?;
        }

        let cwd = self.host_path(&self.env.effective_cwd);
        if !cwd.is_dir() {
            warn!(
                "Working directory {} does not exist in the sandbox",
                self.env.effective_cwd.display()
            );
        }

        Ok(())
    }
}
