use super::platform::{MountPlatform, Step};
use super::sandbox_struct::{Sandbox, SandboxState};
use crate::error::SandboxError;
use crate::util::get_mounts;
use log::{debug, trace, warn};
use std::io;

impl<P: MountPlatform> Sandbox<P> {
    /**
     * Deactivates every mount in reverse activation order, removes the
     * directories `build` created (unless `keep_dirs`), then releases the
     * reservation.
     *
     * Calling it again after it ran once does nothing. Failed unwind steps do
     * not stop the remaining ones; they are reported together as a
     * `Teardown` error.
     */
    pub fn teardown(&mut self) -> Result<(), SandboxError> {
        if self.state == SandboxState::Released {
            trace!("Sandbox already released");
            return Ok(());
        }

        self.state = SandboxState::TearingDown;
        let errors = self.unwind(self.options.keep_dirs);
        self.reservation.release();
        self.state = SandboxState::Released;

        if errors.is_empty() {
            debug!("Sandbox {} released", self.options.job_dir.display());
            Ok(())
        } else {
            for error in &errors {
                warn!("Teardown: {}", error);
            }
            Err(SandboxError::Teardown(errors))
        }
    }

    pub(super) fn unwind(&mut self, keep_dirs: bool) -> Vec<String> {
        let mut errors = Vec::new();

        for step in std::mem::take(&mut self.steps).into_iter().rev() {
            match step {
                Step::Mounted(mount) => {
                    match self.platform.deactivate(&mount) {
                        Ok(()) => {
                            trace!("Deactivated {}", mount.target.display())
                        }
                        Err(e) => errors.push(e.to_string()),
                    }
                }
                Step::CreatedFile(path) => {
                    if keep_dirs {
                        continue;
                    }
                    if let Err(e) = std::fs::remove_file(&path) {
                        errors.push(format!(
                            "failed to remove {}: {}",
                            path.display(),
                            e
                        ));
                    }
                }
                Step::CreatedDir { path, recursive } => {
                    if keep_dirs {
                        continue;
                    }
                    match get_mounts(&path) {
                        Ok(mounts) if !mounts.is_empty() => {
                            errors.push(format!(
                                "{} left in place, {} is still mounted",
                                path.display(),
                                mounts[0].display()
                            ));
                            continue;
                        }
                        Err(e) => {
                            errors.push(e.to_string());
                            continue;
                        }
                        Ok(_) => (),
                    }
                    let result = if recursive {
                        std::fs::remove_dir_all(&path)
                    } else {
                        std::fs::remove_dir(&path)
                    };
                    match result {
                        Ok(()) => trace!("Removed {}", path.display()),
                        // holds data that outlives the job, such as an upper
                        Err(e)
                            if e.kind() == io::ErrorKind::DirectoryNotEmpty =>
                        {
                            debug!("Keeping non empty {}", path.display())
                        }
                        Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                        Err(e) => errors.push(format!(
                            "failed to remove {}: {}",
                            path.display(),
                            e
                        )),
                    }
                }
            }
        }

        match get_mounts(&self.options.job_dir) {
            Ok(leftovers) => {
                for mount in leftovers {
                    errors.push(format!(
                        "{} is still mounted after teardown",
                        mount.display()
                    ));
                }
            }
            Err(e) => errors.push(e.to_string()),
        }

        errors
    }
}
