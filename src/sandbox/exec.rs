use super::platform::MountPlatform;
use super::sandbox_struct::Sandbox;
use log::trace;
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::process::Command;

impl<P: MountPlatform> Sandbox<P> {
    /// Variables the job's process must see, in the order they are set.
    pub fn env_vars(&self) -> Vec<(&'static str, std::path::PathBuf)> {
        vec![
            ("TMPDIR", self.visible_path(&self.env.effective_tmpdir)),
            ("PWD", self.visible_path(&self.env.effective_cwd)),
        ]
    }

    /**
     * Prepares `program` to run inside the sandbox: environment set, working
     * directory set, and chrooted into the private root when there is one.
     */
    pub fn command(&self, program: impl AsRef<OsStr>) -> Command {
        let mut cmd = Command::new(program);
        for (key, value) in self.env_vars() {
            cmd.env(key, value);
        }

        let cwd = self.visible_path(&self.env.effective_cwd);
        match (&self.root, self.chrooted) {
            (Some(root), true) => {
                trace!(
                    "Command will chroot into {} and chdir to {}",
                    root.display(),
                    cwd.display()
                );
                let root = CString::new(root.as_os_str().as_bytes());
                let cwd = CString::new(cwd.as_os_str().as_bytes());
                unsafe {
                    cmd.pre_exec(move || {
                        let (Ok(root), Ok(cwd)) = (&root, &cwd) else {
                            return Err(std::io::Error::from(
                                std::io::ErrorKind::InvalidInput,
                            ));
                        };
                        nix::unistd::chroot(root.as_c_str())?;
                        nix::unistd::chdir(cwd.as_c_str())?;
                        Ok(())
                    });
                }
            }
            _ => {
                cmd.current_dir(cwd);
            }
        }
        cmd
    }
}
