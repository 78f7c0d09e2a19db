use super::plan::job_layout;
use crate::config::{Config, OverlayMode};
use crate::resources::{Reservation, ResourceAccountant};
use crate::sandbox::{
    BuildOptions, EmulatedPlatform, KernelPlatform, MountPlatform, Sandbox,
    enter_user_namespace, kernel_overlay_supported,
};
use crate::util::{
    available_space, install_cancellation_handlers, mkdir,
    pending_cancellation,
};
use anyhow::{Context, Result, anyhow};
use log::{debug, info, warn};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Exit code of a job killed because it ran out of time.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/**
 * Runs `command` as one job: validate its views, reserve its temp storage,
 * build its sandbox, run it, and tear everything down whatever happened.
 * Returns the exit code the job should be reported with.
 */
pub fn run(config: &Config, command: &[String]) -> Result<i32> {
    let Some((program, args)) = command.split_first() else {
        return Err(anyhow!("No command to run"));
    };

    // Nothing below happens unless the views are valid
    let layout = job_layout(config)?;

    mkdir(&config.storage_dir).context(format!(
        "Failed to create storage directory {}",
        config.storage_dir.display()
    ))?;

    let platform = select_platform(config)?;

    let ceiling = match config.tmp_ceiling {
        Some(ceiling) => ceiling,
        None => available_space(&config.storage_dir)?,
    };
    let accountant = ResourceAccountant::new(ceiling);
    let reservation = match layout.tmp_resource {
        Some(size) => accountant.reserve(size)?,
        None => Reservation::none(),
    };

    install_cancellation_handlers()?;

    let mut sandbox = Sandbox::build(
        platform,
        BuildOptions {
            job_dir: config.job_dir.clone(),
            keep_dirs: config.keep_dirs,
        },
        layout.env,
        layout.overlays,
        reservation,
    )
    .context("Building sandbox")?;

    let mut cmd = sandbox.command(program);
    cmd.args(args);
    let result = match cmd.spawn() {
        Ok(child) => supervise(child, config.timeout.map(Duration::from_secs)),
        Err(e) => Err(anyhow!("Failed to run {}: {}", program, e)),
    };

    // Failures are logged by teardown and must not mask the job's status
    let _ = sandbox.teardown();
    debug!(
        "{} of temp storage still reserved",
        accountant.reserved()
    );

    result
}

fn select_platform(config: &Config) -> Result<Box<dyn MountPlatform>> {
    let kernel = match config.overlay {
        OverlayMode::Kernel => true,
        OverlayMode::Emulated => false,
        OverlayMode::Auto => {
            let probe_dir = config
                .storage_dir
                .join(format!("probe-{}", Uuid::new_v4().simple()));
            let supported = kernel_overlay_supported(&probe_dir);
            if !supported {
                info!("Kernel overlays unavailable, emulating them");
            }
            supported
        }
    };

    if kernel {
        enter_user_namespace().context("Entering private namespace")?;
        Ok(Box::new(KernelPlatform::new()))
    } else if config.tmp_view.is_some() || config.repo_view.is_some() {
        // without a mount namespace the views cannot live at their real
        // location, the job sees them below its job dir
        let staging = config.job_dir.join("root");
        info!("Staging views under {}", staging.display());
        Ok(Box::new(EmulatedPlatform::staged_under(staging)))
    } else {
        Ok(Box::new(EmulatedPlatform::new()))
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

fn supervise(mut child: Child, timeout: Option<Duration>) -> Result<i32> {
    let pid = Pid::from_raw(child.id() as i32);
    let started = Instant::now();
    let mut forwarded = false;
    let mut timed_out = false;

    loop {
        if let Some(status) =
            child.try_wait().context("Failed to wait for job")?
        {
            if timed_out {
                warn!("Job killed after {} seconds", started.elapsed().as_secs());
                return Ok(TIMEOUT_EXIT_CODE);
            }
            return Ok(exit_code(status));
        }

        if !forwarded {
            if let Some(signal) = pending_cancellation() {
                info!("Cancelling job on {}", signal);
                let _ = kill(pid, signal);
                forwarded = true;
            }
        }
        if !timed_out && timeout.is_some_and(|t| started.elapsed() >= t) {
            let _ = kill(pid, Signal::SIGKILL);
            timed_out = true;
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_exit_codes() {
        let status = Command::new("sh").args(["-c", "exit 3"]).status().unwrap();
        assert_eq!(exit_code(status), 3);
        let status =
            Command::new("sh").args(["-c", "kill -9 $$"]).status().unwrap();
        assert_eq!(exit_code(status), 128 + 9);
    }

    #[test]
    fn test_timeout_kills_job() {
        let child = Command::new("sleep").arg("5").spawn().unwrap();
        let code = supervise(child, Some(Duration::from_millis(50))).unwrap();
        assert_eq!(code, TIMEOUT_EXIT_CODE);
    }
}
