// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Detaching the daemon from the terminal.
//!
//! The daemon is re-executed with `--foreground` in its own process group
//! with stdio on `/dev/null`. Startup failures that happen before the
//! daemon settles still reach the caller's exit status.

use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use dj_daemon::{running_pid, DaemonConfig, RunOptions};

use crate::exit_error::ExitError;

/// How long the detached daemon must survive to count as started.
const STARTUP_GRACE: Duration = Duration::from_secs(1);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Start the daemon in the background and return its pid.
pub fn detach(options: &RunOptions) -> Result<u32, ExitError> {
    preflight(&options.config_path)?;

    let program = std::env::current_exe()
        .map_err(|e| ExitError::failure(format!("cannot locate pg_dbms_job binary: {e}")))?;
    let child = Command::new(program)
        .args(foreground_args(options))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|e| ExitError::failure(format!("cannot start daemon: {e}")))?;

    wait_for_startup(child, STARTUP_GRACE)
}

/// Checks that would otherwise only show up in the detached daemon's log.
fn preflight(config_path: &Path) -> Result<(), ExitError> {
    let (config, _) = DaemonConfig::load(config_path).map_err(ExitError::failure)?;
    if let Some(pid) = running_pid(&config.pidfile) {
        return Err(ExitError::failure(format!(
            "pg_dbms_job is already running (pid {pid}, pid file {})",
            config.pidfile.display()
        )));
    }
    Ok(())
}

fn foreground_args(options: &RunOptions) -> Vec<String> {
    let mut args = vec![
        "--foreground".to_string(),
        "--config".to_string(),
        options.config_path.display().to_string(),
    ];
    match options.debug {
        Some(true) => args.push("--debug".to_string()),
        Some(false) => args.push("--no-debug".to_string()),
        None => {}
    }
    args
}

fn wait_for_startup(mut child: Child, grace: Duration) -> Result<u32, ExitError> {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(status)) => {
                return Err(ExitError::failure(format!(
                    "daemon exited during startup ({status}); see its log file"
                )));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(ExitError::failure(format!("cannot watch daemon: {e}"))),
        }
    }
    Ok(child.id())
}

#[cfg(test)]
#[path = "daemonize_tests.rs"]
mod tests;
