// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! pg_dbms_job: scheduler daemon for PostgreSQL dbms_job queues

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod args;
mod daemonize;
mod exit_error;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dj_daemon::{ControlSignal, StopReason};

use crate::args::{Action, Cli};
use crate::exit_error::{exit_status, ExitError};

/// How often `-k` checks whether the daemon has let go of its pid file.
const STOP_POLL: Duration = Duration::from_millis(100);

fn main() {
    if let Err(err) = run(Cli::parse().action()) {
        let (code, message) = exit_status(&err);
        if !message.is_empty() {
            eprintln!("pg_dbms_job: {message}");
        }
        std::process::exit(code);
    }
}

fn run(action: Action) -> Result<()> {
    match action {
        Action::Version => {
            println!("pg_dbms_job {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Action::ExecJob => {
            let code = runtime()?.block_on(dj_daemon::exec_job_from_env());
            if code != 0 {
                return Err(ExitError::silent(code).into());
            }
            Ok(())
        }
        Action::Signal { config_path, signal } => {
            let (config, _) = dj_daemon::DaemonConfig::load(&config_path).map_err(ExitError::failure)?;
            let pid = dj_daemon::signal_daemon(&config.pidfile, signal).map_err(ExitError::failure)?;
            println!("sent {signal} to pg_dbms_job (pid {pid})");
            if signal == ControlSignal::GracefulStop {
                dj_daemon::wait_released(&config.pidfile, STOP_POLL);
                println!("pg_dbms_job stopped");
            }
            Ok(())
        }
        Action::Detach(options) => {
            let pid = daemonize::detach(&options)?;
            println!("pg_dbms_job started (pid {pid})");
            Ok(())
        }
        Action::Foreground(options) => {
            let reason = runtime()?.block_on(dj_daemon::run(options)).map_err(ExitError::failure)?;
            if reason == StopReason::Killed {
                eprintln!("pg_dbms_job: running jobs were killed");
            }
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("cannot start async runtime")
}
