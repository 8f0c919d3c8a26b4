// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, reload, shutdown.

mod pidfile;
mod startup;

pub use pidfile::{read_pid, running_pid, signal_daemon, wait_released, Pidfile};
pub use startup::{startup, Started};

use std::path::PathBuf;
use std::sync::Arc;

use dj_core::SystemClock;
use dj_storage::{PgConnector, StoreError};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, DaemonConfig};
use crate::control::spawn_signal_listener;
use crate::logging::{LogHandle, LogSettings, LoggingError};
use crate::pool::SelfExec;
use crate::scheduler::{Reloader, Scheduler, StopReason};

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot lock pid file {0}: another pg_dbms_job daemon is already running?")]
    LockFailed(PathBuf, #[source] std::io::Error),

    #[error("no pg_dbms_job daemon is running (pid file {0})")]
    NotRunning(PathBuf),

    #[error("cannot signal pg_dbms_job daemon (pid {pid}): {source}")]
    Signal {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot set up logging: {0}")]
    Logging(#[from] LoggingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the daemon was asked to run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_path: PathBuf,
    /// `--debug` / `--no-debug`
    pub debug: Option<bool>,
    /// Run one pass, wait for its jobs and exit.
    pub single: bool,
}

/// Run the daemon in the current process until it is stopped.
pub async fn run(options: RunOptions) -> Result<StopReason, LifecycleError> {
    let (config, warnings) = DaemonConfig::load(&options.config_path)?;
    let config = config.with_debug_override(options.debug);

    let logging = Arc::new(LogHandle::init(&LogSettings::from(&config))?);
    info!(
        pid = std::process::id(),
        config = %options.config_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "pg_dbms_job starting"
    );
    for warning in &warnings {
        error!(%warning, "ignoring configuration line");
    }
    debug!(
        database = %config.target,
        pidfile = %config.pidfile.display(),
        interval = ?config.job_queue_interval,
        processes = config.job_queue_processes,
        nap = ?config.nap_time,
        "effective configuration"
    );

    let connector = Arc::new(PgConnector);
    let Started { pidfile, gateway } = match startup(&config, connector.as_ref()).await {
        Ok(started) => started,
        Err(e) => {
            error!(error = %e, "failed to start");
            return Err(e);
        }
    };
    let pidfile = Arc::new(Mutex::new(pidfile));

    let launcher = Arc::new(SelfExec::current()?);
    let (control_tx, control_rx) = mpsc::channel(16);
    spawn_signal_listener(control_tx)?;

    let reloader = FileReloader {
        config_path: options.config_path.clone(),
        debug: options.debug,
        logging: Arc::clone(&logging),
        pidfile: Arc::clone(&pidfile),
    };
    let scheduler = Scheduler::new(config, connector, launcher, SystemClock, control_rx)
        .with_gateway(gateway)
        .with_reloader(reloader);

    let reason = if options.single { scheduler.run_once().await } else { scheduler.run().await };

    pidfile.lock().remove();
    info!(?reason, "pg_dbms_job stopped");
    Ok(reason)
}

/// Re-reads the configuration file on reload and applies the parts that live
/// outside the scheduling loop.
struct FileReloader {
    config_path: PathBuf,
    debug: Option<bool>,
    logging: Arc<LogHandle>,
    pidfile: Arc<Mutex<Pidfile>>,
}

impl Reloader for FileReloader {
    fn reload(&mut self, current: &DaemonConfig) -> Option<DaemonConfig> {
        info!(config = %self.config_path.display(), "reloading configuration");
        let (config, warnings) = match DaemonConfig::load(&self.config_path) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(error = %e, "keeping the current configuration");
                return None;
            }
        };
        let config = config.with_debug_override(self.debug);
        for warning in &warnings {
            error!(%warning, "ignoring configuration line");
        }

        if let Err(e) = self.logging.apply(&LogSettings::from(&config)) {
            warn!(error = %e, "cannot apply new log settings");
        }
        if config.pidfile != current.pidfile {
            let mut pidfile = self.pidfile.lock();
            match pidfile.rename(&config.pidfile) {
                Ok(()) => info!(pidfile = %config.pidfile.display(), "moved pid file"),
                Err(e) => warn!(error = %e, "cannot move pid file"),
            }
        }
        Some(config)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
