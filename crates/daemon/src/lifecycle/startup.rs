// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup: pid file, database connection, reconciliation.

use dj_storage::{Connector, Gateway};
use tracing::{info, warn};

use super::{LifecycleError, Pidfile};
use crate::config::DaemonConfig;

/// Resources held by a started daemon.
pub struct Started {
    pub pidfile: Pidfile,
    pub gateway: Gateway,
}

impl std::fmt::Debug for Started {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Started").field("pidfile", &self.pidfile).finish_non_exhaustive()
    }
}

/// Start the daemon
pub async fn startup(
    config: &DaemonConfig,
    connector: &dyn Connector,
) -> Result<Started, LifecycleError> {
    // Lock first; a lock failure means the files belong to a running daemon
    let pidfile = Pidfile::acquire(&config.pidfile)?;

    match startup_inner(config, connector).await {
        Ok(gateway) => Ok(Started { pidfile, gateway }),
        Err(e) => {
            pidfile.remove();
            Err(e)
        }
    }
}

/// Inner startup logic - the pid file is removed if this fails
async fn startup_inner(
    config: &DaemonConfig,
    connector: &dyn Connector,
) -> Result<Gateway, LifecycleError> {
    let gateway = connector.connect(&config.target).await?;
    info!(database = %config.target, "connected to the database");

    // Clear claims left by a daemon that died before its jobs finished.
    // This must happen before the first selection pass.
    let stale = gateway.store.reconcile_stale().await?;
    for claim in &stale {
        warn!(
            job = %claim.key,
            claimed_at = ?claim.claimed_at,
            "job was still marked running, recorded as crashed"
        );
    }
    if !stale.is_empty() {
        info!(count = stale.len(), "reconciled stale job claims");
    }

    Ok(gateway)
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
