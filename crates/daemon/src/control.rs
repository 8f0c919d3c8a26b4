// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control plane: daemon phases and the signals that move between them.

use std::fmt;
use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::config::DaemonConfig;

/// Lifecycle phase of the scheduling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Reloading,
    Draining,
    Stopped,
}

/// Operator request delivered to the scheduling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Re-read the configuration (SIGHUP).
    Reload,
    /// Finish running jobs, then stop (SIGTERM).
    GracefulStop,
    /// Kill running jobs and stop now (SIGINT).
    ImmediateStop,
}

impl ControlSignal {
    pub fn unix_signal(&self) -> Signal {
        match self {
            Self::Reload => Signal::SIGHUP,
            Self::GracefulStop => Signal::SIGTERM,
            Self::ImmediateStop => Signal::SIGINT,
        }
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reload => "reload",
            Self::GracefulStop => "graceful stop",
            Self::ImmediateStop => "immediate stop",
        })
    }
}

impl Phase {
    /// Phase entered when `signal` arrives in this phase.
    ///
    /// A reload is ignored once a stop has begun, and an immediate stop
    /// escalates a drain.
    pub fn on_signal(self, signal: ControlSignal) -> Phase {
        match (self, signal) {
            (Self::Stopped, _) => Self::Stopped,
            (_, ControlSignal::ImmediateStop) => Self::Stopped,
            (Self::Draining, _) => Self::Draining,
            (_, ControlSignal::GracefulStop) => Self::Draining,
            (Self::Running | Self::Reloading, ControlSignal::Reload) => Self::Reloading,
        }
    }

    /// Phase after a reload has been applied.
    pub fn reloaded(self) -> Phase {
        match self {
            Self::Reloading => Self::Running,
            other => other,
        }
    }

    /// Whether selection passes may start in this phase.
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Running | Self::Reloading)
    }
}

/// State shared by the scheduling loop's components.
#[derive(Debug, Clone)]
pub struct DaemonContext {
    pub phase: Phase,
    pub config: Arc<DaemonConfig>,
}

impl DaemonContext {
    pub fn new(config: DaemonConfig) -> Self {
        Self { phase: Phase::Running, config: Arc::new(config) }
    }

    /// Apply `signal`, returning the new phase.
    pub fn signal(&mut self, signal: ControlSignal) -> Phase {
        let next = self.phase.on_signal(signal);
        if next != self.phase {
            tracing::info!(%signal, from = ?self.phase, to = ?next, "control phase change");
        }
        self.phase = next;
        next
    }
}

/// Forward SIGHUP, SIGTERM and SIGINT to `tx` until the receiver goes away.
pub fn spawn_signal_listener(tx: mpsc::Sender<ControlSignal>) -> std::io::Result<()> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = hangup.recv() => ControlSignal::Reload,
                Some(()) = terminate.recv() => ControlSignal::GracefulStop,
                Some(()) = interrupt.recv() => ControlSignal::ImmediateStop,
                else => break,
            };
            tracing::debug!(signal = %received, "received signal");
            if tx.send(received).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(test)]
#[path = "control_tests.rs"]
mod tests;
