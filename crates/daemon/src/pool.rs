// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker pool: one child process per dispatched job.
//!
//! Every child is watched by its own task, which collects the child's output
//! and posts a [`Reaped`] on the pool's exit channel once the process is gone.
//! The scheduler drains that channel with [`WorkerPool::reap`] or awaits it
//! with [`WorkerPool::next_exit`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dj_core::{Clock, ExitReport, JobDefinition, JobKey};
use dj_storage::ConnectTarget;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use crate::env;

/// Output kept per job; the rest is read and discarded.
pub const OUTPUT_LIMIT: usize = 1024 * 1024;

/// Builds the command that runs one job.
pub trait Launcher: Send + Sync {
    fn command(&self, job: &JobDefinition, target: &ConnectTarget) -> Command;
}

/// Re-executes the current binary with the hidden `exec-job` subcommand.
#[derive(Debug, Clone)]
pub struct SelfExec {
    program: std::path::PathBuf,
}

impl SelfExec {
    pub fn current() -> std::io::Result<Self> {
        Ok(Self { program: std::env::current_exe()? })
    }
}

impl Launcher for SelfExec {
    fn command(&self, job: &JobDefinition, target: &ConnectTarget) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("exec-job")
            .envs(env::job_vars(&job.key, &job.payload))
            .envs(env::libpq_vars(target));
        cmd
    }
}

/// Runs the job body as a shell script. Used by tests in place of a database.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellLauncher;

#[cfg(test)]
impl Launcher for ShellLauncher {
    fn command(&self, job: &JobDefinition, _target: &ConnectTarget) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&job.payload.what);
        cmd
    }
}

/// Errors dispatching a job
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is full ({capacity} slots)")]
    Exhausted { capacity: usize },

    #[error("cannot start job {job}: {source}")]
    Spawn {
        job: JobKey,
        #[source]
        source: std::io::Error,
    },
}

/// An occupied slot.
#[derive(Debug)]
pub struct WorkerSlot {
    pub job: JobDefinition,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    kill: Option<oneshot::Sender<()>>,
}

/// A finished child.
#[derive(Debug, Clone)]
pub struct Reaped {
    pub job: JobDefinition,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub report: ExitReport,
    pub output: String,
}

pub struct WorkerPool<C: Clock> {
    capacity: usize,
    launcher: Arc<dyn Launcher>,
    clock: C,
    slots: HashMap<JobKey, WorkerSlot>,
    exit_tx: mpsc::UnboundedSender<Reaped>,
    exit_rx: mpsc::UnboundedReceiver<Reaped>,
}

impl<C: Clock> WorkerPool<C> {
    pub fn new(capacity: usize, launcher: Arc<dyn Launcher>, clock: C) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self { capacity, launcher, clock, slots: HashMap::new(), exit_tx, exit_rx }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change admission. Running children are never stopped by a shrink.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn is_idle(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.slots.len())
    }

    pub fn is_running(&self, key: &JobKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Start `job` in a new child process.
    pub fn dispatch(
        &mut self,
        job: &JobDefinition,
        target: &ConnectTarget,
    ) -> Result<&WorkerSlot, PoolError> {
        if self.free_slots() == 0 {
            return Err(PoolError::Exhausted { capacity: self.capacity });
        }

        let mut cmd = self.launcher.command(job, target);
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        let child = cmd.spawn().map_err(|source| PoolError::Spawn { job: job.key, source })?;

        let pid = child.id();
        let started_at = self.clock.utc();
        let (kill_tx, kill_rx) = oneshot::channel();
        tracing::debug!(job = %job.key, pid, "started job");

        tokio::spawn(watch(
            child,
            kill_rx,
            Reaped {
                job: job.clone(),
                pid,
                started_at,
                ended_at: started_at,
                report: ExitReport { code: None, signal: None },
                output: String::new(),
            },
            self.clock.clone(),
            self.exit_tx.clone(),
        ));

        let slot = WorkerSlot { job: job.clone(), pid, started_at, kill: Some(kill_tx) };
        Ok(match self.slots.entry(job.key) {
            Entry::Occupied(mut entry) => {
                entry.insert(slot);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(slot),
        })
    }

    /// Collect every child that has already finished.
    pub fn reap(&mut self) -> Vec<Reaped> {
        let mut done = Vec::new();
        while let Ok(reaped) = self.exit_rx.try_recv() {
            self.slots.remove(&reaped.job.key);
            done.push(reaped);
        }
        done
    }

    /// Wait for the next child to finish. Pending forever while idle.
    pub async fn next_exit(&mut self) -> Reaped {
        loop {
            if let Some(reaped) = self.exit_rx.recv().await {
                self.slots.remove(&reaped.job.key);
                return reaped;
            }
        }
    }

    /// Wait for every running child.
    pub async fn wait_all(&mut self) -> Vec<Reaped> {
        let mut done = self.reap();
        while !self.slots.is_empty() {
            done.push(self.next_exit().await);
        }
        done
    }

    /// Forcibly terminate every running child.
    pub fn kill_all(&mut self) {
        for (key, slot) in &mut self.slots {
            if let Some(kill) = slot.kill.take() {
                tracing::warn!(job = %key, pid = slot.pid, "killing job");
                let _ = kill.send(());
            }
        }
    }
}

async fn watch<C: Clock>(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    mut reaped: Reaped,
    clock: C,
    exit_tx: mpsc::UnboundedSender<Reaped>,
) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (out, err, status) =
        tokio::join!(read_capped(stdout), read_capped(stderr), wait_or_kill(&mut child, kill));

    reaped.ended_at = clock.utc();
    reaped.report = match status {
        Ok(status) => exit_report(status),
        Err(e) => {
            tracing::error!(job = %reaped.job.key, error = %e, "lost track of job process");
            ExitReport { code: None, signal: None }
        }
    };
    reaped.output = join_output(&out, &err);

    tracing::debug!(job = %reaped.job.key, pid = reaped.pid, status = %reaped.report, "job exited");
    let _ = exit_tx.send(reaped);
}

async fn wait_or_kill(
    child: &mut Child,
    kill: oneshot::Receiver<()>,
) -> std::io::Result<ExitStatus> {
    tokio::select! {
        status = child.wait() => status,
        Ok(()) = kill => {
            child.start_kill()?;
            child.wait().await
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
    let Some(mut reader) = reader else {
        return Vec::new();
    };
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = OUTPUT_LIMIT.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
    kept
}

fn join_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut output = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&String::from_utf8_lossy(stderr));
    }
    output
}

pub(crate) fn exit_report(status: ExitStatus) -> ExitReport {
    match (status.code(), status.signal()) {
        (_, Some(signal)) => ExitReport::signal(signal),
        (Some(code), None) => ExitReport::code(code),
        (None, None) => ExitReport { code: None, signal: None },
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
