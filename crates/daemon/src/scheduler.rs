// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduling loop.
//!
//! Between passes the loop waits on four sources at once: control signals,
//! database notifications, child exits and a nap timer. A dispatch pass runs
//! when a notification arrives, when the polling interval elapses, when a
//! child exits while the previous pass filled every slot, and after a reload
//! or reconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dj_core::{Clock, JobDefinition};
use dj_storage::{Connector, Gateway, JobStore, Notification, StoreError};
use tokio::sync::mpsc;

use crate::backoff::Backoff;
use crate::config::DaemonConfig;
use crate::control::{ControlSignal, DaemonContext, Phase};
use crate::pool::{Launcher, Reaped, WorkerPool};
use crate::recorder::Recorder;

/// How long an immediate stop waits for killed children to go away.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Produces the configuration to switch to on reload, or `None` to keep the
/// current one.
pub trait Reloader: Send {
    fn reload(&mut self, current: &DaemonConfig) -> Option<DaemonConfig>;
}

impl<F> Reloader for F
where
    F: FnMut(&DaemonConfig) -> Option<DaemonConfig> + Send,
{
    fn reload(&mut self, current: &DaemonConfig) -> Option<DaemonConfig> {
        self(current)
    }
}

/// Reloader that never changes anything.
pub struct KeepConfig;

impl Reloader for KeepConfig {
    fn reload(&mut self, _current: &DaemonConfig) -> Option<DaemonConfig> {
        None
    }
}

/// Why the loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Graceful stop: every child finished and was recorded.
    Drained,
    /// Immediate stop: children were killed and left for reconciliation.
    Killed,
    /// Single-pass run completed.
    Finished,
}

enum Wake {
    Control(Option<ControlSignal>),
    Notification(Result<Option<Notification>, StoreError>),
    Exit(Reaped),
    Nap,
}

pub struct Scheduler<C: Clock> {
    ctx: DaemonContext,
    clock: C,
    connector: Arc<dyn Connector>,
    gateway: Option<Gateway>,
    pool: WorkerPool<C>,
    recorder: Recorder,
    /// Claimed jobs whose child could not be started yet.
    backlog: Vec<JobDefinition>,
    control: mpsc::Receiver<ControlSignal>,
    control_open: bool,
    reloader: Box<dyn Reloader>,
    backoff: Backoff,
    retry_at: Option<Instant>,
    next_tick: Instant,
    /// The last pass filled every free slot.
    saturated: bool,
}

impl<C: Clock> Scheduler<C> {
    pub fn new(
        config: DaemonConfig,
        connector: Arc<dyn Connector>,
        launcher: Arc<dyn Launcher>,
        clock: C,
        control: mpsc::Receiver<ControlSignal>,
    ) -> Self {
        let pool = WorkerPool::new(config.job_queue_processes, launcher, clock.clone());
        let backoff = Backoff::new(config.error_delay);
        let next_tick = clock.now();
        Self {
            ctx: DaemonContext::new(config),
            clock,
            connector,
            gateway: None,
            pool,
            recorder: Recorder::new(),
            backlog: Vec::new(),
            control,
            control_open: true,
            reloader: Box::new(KeepConfig),
            backoff,
            retry_at: None,
            next_tick,
            saturated: false,
        }
    }

    /// Start with an already established connection.
    pub fn with_gateway(mut self, gateway: Gateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_reloader(mut self, reloader: impl Reloader + 'static) -> Self {
        self.reloader = Box::new(reloader);
        self
    }

    pub fn phase(&self) -> Phase {
        self.ctx.phase
    }

    /// Run until stopped.
    pub async fn run(mut self) -> StopReason {
        if self.gateway.is_none() {
            self.retry_at = Some(self.clock.now());
        }
        tracing::info!(
            processes = self.pool.capacity(),
            interval_ms = self.ctx.config.job_queue_interval.as_millis() as u64,
            "scheduler started"
        );

        loop {
            match self.ctx.phase {
                Phase::Stopped => return self.stop_now().await,
                Phase::Draining => return self.drain().await,
                Phase::Running | Phase::Reloading => {}
            }

            let reaped = self.pool.reap();
            self.record(reaped).await;

            if self.retry_at.is_some_and(|at| self.clock.now() >= at) {
                self.reconnect().await;
            }
            if self.clock.now() >= self.next_tick {
                tracing::trace!("polling interval elapsed");
                self.pass().await;
            }

            match self.wait().await {
                Wake::Control(Some(signal)) => {
                    if self.ctx.signal(signal) == Phase::Reloading {
                        self.apply_reload().await;
                    }
                }
                Wake::Control(None) => self.control_open = false,
                Wake::Notification(Ok(Some(notification))) => {
                    tracing::debug!(
                        channel = %notification.channel,
                        payload = %notification.payload,
                        "notification received"
                    );
                    self.pass().await;
                }
                Wake::Notification(Ok(None)) => {
                    tracing::warn!("listener connection lost, notifications may have been missed");
                    self.pass().await;
                }
                Wake::Notification(Err(e)) => self.on_store_error(e),
                Wake::Exit(reaped) => {
                    self.record(vec![reaped]).await;
                    if self.saturated {
                        self.pass().await;
                    }
                }
                Wake::Nap => {}
            }
        }
    }

    /// Run one dispatch pass, wait for its children, then stop.
    pub async fn run_once(mut self) -> StopReason {
        self.pass().await;
        if self.ctx.phase.accepts_work() {
            self.ctx.phase = Phase::Draining;
        }
        match self.ctx.phase {
            Phase::Stopped => self.stop_now().await,
            _ => match self.drain().await {
                StopReason::Drained => StopReason::Finished,
                other => other,
            },
        }
    }

    async fn wait(&mut self) -> Wake {
        let nap = self.nap();
        let Self { control, control_open, gateway, pool, .. } = self;
        tokio::select! {
            signal = control.recv(), if *control_open => Wake::Control(signal),
            notification = next_notification(gateway) => Wake::Notification(notification),
            reaped = pool.next_exit() => Wake::Exit(reaped),
            _ = tokio::time::sleep(nap) => Wake::Nap,
        }
    }

    fn nap(&self) -> Duration {
        let now = self.clock.now();
        let mut nap = self.ctx.config.nap_time.min(self.next_tick.saturating_duration_since(now));
        if let Some(at) = self.retry_at {
            nap = nap.min(at.saturating_duration_since(now));
        }
        nap
    }

    fn store(&self) -> Option<Arc<dyn JobStore>> {
        self.gateway.as_ref().map(|gateway| Arc::clone(&gateway.store))
    }

    /// Select due jobs for every free slot and start them.
    async fn pass(&mut self) {
        self.next_tick = self.clock.now() + self.ctx.config.job_queue_interval;
        if !self.ctx.phase.accepts_work() {
            return;
        }

        let reaped = self.pool.reap();
        self.record(reaped).await;
        let Some(store) = self.store() else {
            return;
        };

        self.dispatch_backlog();
        let free = self.pool.free_slots();
        if free == 0 {
            self.saturated = true;
            return;
        }

        match store.claim_due(free).await {
            Ok(jobs) => {
                self.saturated = jobs.len() == free;
                if !jobs.is_empty() {
                    tracing::debug!(claimed = jobs.len(), free, "claimed due jobs");
                }
                for job in jobs {
                    self.dispatch(job);
                }
            }
            Err(e) => self.on_store_error(e),
        }
    }

    fn dispatch(&mut self, job: JobDefinition) {
        match self.pool.dispatch(&job, &self.ctx.config.target) {
            Ok(slot) => {
                tracing::info!(job = %job.key, pid = slot.pid, "job started");
            }
            Err(e) => {
                tracing::warn!(job = %job.key, error = %e, "cannot start job, will retry");
                self.backlog.push(job);
            }
        }
    }

    fn dispatch_backlog(&mut self) {
        let backlog = std::mem::take(&mut self.backlog);
        for job in backlog {
            if self.pool.free_slots() == 0 {
                self.backlog.push(job);
            } else {
                self.dispatch(job);
            }
        }
    }

    /// Queue finished children and write every pending completion.
    async fn record(&mut self, reaped: Vec<Reaped>) {
        for reaped in reaped {
            self.recorder.push(reaped);
        }
        if self.recorder.is_empty() {
            return;
        }
        let Some(store) = self.store() else {
            return;
        };
        if let Err(e) = self.recorder.flush(store.as_ref(), self.clock.now()).await {
            self.on_store_error(e);
        }
    }

    fn on_store_error(&mut self, e: StoreError) {
        if !e.is_connectivity() {
            tracing::warn!(error = %e, "database error, retrying on the next pass");
            return;
        }
        if self.gateway.take().is_some() {
            tracing::error!(error = %e, "lost connection to the database");
        }
        if self.retry_at.is_none() {
            let delay = self.backoff.next_delay();
            tracing::info!(retry_in_ms = delay.as_millis() as u64, "reconnecting later");
            self.retry_at = Some(self.clock.now() + delay);
        }
    }

    async fn reconnect(&mut self) {
        self.retry_at = None;
        let target = self.ctx.config.target.clone();
        match self.connector.connect(&target).await {
            Ok(gateway) => {
                tracing::info!(database = %target, attempts = self.backoff.failures(), "connected to the database");
                self.backoff.reset();
                self.gateway = Some(gateway);
                self.pass().await;
            }
            Err(e) => {
                let delay = self.backoff.next_delay();
                tracing::warn!(
                    database = %target,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "cannot connect to the database"
                );
                self.retry_at = Some(self.clock.now() + delay);
            }
        }
    }

    async fn apply_reload(&mut self) {
        let current = Arc::clone(&self.ctx.config);
        match self.reloader.reload(&current) {
            Some(config) => {
                if config.job_queue_processes != current.job_queue_processes {
                    tracing::info!(
                        from = current.job_queue_processes,
                        to = config.job_queue_processes,
                        "worker pool capacity changed"
                    );
                    self.pool.set_capacity(config.job_queue_processes);
                }
                self.backoff.set_base(config.error_delay);
                let target_changed = config.target != current.target;
                self.ctx.config = Arc::new(config);

                if target_changed {
                    tracing::info!(database = %self.ctx.config.target, "connection settings changed");
                    if let Some(gateway) = self.gateway.take() {
                        gateway.store.close().await;
                    }
                    self.backoff.reset();
                    self.reconnect().await;
                }
            }
            None => tracing::info!("configuration unchanged"),
        }
        self.ctx.phase = self.ctx.phase.reloaded();
        self.pass().await;
    }

    /// Graceful stop: let every child finish and record it.
    async fn drain(mut self) -> StopReason {
        tracing::info!(in_flight = self.pool.in_flight(), "draining running jobs");
        self.release_backlog().await;

        while !self.pool.is_idle() {
            let wake = {
                let Self { control, control_open, pool, .. } = &mut self;
                tokio::select! {
                    signal = control.recv(), if *control_open => Wake::Control(signal),
                    reaped = pool.next_exit() => Wake::Exit(reaped),
                }
            };
            match wake {
                Wake::Control(Some(signal)) => {
                    if self.ctx.signal(signal) == Phase::Stopped {
                        return self.stop_now().await;
                    }
                }
                Wake::Control(None) => self.control_open = false,
                Wake::Exit(reaped) => self.record(vec![reaped]).await,
                Wake::Notification(_) | Wake::Nap => {}
            }
        }

        if !self.recorder.is_empty() && self.gateway.is_none() {
            self.reconnect_for_shutdown().await;
        }
        self.record(Vec::new()).await;
        if !self.recorder.is_empty() {
            match self.store() {
                Some(store) => {
                    self.recorder.abandon(store.as_ref()).await;
                }
                None => {
                    tracing::error!(lost = self.recorder.pending(), "job completions could not be recorded");
                }
            }
        }

        self.ctx.phase = Phase::Stopped;
        self.close().await;
        tracing::info!("scheduler stopped");
        StopReason::Drained
    }

    /// Immediate stop: kill every child without recording it.
    async fn stop_now(mut self) -> StopReason {
        tracing::warn!(in_flight = self.pool.in_flight(), "immediate stop, killing running jobs");
        self.pool.kill_all();
        if tokio::time::timeout(KILL_GRACE, self.pool.wait_all()).await.is_err() {
            tracing::warn!("some job processes did not exit after being killed");
        }
        self.ctx.phase = Phase::Stopped;
        self.close().await;
        StopReason::Killed
    }

    async fn release_backlog(&mut self) {
        if self.backlog.is_empty() {
            return;
        }
        let keys: Vec<_> = self.backlog.iter().map(|job| job.key).collect();
        let Some(store) = self.store() else {
            tracing::warn!(jobs = keys.len(), "cannot release claimed jobs while disconnected");
            return;
        };
        match store.release(&keys).await {
            Ok(()) => self.backlog.clear(),
            Err(e) => tracing::warn!(error = %e, "cannot release claimed jobs"),
        }
    }

    async fn reconnect_for_shutdown(&mut self) {
        match self.connector.connect(&self.ctx.config.target).await {
            Ok(gateway) => self.gateway = Some(gateway),
            Err(e) => tracing::warn!(error = %e, "cannot reconnect to record job completions"),
        }
    }

    async fn close(&mut self) {
        if let Some(gateway) = self.gateway.take() {
            gateway.store.close().await;
        }
    }
}

async fn next_notification(
    gateway: &mut Option<Gateway>,
) -> Result<Option<Notification>, StoreError> {
    match gateway {
        Some(gateway) => gateway.notifications.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
