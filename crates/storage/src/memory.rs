// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory store gateway for tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use dj_core::{
    take_due, Clock, Completion, CompletionStatus, JobDefinition, JobKey, JobSource, NextRun,
    Outcome, RunHistoryRecord, StaleClaim,
};

use crate::error::StoreError;
use crate::gateway::{
    Channel, ConnectTarget, Connector, Gateway, JobStore, Notification, NotificationSource,
};

/// A job row as the in-memory store keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredJob {
    pub definition: JobDefinition,
    pub broken: bool,
    /// `running` marker: when the job was claimed.
    pub claimed_at: Option<DateTime<Utc>>,
    pub failures: u32,
    pub instance: u64,
    pub last_date: Option<DateTime<Utc>>,
}

impl StoredJob {
    fn new(definition: JobDefinition) -> Self {
        Self { definition, broken: false, claimed_at: None, failures: 0, instance: 0, last_date: None }
    }

    pub fn is_running(&self) -> bool {
        self.claimed_at.is_some()
    }
}

#[derive(Default)]
struct MemoryState {
    jobs: BTreeMap<JobKey, StoredJob>,
    history: Vec<RunHistoryRecord>,
    unavailable: bool,
    claim_calls: Vec<usize>,
}

/// Job store holding rows in memory.
///
/// Date expressions cannot be evaluated without a database, so a
/// [`NextRun::Rule`] completion disables the job.
#[derive(Clone)]
pub struct MemoryStore<C: Clock> {
    clock: C,
    inner: Arc<Mutex<MemoryState>>,
}

impl<C: Clock> MemoryStore<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, inner: Arc::new(Mutex::new(MemoryState::default())) }
    }

    /// Insert or replace a job row.
    pub fn insert(&self, definition: JobDefinition) {
        let key = definition.key;
        self.inner.lock().jobs.insert(key, StoredJob::new(definition));
    }

    pub fn remove(&self, key: &JobKey) -> Option<StoredJob> {
        self.inner.lock().jobs.remove(key)
    }

    pub fn job(&self, key: &JobKey) -> Option<StoredJob> {
        self.inner.lock().jobs.get(key).cloned()
    }

    pub fn set_broken(&self, key: &JobKey, broken: bool) {
        if let Some(job) = self.inner.lock().jobs.get_mut(key) {
            job.broken = broken;
        }
    }

    /// Set a `running` marker as a dead daemon would have left it.
    pub fn mark_running(&self, key: &JobKey, at: DateTime<Utc>) {
        if let Some(job) = self.inner.lock().jobs.get_mut(key) {
            job.claimed_at = Some(at);
        }
    }

    pub fn running(&self) -> Vec<JobKey> {
        self.inner.lock().jobs.values().filter(|j| j.is_running()).map(|j| j.definition.key).collect()
    }

    pub fn history(&self) -> Vec<RunHistoryRecord> {
        self.inner.lock().history.clone()
    }

    pub fn history_for(&self, key: &JobKey) -> Vec<RunHistoryRecord> {
        self.inner.lock().history.iter().filter(|r| r.key == *key).cloned().collect()
    }

    /// Make every call fail as if the connection were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unavailable = unavailable;
    }

    /// `limit` of every `claim_due` call that reached the store.
    pub fn claim_calls(&self) -> Vec<usize> {
        self.inner.lock().claim_calls.clone()
    }

    fn check(state: &MemoryState) -> Result<(), StoreError> {
        if state.unavailable {
            return Err(StoreError::Unavailable("memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<C: Clock> JobStore for MemoryStore<C> {
    async fn reconcile_stale(&self) -> Result<Vec<StaleClaim>, StoreError> {
        let now = self.clock.utc();
        let mut state = self.inner.lock();
        Self::check(&state)?;

        let mut cleared = Vec::new();
        let mut records = Vec::new();
        for job in state.jobs.values_mut().filter(|j| j.is_running()) {
            let claimed_at = job.claimed_at.take();
            if job.definition.key.source == JobSource::Scheduled {
                job.failures += 1;
            }
            records.push(RunHistoryRecord {
                key: job.definition.key,
                owner: job.definition.payload.log_user.clone(),
                due_at: job.definition.next_run,
                started_at: claimed_at.unwrap_or(now),
                ended_at: now,
                outcome: Outcome::Crashed,
                exit_code: None,
                pid: None,
                output: "daemon stopped before the job completed".to_string(),
            });
            cleared.push(StaleClaim { key: job.definition.key, claimed_at });
        }
        state.history.extend(records);
        Ok(cleared)
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<JobDefinition>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = self.clock.utc();
        let mut state = self.inner.lock();
        Self::check(&state)?;
        state.claim_calls.push(limit);

        let candidates = state
            .jobs
            .values()
            .filter(|j| !j.broken && !j.is_running())
            .filter(|j| j.definition.key.source == JobSource::Async || j.definition.next_run <= now)
            .map(|j| j.definition.clone())
            .collect();
        let batch = take_due(candidates, limit);
        for job in &batch {
            if let Some(stored) = state.jobs.get_mut(&job.key) {
                stored.claimed_at = Some(now);
            }
        }
        Ok(batch)
    }

    async fn release(&self, keys: &[JobKey]) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        Self::check(&state)?;
        for key in keys {
            if let Some(job) = state.jobs.get_mut(key) {
                job.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn record_completion(
        &self,
        completion: &Completion,
    ) -> Result<CompletionStatus, StoreError> {
        let mut state = self.inner.lock();
        Self::check(&state)?;
        let record = &completion.record;
        state.history.push(record.clone());

        let key = record.key;
        if key.source == JobSource::Async {
            return Ok(match state.jobs.remove(&key) {
                Some(_) => CompletionStatus::Applied,
                None => CompletionStatus::Orphaned,
            });
        }
        let Some(job) = state.jobs.get_mut(&key) else {
            return Ok(CompletionStatus::Orphaned);
        };

        job.claimed_at = None;
        job.instance += 1;
        job.last_date = Some(record.started_at);
        if record.outcome.is_success() {
            job.failures = 0;
        } else {
            job.failures += 1;
        }
        match &completion.next_run {
            NextRun::At(at) => job.definition.next_run = *at,
            NextRun::Rule(_) | NextRun::Never => job.broken = true,
        }
        Ok(CompletionStatus::Applied)
    }
}

/// Notification source fed by a [`NotificationSender`].
pub struct ChannelNotifications {
    rx: mpsc::UnboundedReceiver<Option<Notification>>,
}

/// Test handle pushing notifications into a [`ChannelNotifications`].
#[derive(Clone)]
pub struct NotificationSender {
    tx: Arc<Mutex<mpsc::UnboundedSender<Option<Notification>>>>,
}

impl ChannelNotifications {
    pub fn new() -> (NotificationSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (NotificationSender { tx: Arc::new(Mutex::new(tx)) }, Self { rx })
    }
}

impl NotificationSender {
    pub fn notify(&self, channel: Channel, payload: impl Into<String>) {
        let notification = Notification { channel, payload: payload.into(), pid: 0 };
        let _ = self.tx.lock().send(Some(notification));
    }

    /// Simulate a dropped listener connection.
    pub fn drop_connection(&self) {
        let _ = self.tx.lock().send(None);
    }

    fn replace(&self, tx: mpsc::UnboundedSender<Option<Notification>>) {
        *self.tx.lock() = tx;
    }
}

#[async_trait]
impl NotificationSource for ChannelNotifications {
    async fn recv(&mut self) -> Result<Option<Notification>, StoreError> {
        match self.rx.recv().await {
            Some(notification) => Ok(notification),
            // Sender gone: nothing will ever arrive
            None => std::future::pending().await,
        }
    }
}

/// Connector handing out gateways over one shared [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryConnector<C: Clock> {
    store: MemoryStore<C>,
    sender: NotificationSender,
    connects: Arc<Mutex<Vec<ConnectTarget>>>,
    refuse: Arc<Mutex<u32>>,
}

impl<C: Clock> MemoryConnector<C> {
    pub fn new(store: MemoryStore<C>) -> Self {
        let (sender, _) = ChannelNotifications::new();
        Self {
            store,
            sender,
            connects: Arc::new(Mutex::new(Vec::new())),
            refuse: Arc::new(Mutex::new(0)),
        }
    }

    pub fn store(&self) -> &MemoryStore<C> {
        &self.store
    }

    /// Sender wired to the most recent gateway.
    pub fn notifier(&self) -> NotificationSender {
        self.sender.clone()
    }

    /// Targets of every successful connect, in order.
    pub fn connects(&self) -> Vec<ConnectTarget> {
        self.connects.lock().clone()
    }

    /// Fail the next `count` connection attempts.
    pub fn refuse_next(&self, count: u32) {
        *self.refuse.lock() = count;
    }
}

#[async_trait]
impl<C: Clock> Connector for MemoryConnector<C> {
    async fn connect(&self, target: &ConnectTarget) -> Result<Gateway, StoreError> {
        {
            let mut refuse = self.refuse.lock();
            if *refuse > 0 {
                *refuse -= 1;
                return Err(StoreError::Unavailable(format!("refused connection to {target}")));
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.sender.replace(tx);
        self.connects.lock().push(target.clone());
        Ok(Gateway {
            store: Arc::new(self.store.clone()),
            notifications: Box::new(ChannelNotifications { rx }),
        })
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
