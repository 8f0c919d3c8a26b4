// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Turns finished children into history rows.
//!
//! Completions are queued and written in order. A completion that cannot be
//! written because the store is unreachable stays queued until a later flush
//! succeeds. One the store keeps rejecting is retried with backoff, then
//! given up; giving up always frees the job's claim.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dj_core::{Completion, CompletionStatus, JobDefinition, JobKey, RunHistoryRecord};
use dj_storage::{JobStore, StoreError};

use crate::backoff::Backoff;
use crate::pool::Reaped;

/// Attempts before a completion rejected by the store itself is given up.
pub const MAX_ATTEMPTS: u32 = 5;

/// First delay before retrying a rejected completion; doubles per attempt.
pub const RETRY_BASE: Duration = Duration::from_secs(1);

/// Build the completion of a finished child.
pub fn completion_for(reaped: Reaped) -> Completion {
    let Reaped { job, pid, started_at, ended_at, report, output } = reaped;
    let JobDefinition { key, payload, recurrence, next_run: due_at } = job;
    let outcome = report.outcome();

    Completion {
        next_run: recurrence.next_after(ended_at),
        record: RunHistoryRecord {
            key,
            owner: payload.log_user,
            due_at,
            started_at,
            ended_at,
            outcome,
            exit_code: report.code.filter(|code| *code != 0),
            pid,
            output,
        },
    }
}

struct Pending {
    completion: Completion,
    attempts: u32,
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl Pending {
    fn key(&self) -> JobKey {
        self.completion.record.key
    }

    fn due(&self, now: Instant) -> bool {
        !matches!(self.retry_at, Some(at) if at > now)
    }
}

#[derive(Default)]
pub struct Recorder {
    pending: VecDeque<Pending>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a finished child for recording.
    pub fn push(&mut self, reaped: Reaped) {
        let completion = completion_for(reaped);
        let record = &completion.record;
        tracing::info!(
            job = %record.key,
            pid = record.pid,
            outcome = %record.outcome,
            duration_secs = record.duration_secs(),
            "job finished"
        );
        self.pending.push_back(Pending {
            completion,
            attempts: 0,
            backoff: Backoff::new(RETRY_BASE),
            retry_at: None,
        });
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Write queued completions in order.
    ///
    /// Stops at the first connectivity error and returns it; everything not
    /// yet written stays queued. Entries the store rejected wait out their
    /// backoff. Once an entry runs out of attempts its claim is released and
    /// it leaves the queue.
    pub async fn flush(&mut self, store: &dyn JobStore, now: Instant) -> Result<(), StoreError> {
        let mut deferred = Vec::new();
        let result = loop {
            let Some(mut entry) = self.pending.pop_front() else {
                break Ok(());
            };
            if !entry.due(now) {
                deferred.push(entry);
                continue;
            }
            let key = entry.key();
            match store.record_completion(&entry.completion).await {
                Ok(CompletionStatus::Applied) => {}
                Ok(CompletionStatus::Orphaned) => {
                    tracing::warn!(job = %key, "job row disappeared while the job was running");
                }
                Err(e) if e.is_connectivity() => {
                    self.pending.push_front(entry);
                    break Err(e);
                }
                Err(e) => {
                    entry.attempts += 1;
                    if entry.attempts < MAX_ATTEMPTS {
                        let delay = entry.backoff.next_delay();
                        tracing::warn!(
                            job = %key,
                            error = %e,
                            retry_in_ms = delay.as_millis() as u64,
                            "cannot record job completion"
                        );
                        entry.retry_at = Some(now + delay);
                        deferred.push(entry);
                        continue;
                    }
                    tracing::error!(
                        job = %key,
                        attempts = entry.attempts,
                        error = %e,
                        "giving up on recording job completion"
                    );
                    if let Err(e) = give_up(store, &mut entry, now).await {
                        self.pending.push_front(entry);
                        break Err(e);
                    }
                    if entry.retry_at.is_some_and(|at| at > now) {
                        deferred.push(entry);
                    }
                }
            }
        };
        for entry in deferred.into_iter().rev() {
            self.pending.push_front(entry);
        }
        result
    }

    /// Give up on every queued completion, releasing the claims of their jobs.
    ///
    /// Returns the number of completions whose claim could not be released;
    /// those rows stay claimed until the next startup reconciles them.
    pub async fn abandon(&mut self, store: &dyn JobStore) -> usize {
        let keys: Vec<JobKey> = self.pending.drain(..).map(|entry| entry.key()).collect();
        if keys.is_empty() {
            return 0;
        }
        match store.release(&keys).await {
            Ok(()) => {
                tracing::error!(count = keys.len(), "job completions not recorded, claims released");
                0
            }
            Err(e) => {
                tracing::error!(count = keys.len(), error = %e, "job completions not recorded");
                keys.len()
            }
        }
    }
}

/// Release the claim of an entry that ran out of attempts.
///
/// A connectivity error is returned so the caller keeps the entry for the
/// next flush. Any other error schedules another release after the backoff.
async fn give_up(store: &dyn JobStore, entry: &mut Pending, now: Instant) -> Result<(), StoreError> {
    let key = entry.key();
    match store.release(&[key]).await {
        Ok(()) => {
            tracing::warn!(job = %key, "released the claim of an unrecorded job");
            entry.retry_at = None;
            Ok(())
        }
        Err(e) if e.is_connectivity() => Err(e),
        Err(e) => {
            let delay = entry.backoff.next_delay();
            tracing::error!(job = %key, error = %e, "cannot release the claim of an unrecorded job");
            entry.retry_at = Some(now + delay);
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "recorder_tests.rs"]
mod tests;
