// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job definitions as the scheduler sees them.
//!
//! A job comes from one of two queue tables (see [`JobSource`]). The executable
//! payload is opaque: the scheduler only hands it to a child process. The
//! recurrence decides what happens to the row once an execution completes.

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::time::Duration;

/// Identifier of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Which queue table a job lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobSource {
    /// Recurring or deferred job with a `next_run` (`all_scheduled_jobs`).
    Scheduled,
    /// One-shot "run now" submission (`all_async_jobs`).
    Async,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Async => "async",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "scheduled" => Some(Self::Scheduled),
            "async" => Some(Self::Async),
            _ => None,
        }
    }
}

impl fmt::Display for JobSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique key of a job across both queue tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobKey {
    pub source: JobSource,
    pub id: JobId,
}

impl JobKey {
    pub fn scheduled(id: impl Into<JobId>) -> Self {
        Self { source: JobSource::Scheduled, id: id.into() }
    }

    pub fn asynchronous(id: impl Into<JobId>) -> Self {
        Self { source: JobSource::Async, id: id.into() }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// What a child process executes for a job.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobPayload {
    /// Body of the job (PL/pgSQL statements).
    pub what: String,
    /// Role to switch to before running the body.
    pub log_user: Option<String>,
    /// Schema to put on the `search_path` for the duration of the body.
    pub schema_user: Option<String>,
}

impl JobPayload {
    pub fn new(what: impl Into<String>) -> Self {
        Self { what: what.into(), log_user: None, schema_user: None }
    }
}

/// How a job is rescheduled after it completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    /// No further occurrence.
    Once,
    /// Fixed interval counted from the completion time.
    Every(Duration),
    /// Date expression evaluated by the store at completion time.
    Rule(String),
}

impl Recurrence {
    /// Interpret the `interval` column of a job row.
    ///
    /// A missing or blank interval means the job runs once. A bare interval
    /// literal (`30 seconds`, `1 hour 30 minutes`, `2 days`) is a fixed
    /// interval. Anything else is a date expression left to the store.
    pub fn parse(interval: Option<&str>) -> Self {
        let Some(text) = interval.map(str::trim).filter(|t| !t.is_empty()) else {
            return Self::Once;
        };
        match parse_interval_literal(text) {
            Some(every) => Self::Every(every),
            None => Self::Rule(text.to_string()),
        }
    }

    /// Next occurrence for an execution that completed at `completed_at`.
    ///
    /// The outcome of the execution never matters: a failed run waits for its
    /// next slot like a successful one.
    pub fn next_after(&self, completed_at: DateTime<Utc>) -> NextRun {
        match self {
            Self::Once => NextRun::Never,
            Self::Every(every) => match TimeDelta::from_std(*every)
                .ok()
                .and_then(|delta| completed_at.checked_add_signed(delta))
            {
                Some(at) => NextRun::At(at),
                None => NextRun::Never,
            },
            Self::Rule(expr) => NextRun::Rule(expr.clone()),
        }
    }
}

/// Result of applying a [`Recurrence`] to a completion time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextRun {
    At(DateTime<Utc>),
    Rule(String),
    Never,
}

/// Parse `<n> <unit> [<n> <unit> ...]` into a duration.
fn parse_interval_literal(text: &str) -> Option<Duration> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() % 2 != 0 {
        return None;
    }
    let mut total: u64 = 0;
    for pair in tokens.chunks(2) {
        let amount: u64 = pair[0].parse().ok()?;
        let unit = match pair[1].to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => 1,
            "m" | "min" | "mins" | "minute" | "minutes" => 60,
            "h" | "hour" | "hours" => 3_600,
            "d" | "day" | "days" => 86_400,
            "w" | "week" | "weeks" => 604_800,
            _ => return None,
        };
        total = total.checked_add(amount.checked_mul(unit)?)?;
    }
    (total > 0).then(|| Duration::from_secs(total))
}

/// A job claimed for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub key: JobKey,
    pub payload: JobPayload,
    pub recurrence: Recurrence,
    /// Time the job became due. Async submissions use their creation time.
    pub next_run: DateTime<Utc>,
}

impl JobDefinition {
    /// Job due at `next_run` that runs `what` once.
    pub fn once(key: JobKey, what: impl Into<String>, next_run: DateTime<Utc>) -> Self {
        Self { key, payload: JobPayload::new(what), recurrence: Recurrence::Once, next_run }
    }

    pub fn with_recurrence(mut self, recurrence: Recurrence) -> Self {
        self.recurrence = recurrence;
        self
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
