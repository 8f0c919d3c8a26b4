// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Execution outcomes and run-history rows.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::job::{JobKey, NextRun};

/// Prefix of the stderr line on which a failed child reports the SQLSTATE of
/// its job body, as in `sqlstate=22012, division by zero`.
pub const SQLSTATE_PREFIX: &str = "sqlstate=";

/// How a job execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    /// The child exited with a non-zero code.
    Failure,
    /// The child was terminated by a signal.
    Crashed,
}

impl Outcome {
    /// Status stored in the history table.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success => "SUCCEEDED",
            Self::Failure => "FAILED",
            Self::Crashed => "CRASHED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Crashed => "crashed",
        })
    }
}

/// Exit status of a child process, reduced to what history needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitReport {
    pub fn code(code: i32) -> Self {
        Self { code: Some(code), signal: None }
    }

    pub fn signal(signal: i32) -> Self {
        Self { code: None, signal: Some(signal) }
    }

    /// A signal death is a process-level fault, not a job failure.
    pub fn outcome(&self) -> Outcome {
        match (self.code, self.signal) {
            (_, Some(_)) => Outcome::Crashed,
            (Some(0), None) => Outcome::Success,
            (Some(_), None) => Outcome::Failure,
            (None, None) => Outcome::Crashed,
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (_, Some(sig)) => write!(f, "terminated by signal {sig}"),
            (Some(code), None) => write!(f, "exit code {code}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// One execution of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHistoryRecord {
    pub key: JobKey,
    /// Role the job ran as, if any.
    pub owner: Option<String>,
    /// When the execution was due.
    pub due_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: Outcome,
    /// Child exit code; `None` on success or signal death.
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub output: String,
}

impl RunHistoryRecord {
    /// Whole seconds between start and end, never negative.
    pub fn duration_secs(&self) -> i64 {
        (self.ended_at - self.started_at).num_seconds().max(0)
    }

    /// SQLSTATE reported by the child, taken from its last `sqlstate=` line.
    pub fn sqlstate(&self) -> Option<&str> {
        self.output.lines().rev().find_map(|line| {
            let rest = line.trim_start().strip_prefix(SQLSTATE_PREFIX)?;
            let code = rest.split(',').next()?.trim();
            (code.len() == 5 && code.chars().all(|c| c.is_ascii_alphanumeric())).then_some(code)
        })
    }

    /// Value of the history `error` column: a numeric SQLSTATE when the
    /// child reported one, otherwise the exit code.
    pub fn error_code(&self) -> Option<i64> {
        self.sqlstate()
            .and_then(|code| code.parse::<i64>().ok())
            .or(self.exit_code.map(i64::from))
    }

    /// Do the two executions overlap in time?
    pub fn overlaps(&self, other: &RunHistoryRecord) -> bool {
        self.started_at < other.ended_at && other.started_at < self.ended_at
    }
}

/// Everything the store needs to finish an execution in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub record: RunHistoryRecord,
    pub next_run: NextRun,
}

/// What the store found while applying a [`Completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// Job row updated (rescheduled, disabled, or dequeued).
    Applied,
    /// Job row no longer exists; only the history row was written.
    Orphaned,
}

/// A `running` marker cleared at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleClaim {
    pub key: JobKey,
    /// When the marker was set, if the store knows.
    pub claimed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[path = "history_tests.rs"]
mod tests;
