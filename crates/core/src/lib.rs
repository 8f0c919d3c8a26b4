// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dj-core: domain types for the dbms_job scheduler

pub mod clock;
pub mod history;
pub mod job;
pub mod selection;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use history::{
    Completion, CompletionStatus, ExitReport, Outcome, RunHistoryRecord, StaleClaim,
    SQLSTATE_PREFIX,
};
pub use job::{JobDefinition, JobId, JobKey, JobPayload, JobSource, NextRun, Recurrence};
pub use selection::{due_order, take_due};
