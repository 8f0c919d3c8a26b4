// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use chrono::{DateTime, Utc};

use crate::job::{JobDefinition, JobKey};

/// Wall-clock time `secs` seconds after the epoch.
pub fn utc(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// One-shot job due at `secs`.
pub fn job_due_at(key: JobKey, secs: i64) -> JobDefinition {
    JobDefinition::once(key, "NULL;", utc(secs))
}

// ── Proptest strategies ─────────────────────────────────────────────────

/// Proptest strategies for job types.
pub mod strategies {
    use crate::job::{JobDefinition, JobKey, JobSource};
    use proptest::prelude::*;

    pub fn arb_source() -> impl Strategy<Value = JobSource> {
        prop_oneof![Just(JobSource::Scheduled), Just(JobSource::Async)]
    }

    pub fn arb_job_definition() -> impl Strategy<Value = JobDefinition> {
        (arb_source(), 1i64..50, 0i64..20).prop_map(|(source, id, due)| {
            super::job_due_at(JobKey { source, id: id.into() }, due * 60)
        })
    }
}
