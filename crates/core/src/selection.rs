// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Due-job ordering shared by every store implementation.

use std::cmp::Ordering;

use crate::job::JobDefinition;

/// Oldest-due first; equal due times fall back to the job identifier, then the
/// source, so a batch is always the same for the same rows.
pub fn due_order(a: &JobDefinition, b: &JobDefinition) -> Ordering {
    a.next_run
        .cmp(&b.next_run)
        .then_with(|| a.key.id.cmp(&b.key.id))
        .then_with(|| a.key.source.cmp(&b.key.source))
}

/// Sort candidates from any number of sources and keep the first `limit`.
pub fn take_due(mut candidates: Vec<JobDefinition>, limit: usize) -> Vec<JobDefinition> {
    candidates.sort_by(due_order);
    candidates.truncate(limit);
    candidates
}

#[cfg(test)]
#[path = "selection_tests.rs"]
mod tests;
