// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnect delays after connectivity errors.

use std::time::Duration;

/// Upper bound of the reconnect delay.
pub const MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential backoff starting at `base`, doubling per failure, capped at
/// [`MAX_DELAY`].
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(base: Duration) -> Self {
        Self { base, failures: 0 }
    }

    /// Register a failure and return how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.failures.min(16));
        self.failures = self.failures.saturating_add(1);
        self.base.saturating_mul(factor).min(MAX_DELAY)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn set_base(&mut self, base: Duration) {
        self.base = base;
    }
}
