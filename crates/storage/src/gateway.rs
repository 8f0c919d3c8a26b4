// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store gateway: the seam between the scheduler and the database.
//!
//! The scheduling loop owns one [`Gateway`] at a time. The [`JobStore`] half
//! runs queries and transactions; the [`NotificationSource`] half blocks on
//! LISTEN. A [`Connector`] builds a fresh gateway after a connection loss or
//! when a reload points the daemon at a different database.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dj_core::{Completion, CompletionStatus, JobDefinition, JobKey, StaleClaim};

use crate::error::StoreError;

/// Queries and transactions on the job-queue tables.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Clear every `running` marker left by a previous daemon and write one
    /// `CRASHED` history row per cleared marker, in one transaction.
    async fn reconcile_stale(&self) -> Result<Vec<StaleClaim>, StoreError>;

    /// Claim at most `limit` due jobs, oldest-due first.
    ///
    /// The read and the `running` write share one transaction; a job returned
    /// here is in flight until [`JobStore::record_completion`] or
    /// [`JobStore::release`] clears it.
    async fn claim_due(&self, limit: usize) -> Result<Vec<JobDefinition>, StoreError>;

    /// Clear the `running` marker of claimed jobs that were never dispatched.
    async fn release(&self, keys: &[JobKey]) -> Result<(), StoreError>;

    /// Write the history row and advance the job, in one transaction.
    async fn record_completion(
        &self,
        completion: &Completion,
    ) -> Result<CompletionStatus, StoreError>;

    /// Release the underlying connections.
    async fn close(&self) {}
}

/// Asynchronous notifications from the store.
#[async_trait]
pub trait NotificationSource: Send {
    /// Wait for the next notification.
    ///
    /// `Ok(None)` means the connection dropped and notifications may have been
    /// lost; the next call re-subscribes.
    async fn recv(&mut self) -> Result<Option<Notification>, StoreError>;
}

/// Opens gateways to a store.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ConnectTarget) -> Result<Gateway, StoreError>;
}

/// A connected store: query half plus notification half.
pub struct Gateway {
    pub store: Arc<dyn JobStore>,
    pub notifications: Box<dyn NotificationSource>,
}

/// Notification channels the scheduler listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// "Run this job now" submissions.
    Async,
    /// A scheduled job was created or changed.
    Scheduled,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Async, Channel::Scheduled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Async => "dbms_job_async_notify",
            Self::Scheduled => "dbms_job_scheduled_notify",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One NOTIFY received on a [`Channel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: Channel,
    /// Job identifier as sent by the notifier. Only logged.
    pub payload: String,
    /// Backend pid of the notifying session.
    pub pid: u32,
}

/// Where to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub passwd: String,
}

impl Default for ConnectTarget {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            database: String::new(),
            user: String::new(),
            passwd: String::new(),
        }
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("passwd", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = if self.host.is_empty() { "localhost" } else { &self.host };
        write!(f, "{}@{}:{}/{}", self.user, host, self.port, self.database)
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
