// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

/// Errors from the store gateway
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("another pg_dbms_job daemon is already attached to database {0}")]
    AnotherInstance(String),

    #[error("database {0} is in recovery mode, refusing to schedule jobs on a standby")]
    InRecovery(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Lost or unreachable connection: the caller should reconnect with backoff.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::Unavailable(_) => true,
            Self::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::Protocol(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            Self::AnotherInstance(_) | Self::InRecovery(_) => false,
        }
    }

    /// Errors that make running this daemon against the database pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AnotherInstance(_) | Self::InRecovery(_))
    }
}

/// Errors from running one job body in a child process
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("job setup failed: {0}")]
    Setup(#[source] sqlx::Error),

    #[error("job failed: {0}")]
    Job(#[source] sqlx::Error),
}

impl ExecError {
    /// Exit code the child reports to the daemon.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Job(_) => 1,
            Self::Setup(_) => 2,
        }
    }

    /// SQLSTATE of the statement that failed, when the server reported one.
    pub fn sqlstate(&self) -> Option<String> {
        let (Self::Setup(e) | Self::Job(e)) = self;
        e.as_database_error().and_then(|db| db.code()).map(|code| code.into_owned())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
