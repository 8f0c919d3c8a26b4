// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.
//!
//! The daemon hands each job to its child through these variables; the
//! connection itself travels in the standard libpq variables.

use std::path::PathBuf;

use dj_core::{JobId, JobKey, JobPayload, JobSource};
use dj_storage::ConnectTarget;
use thiserror::Error;

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pg_dbms_job/pg_dbms_job.conf";

pub const JOB_ID: &str = "PG_DBMS_JOB_ID";
pub const JOB_SOURCE: &str = "PG_DBMS_JOB_SOURCE";
pub const JOB_WHAT: &str = "PG_DBMS_JOB_WHAT";
pub const JOB_LOG_USER: &str = "PG_DBMS_JOB_LOG_USER";
pub const JOB_SCHEMA_USER: &str = "PG_DBMS_JOB_SCHEMA_USER";

/// Configuration file: PG_DBMS_JOB_CONFIG > built-in default
pub fn config_path() -> PathBuf {
    std::env::var("PG_DBMS_JOB_CONFIG")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Variables describing `key` and `payload` for the child process.
pub fn job_vars(key: &JobKey, payload: &JobPayload) -> Vec<(&'static str, String)> {
    let mut vars = vec![
        (JOB_ID, key.id.to_string()),
        (JOB_SOURCE, key.source.as_str().to_string()),
        (JOB_WHAT, payload.what.clone()),
    ];
    if let Some(user) = &payload.log_user {
        vars.push((JOB_LOG_USER, user.clone()));
    }
    if let Some(schema) = &payload.schema_user {
        vars.push((JOB_SCHEMA_USER, schema.clone()));
    }
    vars
}

/// libpq variables pointing a child at `target`. Empty fields are left to the
/// inherited environment.
pub fn libpq_vars(target: &ConnectTarget) -> Vec<(&'static str, String)> {
    let mut vars = vec![("PGPORT", target.port.to_string())];
    for (name, value) in [
        ("PGHOST", &target.host),
        ("PGDATABASE", &target.database),
        ("PGUSER", &target.user),
        ("PGPASSWORD", &target.passwd),
    ] {
        if !value.is_empty() {
            vars.push((name, value.clone()));
        }
    }
    vars
}

/// Errors reading the job handed to a child
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobEnvError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid job id: {0}")]
    InvalidId(String),

    #[error("invalid job source: {0}")]
    InvalidSource(String),
}

/// Read the job handed over by [`job_vars`].
pub fn job_from_env() -> Result<(JobKey, JobPayload), JobEnvError> {
    job_from_lookup(|name| std::env::var(name).ok())
}

pub(crate) fn job_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(JobKey, JobPayload), JobEnvError> {
    let id = lookup(JOB_ID).ok_or(JobEnvError::Missing(JOB_ID))?;
    let id: i64 = id.parse().map_err(|_| JobEnvError::InvalidId(id))?;
    let source = lookup(JOB_SOURCE).ok_or(JobEnvError::Missing(JOB_SOURCE))?;
    let source = JobSource::parse(&source).ok_or(JobEnvError::InvalidSource(source))?;
    let what = lookup(JOB_WHAT).ok_or(JobEnvError::Missing(JOB_WHAT))?;

    let payload = JobPayload {
        what,
        log_user: lookup(JOB_LOG_USER).filter(|s| !s.is_empty()),
        schema_user: lookup(JOB_SCHEMA_USER).filter(|s| !s.is_empty()),
    };
    Ok((JobKey { source, id: JobId(id) }, payload))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
