// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQL text for the `dbms_job` schema.

use dj_core::{JobId, JobKey};

/// `application_name` of the scheduler's own session, used by the
/// single-instance check.
pub const MAIN_APPLICATION_NAME: &str = "pg_dbms_job:main";

/// `application_name` of the listener session.
pub const LISTENER_APPLICATION_NAME: &str = "pg_dbms_job:listener";

/// Dollar-quote tag wrapping job bodies.
const BODY_TAG: &str = "$pg_dbms_job$";

pub(crate) const CLAIM_SCHEDULED: &str = r#"
    SELECT job, what, log_user, schema_user, "interval", next_date
    FROM dbms_job.all_scheduled_jobs
    WHERE NOT broken AND this_date IS NULL AND next_date <= current_timestamp
    ORDER BY next_date, job
    LIMIT $1
    FOR UPDATE SKIP LOCKED
"#;

pub(crate) const CLAIM_ASYNC: &str = r#"
    SELECT job, what, log_user, schema_user, create_date
    FROM dbms_job.all_async_jobs
    WHERE this_date IS NULL
    ORDER BY create_date, job
    LIMIT $1
    FOR UPDATE SKIP LOCKED
"#;

pub(crate) const MARK_SCHEDULED_RUNNING: &str =
    "UPDATE dbms_job.all_scheduled_jobs SET this_date = current_timestamp WHERE job = ANY($1)";

pub(crate) const MARK_ASYNC_RUNNING: &str =
    "UPDATE dbms_job.all_async_jobs SET this_date = current_timestamp WHERE job = ANY($1)";

pub(crate) const RELEASE_SCHEDULED: &str =
    "UPDATE dbms_job.all_scheduled_jobs SET this_date = NULL WHERE job = ANY($1)";

pub(crate) const RELEASE_ASYNC: &str =
    "UPDATE dbms_job.all_async_jobs SET this_date = NULL WHERE job = ANY($1)";

pub(crate) const RECONCILE_SCHEDULED: &str = r#"
    UPDATE dbms_job.all_scheduled_jobs
    SET this_date = NULL, failures = coalesce(failures, 0) + 1
    WHERE this_date IS NOT NULL
    RETURNING job, log_user, next_date AS due_at, this_date AS claimed_at
"#;

pub(crate) const RECONCILE_ASYNC: &str = r#"
    UPDATE dbms_job.all_async_jobs
    SET this_date = NULL
    WHERE this_date IS NOT NULL
    RETURNING job, log_user, create_date AS due_at, this_date AS claimed_at
"#;

pub(crate) const INSERT_HISTORY: &str = r#"
    INSERT INTO dbms_job.all_scheduler_job_run_details
        (owner, job_name, job_subname, status, error, req_start_date,
         actual_start_date, run_duration, slave_pid, additional_info)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
"#;

/// Scheduled job completed with a known next date.
pub(crate) const RESCHEDULE: &str = r#"
    UPDATE dbms_job.all_scheduled_jobs
    SET this_date = NULL,
        next_date = $2,
        last_date = $3,
        total_time = coalesce(total_time, '0'::interval) + make_interval(secs => $4),
        instance = coalesce(instance, 0) + 1,
        failures = CASE WHEN $5 THEN 0 ELSE coalesce(failures, 0) + 1 END
    WHERE job = $1
"#;

/// Scheduled job completed with no further occurrence.
pub(crate) const DISABLE: &str = r#"
    UPDATE dbms_job.all_scheduled_jobs
    SET this_date = NULL,
        broken = true,
        last_date = $2,
        total_time = coalesce(total_time, '0'::interval) + make_interval(secs => $3),
        instance = coalesce(instance, 0) + 1,
        failures = CASE WHEN $4 THEN 0 ELSE coalesce(failures, 0) + 1 END
    WHERE job = $1
"#;

pub(crate) const DEQUEUE_ASYNC: &str = "DELETE FROM dbms_job.all_async_jobs WHERE job = $1";

pub(crate) const IN_RECOVERY: &str = "SELECT pg_is_in_recovery()";

pub(crate) const COUNT_INSTANCES: &str = r#"
    SELECT count(*)
    FROM pg_stat_activity
    WHERE application_name = $1 AND datname = current_database()
"#;

/// Query evaluating a date expression taken from the `interval` column.
pub(crate) fn evaluate_rule(expr: &str) -> String {
    format!("SELECT CAST(({expr}) AS timestamptz)")
}

/// Quote an SQL identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Wrap a job body in the anonymous block executed by the child.
///
/// The block exposes `job`, `next_date` and `broken` to the body.
pub fn do_block(job: JobId, what: &str) -> String {
    format!(
        "DO {BODY_TAG}\nDECLARE\n    job bigint := {job};\n    next_date timestamptz := current_timestamp;\n    broken boolean := false;\nBEGIN\n    {what}\nEND;\n{BODY_TAG};"
    )
}

/// `application_name` of a child session running `key`.
pub fn child_application_name(key: &JobKey) -> String {
    format!("pg_dbms_job:{}:{}", key.source, key.id)
}

#[cfg(test)]
#[path = "sql_tests.rs"]
mod tests;
