//! Child entry point specs
//!
//! `exec-job` exits 2 whenever the job body never ran.

use crate::prelude::*;

#[test]
fn missing_job_environment() {
    cli().args(&["exec-job"]).exits(2).stderr_has("PG_DBMS_JOB_ID is not set");
}

#[test]
fn invalid_job_id() {
    cli()
        .args(&["exec-job"])
        .env("PG_DBMS_JOB_ID", "seven")
        .env("PG_DBMS_JOB_SOURCE", "scheduled")
        .env("PG_DBMS_JOB_WHAT", "NULL;")
        .exits(2)
        .stderr_has("invalid job id");
}

#[test]
fn unreachable_database_is_a_setup_failure() {
    let install = Install::new();
    cli()
        .args(&["exec-job"])
        .env("PG_DBMS_JOB_ID", "7")
        .env("PG_DBMS_JOB_SOURCE", "scheduled")
        .env("PG_DBMS_JOB_WHAT", "NULL;")
        .env("PGHOST", install.socket_dir())
        .env("PGPORT", "5432")
        .exits(2);
}
