// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child side of a dispatched job.

use dj_core::SQLSTATE_PREFIX;
use dj_storage::postgres::run_job;

use crate::env;

/// Exit code for a child started without a usable job environment.
pub const EXIT_BAD_ENVIRONMENT: i32 = 2;

/// Run the job described by the environment and return the process exit
/// code: 0 on success, 1 when the job body failed, 2 when it never ran.
pub async fn exec_job_from_env() -> i32 {
    let (key, payload) = match env::job_from_env() {
        Ok(job) => job,
        Err(e) => {
            eprintln!("pg_dbms_job exec-job: {e}");
            return EXIT_BAD_ENVIRONMENT;
        }
    };
    match run_job(&key, &payload).await {
        Ok(()) => 0,
        Err(e) => {
            // stderr is captured into the job's history row
            match e.sqlstate() {
                Some(code) => eprintln!("{SQLSTATE_PREFIX}{code}, {e}"),
                None => eprintln!("{e}"),
            }
            e.exit_code()
        }
    }
}
