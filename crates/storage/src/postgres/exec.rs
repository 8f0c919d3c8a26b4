// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child-side execution of one job body on a fresh connection.

use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use tracing::debug;

use dj_core::{JobKey, JobPayload};

use super::sql::{child_application_name, do_block, quote_ident};
use crate::error::ExecError;

/// Run `payload` for `key` in its own transaction.
///
/// Connection parameters come from the libpq environment set by the daemon.
/// The role and search path are switched for the transaction only. A failing
/// body rolls back everything it did.
pub async fn run_job(key: &JobKey, payload: &JobPayload) -> Result<(), ExecError> {
    let options = PgConnectOptions::new().application_name(&child_application_name(key));
    let mut conn = PgConnection::connect_with(&options).await.map_err(ExecError::Setup)?;
    let mut tx = conn.begin().await.map_err(ExecError::Setup)?;

    if let Some(role) = payload.log_user.as_deref().filter(|r| !r.is_empty()) {
        let set_role = format!("SET LOCAL ROLE {}", quote_ident(role));
        sqlx::raw_sql(&set_role).execute(&mut *tx).await.map_err(ExecError::Setup)?;
    }
    if let Some(schema) = payload.schema_user.as_deref().filter(|s| !s.is_empty()) {
        let set_path = format!("SET LOCAL search_path TO {}, public", quote_ident(schema));
        sqlx::raw_sql(&set_path).execute(&mut *tx).await.map_err(ExecError::Setup)?;
    }

    debug!(job = %key, "running job body");
    let body = do_block(key.id, &payload.what);
    if let Err(e) = sqlx::raw_sql(&body).execute(&mut *tx).await {
        let _ = tx.rollback().await;
        return Err(ExecError::Job(e));
    }
    tx.commit().await.map_err(ExecError::Job)?;
    // Committed; a failed goodbye does not change the outcome
    let _ = conn.close().await;
    Ok(())
}
