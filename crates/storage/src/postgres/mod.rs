// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PostgreSQL store gateway.

mod exec;
mod sql;

pub use exec::run_job;
pub use sql::{
    child_application_name, do_block, quote_ident, LISTENER_APPLICATION_NAME,
    MAIN_APPLICATION_NAME,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgListener, PgPool, PgPoolOptions};
use sqlx::{Connection, PgConnection, Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, info, warn};

use dj_core::{
    take_due, Completion, CompletionStatus, JobDefinition, JobId, JobKey, JobPayload, JobSource,
    NextRun, Outcome, Recurrence, RunHistoryRecord, StaleClaim,
};

use crate::error::StoreError;
use crate::gateway::{
    Channel, ConnectTarget, Connector, Gateway, JobStore, Notification, NotificationSource,
};

/// Synthetic output stored for markers cleared at startup.
const STALE_OUTPUT: &str = "daemon stopped before the job completed";

/// Opens PostgreSQL gateways.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Gateway, StoreError> {
        let store = PgStore::connect(target).await?;

        let listener_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy_with(connect_options(target).application_name(LISTENER_APPLICATION_NAME));
        let mut listener = PgListener::connect_with(&listener_pool)
            .await
            .map_err(|source| StoreError::Connect { target: target.to_string(), source })?;
        let channels: Vec<&str> = Channel::ALL.iter().map(Channel::as_str).collect();
        listener.listen_all(channels.iter().copied()).await?;
        debug!(channels = ?channels, "listening for notifications");

        Ok(Gateway {
            store: Arc::new(store),
            notifications: Box::new(PgNotifications { listener }),
        })
    }
}

/// Connection options for `target`. Empty fields fall back to the libpq
/// environment (`PGHOST`, `PGUSER`, ...).
pub fn connect_options(target: &ConnectTarget) -> PgConnectOptions {
    let mut options = PgConnectOptions::new().port(target.port);
    if !target.host.is_empty() {
        options = options.host(&target.host);
    }
    if !target.database.is_empty() {
        options = options.database(&target.database);
    }
    if !target.user.is_empty() {
        options = options.username(&target.user);
    }
    if !target.passwd.is_empty() {
        options = options.password(&target.passwd);
    }
    options
}

/// Job store backed by a single-connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect, refuse standbys, and refuse a second daemon on the same
    /// database.
    pub async fn connect(target: &ConnectTarget) -> Result<Self, StoreError> {
        let options = connect_options(target).application_name(MAIN_APPLICATION_NAME);
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Connect { target: target.to_string(), source })?;

        let in_recovery: bool = sqlx::query_scalar(sql::IN_RECOVERY).fetch_one(&pool).await?;
        if in_recovery {
            pool.close().await;
            return Err(StoreError::InRecovery(target.database.clone()));
        }

        let sessions: i64 = sqlx::query_scalar(sql::COUNT_INSTANCES)
            .bind(MAIN_APPLICATION_NAME)
            .fetch_one(&pool)
            .await?;
        if sessions > 1 {
            pool.close().await;
            return Err(StoreError::AnotherInstance(target.database.clone()));
        }

        info!(database = %target, "connected to database");
        Ok(Self { pool })
    }

    async fn claim_table(
        tx: &mut Transaction<'_, Postgres>,
        source: JobSource,
        limit: i64,
    ) -> Result<Vec<JobDefinition>, sqlx::Error> {
        let jobs = match source {
            JobSource::Scheduled => sqlx::query_as::<_, ScheduledRow>(sql::CLAIM_SCHEDULED)
                .bind(limit)
                .fetch_all(&mut **tx)
                .await?
                .into_iter()
                .map(ScheduledRow::into_definition)
                .collect(),
            JobSource::Async => sqlx::query_as::<_, AsyncRow>(sql::CLAIM_ASYNC)
                .bind(limit)
                .fetch_all(&mut **tx)
                .await?
                .into_iter()
                .map(AsyncRow::into_definition)
                .collect(),
        };
        Ok(jobs)
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn reconcile_stale(&self) -> Result<Vec<StaleClaim>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut cleared = Vec::new();

        for (source, query) in
            [(JobSource::Scheduled, sql::RECONCILE_SCHEDULED), (JobSource::Async, sql::RECONCILE_ASYNC)]
        {
            let rows: Vec<StaleRow> = sqlx::query_as(query).fetch_all(&mut *tx).await?;
            for row in rows {
                let key = JobKey { source, id: JobId(row.job) };
                let record = RunHistoryRecord {
                    key,
                    owner: row.log_user,
                    due_at: row.due_at.unwrap_or(now),
                    started_at: row.claimed_at.unwrap_or(now),
                    ended_at: now,
                    outcome: Outcome::Crashed,
                    exit_code: None,
                    pid: None,
                    output: STALE_OUTPUT.to_string(),
                };
                insert_history(&mut tx, &record).await?;
                cleared.push(StaleClaim { key, claimed_at: row.claimed_at });
            }
        }

        tx.commit().await?;
        Ok(cleared)
    }

    async fn claim_due(&self, limit: usize) -> Result<Vec<JobDefinition>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql_limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut tx = self.pool.begin().await?;
        let mut candidates = Self::claim_table(&mut tx, JobSource::Async, sql_limit).await?;
        candidates.extend(Self::claim_table(&mut tx, JobSource::Scheduled, sql_limit).await?);
        let batch = take_due(candidates, limit);

        let (scheduled, asynchronous) = split_ids(batch.iter().map(|job| &job.key));
        if !scheduled.is_empty() {
            sqlx::query(sql::MARK_SCHEDULED_RUNNING).bind(scheduled.as_slice()).execute(&mut *tx).await?;
        }
        if !asynchronous.is_empty() {
            sqlx::query(sql::MARK_ASYNC_RUNNING).bind(asynchronous.as_slice()).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        Ok(batch)
    }

    async fn release(&self, keys: &[JobKey]) -> Result<(), StoreError> {
        let (scheduled, asynchronous) = split_ids(keys.iter());
        let mut tx = self.pool.begin().await?;
        if !scheduled.is_empty() {
            sqlx::query(sql::RELEASE_SCHEDULED).bind(scheduled.as_slice()).execute(&mut *tx).await?;
        }
        if !asynchronous.is_empty() {
            sqlx::query(sql::RELEASE_ASYNC).bind(asynchronous.as_slice()).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_completion(
        &self,
        completion: &Completion,
    ) -> Result<CompletionStatus, StoreError> {
        let record = &completion.record;
        let mut tx = self.pool.begin().await?;
        insert_history(&mut tx, record).await?;

        let id = record.key.id.0;
        let duration = record.duration_secs() as f64;
        let success = record.outcome.is_success();

        let affected = match record.key.source {
            JobSource::Async => {
                sqlx::query(sql::DEQUEUE_ASYNC).bind(id).execute(&mut *tx).await?.rows_affected()
            }
            JobSource::Scheduled => {
                let next_date = match &completion.next_run {
                    NextRun::At(at) => Some(*at),
                    NextRun::Never => None,
                    NextRun::Rule(expr) => evaluate_rule(&mut tx, &record.key, expr).await?,
                };
                match next_date {
                    Some(next_date) => sqlx::query(sql::RESCHEDULE)
                        .bind(id)
                        .bind(next_date)
                        .bind(record.started_at)
                        .bind(duration)
                        .bind(success)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected(),
                    None => sqlx::query(sql::DISABLE)
                        .bind(id)
                        .bind(record.started_at)
                        .bind(duration)
                        .bind(success)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected(),
                }
            }
        };

        tx.commit().await?;
        if affected == 0 {
            warn!(job = %record.key, "job row vanished while running, history kept");
            Ok(CompletionStatus::Orphaned)
        } else {
            Ok(CompletionStatus::Applied)
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Evaluate a date expression in a savepoint so a broken expression does not
/// abort the completion transaction. `None` disables the job.
async fn evaluate_rule(
    tx: &mut Transaction<'_, Postgres>,
    key: &JobKey,
    expr: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let query = sql::evaluate_rule(expr);
    let conn: &mut PgConnection = &mut **tx;
    let mut savepoint = conn.begin().await?;
    match sqlx::query_scalar::<_, Option<DateTime<Utc>>>(&query).fetch_one(&mut *savepoint).await {
        Ok(next) => {
            savepoint.commit().await?;
            if next.is_none() {
                info!(job = %key, interval = expr, "interval returned no date, disabling job");
            }
            Ok(next)
        }
        Err(e) => {
            savepoint.rollback().await?;
            warn!(job = %key, interval = expr, error = %e, "invalid interval, disabling job");
            Ok(None)
        }
    }
}

async fn insert_history(
    tx: &mut Transaction<'_, Postgres>,
    record: &RunHistoryRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(sql::INSERT_HISTORY)
        .bind(record.owner.as_deref())
        .bind(record.key.id.to_string())
        .bind(record.key.source.as_str())
        .bind(record.outcome.status())
        .bind(record.error_code())
        .bind(record.due_at)
        .bind(record.started_at)
        .bind(record.duration_secs())
        .bind(record.pid.and_then(|pid| i32::try_from(pid).ok()))
        .bind(&record.output)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn split_ids<'a>(keys: impl Iterator<Item = &'a JobKey>) -> (Vec<i64>, Vec<i64>) {
    let mut scheduled = Vec::new();
    let mut asynchronous = Vec::new();
    for key in keys {
        match key.source {
            JobSource::Scheduled => scheduled.push(key.id.0),
            JobSource::Async => asynchronous.push(key.id.0),
        }
    }
    (scheduled, asynchronous)
}

#[derive(sqlx::FromRow)]
struct ScheduledRow {
    job: i64,
    what: String,
    log_user: Option<String>,
    schema_user: Option<String>,
    interval: Option<String>,
    next_date: DateTime<Utc>,
}

impl ScheduledRow {
    fn into_definition(self) -> JobDefinition {
        JobDefinition {
            key: JobKey::scheduled(self.job),
            payload: JobPayload {
                what: self.what,
                log_user: self.log_user,
                schema_user: self.schema_user,
            },
            recurrence: Recurrence::parse(self.interval.as_deref()),
            next_run: self.next_date,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AsyncRow {
    job: i64,
    what: String,
    log_user: Option<String>,
    schema_user: Option<String>,
    create_date: DateTime<Utc>,
}

impl AsyncRow {
    fn into_definition(self) -> JobDefinition {
        JobDefinition {
            key: JobKey::asynchronous(self.job),
            payload: JobPayload {
                what: self.what,
                log_user: self.log_user,
                schema_user: self.schema_user,
            },
            recurrence: Recurrence::Once,
            next_run: self.create_date,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StaleRow {
    job: i64,
    log_user: Option<String>,
    due_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
}

/// LISTEN half of the PostgreSQL gateway.
pub struct PgNotifications {
    listener: PgListener,
}

#[async_trait]
impl NotificationSource for PgNotifications {
    async fn recv(&mut self) -> Result<Option<Notification>, StoreError> {
        loop {
            let Some(received) = self.listener.try_recv().await? else {
                return Ok(None);
            };
            match Channel::parse(received.channel()) {
                Some(channel) => {
                    return Ok(Some(Notification {
                        channel,
                        payload: received.payload().to_string(),
                        pid: received.process_id(),
                    }))
                }
                None => debug!(channel = received.channel(), "ignoring unexpected channel"),
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
