//! PostgreSQL implementation of `actionq_core::Store`.
//!
//! # Schema
//!
//! See `migrations/0001_init.sql` for the full DDL: an `actions` table
//! (status, priority, recurring spec, signature, timestamps) and an
//! `action_logs` table recording one row per completion or failure.
//!
//! ```sql
//! CREATE TABLE actions (
//!     id BIGSERIAL PRIMARY KEY,
//!     action TEXT NOT NULL,
//!     callback TEXT NOT NULL,
//!     payload JSONB NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'pending',
//!     priority SMALLINT NOT NULL DEFAULT 10,
//!     recurring TEXT,
//!     signature BIGINT NOT NULL,
//!     scheduled_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ
//! );
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use actionq_postgres::PgStore;
//! use sqlx::postgres::PgPoolOptions;
//!
//! let pool = PgPoolOptions::new().connect("postgres://localhost/mydb").await?;
//! let store = PgStore::new(pool);
//! ```

use std::collections::HashMap;

use actionq_core::error::StoreError;
use actionq_core::model::{CallbackKey, FailureInfo, Job, JobStatus, NewJob, RecurringSpec};
use actionq_core::store::Store;
use async_trait::async_trait;
use sqlx::{PgPool, Row};

/// Which row-locking clause the claim query appends (spec §4.1):
/// `SKIP LOCKED` lets concurrent workers each claim disjoint batches
/// without blocking on each other; `FOR UPDATE` is the fallback for a
/// backend with row locks but no `SKIP LOCKED`; `None` relies on the
/// surrounding transaction alone.
///
/// Only `ForUpdateSkipLocked` is wired to a live driver in this crate
/// (PostgreSQL ≥ 9.5, the only backend this workspace ships); the other
/// variants keep the fallback behavior reachable for a future non-Postgres
/// `Store` rather than documentation-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockDialect {
    ForUpdateSkipLocked,
    ForUpdate,
    None,
}

impl LockDialect {
    fn clause(&self) -> &'static str {
        match self {
            LockDialect::ForUpdateSkipLocked => "FOR UPDATE SKIP LOCKED",
            LockDialect::ForUpdate => "FOR UPDATE",
            LockDialect::None => "",
        }
    }
}

/// PostgreSQL-backed `Store`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    dialect: LockDialect,
}

impl PgStore {
    /// Assumes PostgreSQL ≥ 9.5 (`FOR UPDATE SKIP LOCKED` support).
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            dialect: LockDialect::ForUpdateSkipLocked,
        }
    }

    pub fn with_dialect(pool: PgPool, dialect: LockDialect) -> Self {
        Self { pool, dialect }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, StoreError> {
        let status_str: String = row.try_get("status").map_err(backend_err)?;
        let status = JobStatus::from_db_str(&status_str)
            .ok_or_else(|| StoreError::Backend(format!("unknown status {status_str:?}")))?;
        let callback_str: String = row.try_get("callback").map_err(backend_err)?;
        let recurring_str: Option<String> = row.try_get("recurring").map_err(backend_err)?;

        Ok(Job {
            id: row.try_get("id").map_err(backend_err)?,
            action: row.try_get("action").map_err(backend_err)?,
            callback: CallbackKey::from_wire_string(&callback_str),
            payload: row.try_get("payload").map_err(backend_err)?,
            status,
            priority: row.try_get("priority").map_err(backend_err)?,
            recurring: recurring_str.map(parse_recurring_column),
            signature: row.try_get("signature").map_err(backend_err)?,
            scheduled_at: row.try_get("scheduled_at").map_err(backend_err)?,
            created_at: row.try_get("created_at").map_err(backend_err)?,
            updated_at: row.try_get("updated_at").map_err(backend_err)?,
        })
    }
}

fn parse_recurring_column(s: String) -> RecurringSpec {
    match s.parse::<i64>() {
        Ok(secs) => RecurringSpec::Interval(secs),
        Err(_) => RecurringSpec::Offset(s),
    }
}

fn backend_err(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::ConnectionFailed(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_batch(&self, jobs: Vec<NewJob>) -> Result<usize, StoreError> {
        if jobs.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let mut inserted = 0usize;

        for job in jobs {
            let result = sqlx::query(
                r#"
                INSERT INTO actions (action, callback, payload, priority, recurring, signature, scheduled_at)
                SELECT $1, $2, $3, $4, $5, $6, $7
                WHERE NOT EXISTS (
                    SELECT 1 FROM actions
                    WHERE signature = $6
                      AND status IN ('pending', 'running')
                      AND created_at > NOW() - INTERVAL '300 seconds'
                )
                "#,
            )
            .bind(&job.action)
            .bind(job.callback.as_wire_string())
            .bind(&job.payload)
            .bind(job.priority)
            .bind(job.recurring.as_ref().map(|r| r.as_db_string()))
            .bind(job.signature)
            .bind(job.scheduled_at)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;

            if result.rows_affected() > 0 {
                inserted += 1;
            }
        }

        tx.commit().await.map_err(backend_err)?;
        Ok(inserted)
    }

    async fn claim_batch(&self, limit: u32) -> Result<Vec<Job>, StoreError> {
        let lock_clause = self.dialect.clause();
        let query = format!(
            r#"
            WITH claimable AS (
                SELECT id
                FROM actions
                WHERE status = 'pending' AND scheduled_at <= NOW()
                ORDER BY priority DESC, scheduled_at ASC
                LIMIT $1
                {lock_clause}
            )
            UPDATE actions
            SET status = 'running', updated_at = NOW()
            WHERE id IN (SELECT id FROM claimable)
            RETURNING id, action, callback, payload, status, priority, recurring, signature, scheduled_at, created_at, updated_at
            "#
        );

        let rows = sqlx::query(&query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn complete_batch(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        sqlx::query("UPDATE actions SET status = 'completed', updated_at = NOW() WHERE id = ANY($1)")
            .bind(ids)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;

        sqlx::query(
            r#"
            INSERT INTO action_logs (action_id, status, message, created_at)
            SELECT id, 'completed', 'Action completed successfully', NOW()
            FROM UNNEST($1::bigint[]) AS id
            "#,
        )
        .bind(ids)
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn fail_batch(&self, failures: HashMap<i64, FailureInfo>) -> Result<(), StoreError> {
        if failures.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        for (id, failure) in failures {
            sqlx::query("UPDATE actions SET status = 'failed', updated_at = NOW() WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(backend_err)?;

            sqlx::query(
                "INSERT INTO action_logs (action_id, status, message, created_at) VALUES ($1, 'failed', $2, NOW())",
            )
            .bind(id)
            .bind(failure.to_log_message())
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        }

        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn release_batch(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            "UPDATE actions SET status = 'pending', updated_at = NOW() WHERE id = ANY($1) AND status = 'running'",
        )
        .bind(ids)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(())
    }

    async fn retry_stale(&self, timeout_seconds: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE actions
            SET status = 'pending', updated_at = NOW()
            WHERE status = 'running'
              AND updated_at < NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(timeout_seconds as f64)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(result.rows_affected())
    }
}

/// Snapshot of queue depth by status, for diagnostics endpoints.
#[derive(Debug, Clone, Copy)]
pub struct QueueDepth {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
}

pub async fn queue_depth(pool: &PgPool) -> Result<QueueDepth, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE status = 'pending') AS pending,
            COUNT(*) FILTER (WHERE status = 'running') AS running,
            COUNT(*) FILTER (WHERE status = 'completed') AS completed,
            COUNT(*) FILTER (WHERE status = 'failed') AS failed
        FROM actions
        "#,
    )
    .fetch_one(pool)
    .await
    .map_err(backend_err)?;

    Ok(QueueDepth {
        pending: row.try_get("pending").map_err(backend_err)?,
        running: row.try_get("running").map_err(backend_err)?,
        completed: row.try_get("completed").map_err(backend_err)?,
        failed: row.try_get("failed").map_err(backend_err)?,
    })
}
