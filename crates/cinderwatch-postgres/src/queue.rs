//! Queue protocol: atomic batch claim, completion/failure marking with
//! retry bookkeeping, and stale-claim recovery.
//!
//! All statements use runtime-checked `sqlx::query`/`query_as` instead of
//! the `query!` compile-time macro — the `processing_queue` table is
//! created by migrations that do not exist at compile time in this
//! workspace.

use async_trait::async_trait;
use chrono::Duration;
use cinderwatch_core::ports::{self, PortError, QueueStore};
use sqlx::PgPool;

use crate::error::QueueError;

/// Thin wrapper over a `PgPool` bound to the target database. Kept
/// stateless beyond the pool so it can be freely cloned across workers.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stage 1's entry point. Duplicate enqueue is a no-op: the unique
    /// constraint on `(execution_id, stage)` absorbs a second NOTIFY for
    /// an execution that is already queued.
    pub async fn enqueue(
        &self,
        execution_id: i64,
        priority: i32,
        max_attempts: i32,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO processing_queue
                (execution_id, stage, status, priority, attempts, max_attempts, queued_at)
            VALUES ($1, 'stage2', 'pending', $2, 0, $3, now())
            ON CONFLICT (execution_id, stage) DO NOTHING
            "#,
        )
        .bind(execution_id)
        .bind(priority)
        .bind(max_attempts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Atomic pop of up to `size` claimable rows via a CTE `FOR UPDATE
    /// SKIP LOCKED` selection.
    ///
    /// Invariant: a row claimed here is never visible to a concurrent
    /// `claim_batch` call until it is returned to `pending` (by
    /// `mark_failed` or `recover_stale`).
    pub async fn claim_batch(
        &self,
        worker_id: &str,
        size: i64,
    ) -> Result<Vec<i64>, QueueError> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            r#"
            WITH claimable AS (
                SELECT execution_id
                FROM processing_queue
                WHERE stage = 'stage2'
                  AND status = 'pending'
                  AND attempts < max_attempts
                ORDER BY priority, queued_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE processing_queue q
            SET status = 'processing',
                claimed_by = $1,
                claimed_at = now(),
                attempts = attempts + 1
            FROM claimable c
            WHERE q.execution_id = c.execution_id
              AND q.stage = 'stage2'
            RETURNING q.execution_id
            "#,
        )
        .bind(worker_id)
        .bind(size)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Idempotent: calling twice for the same execution only ever leaves
    /// `status = completed`.
    pub async fn mark_completed(
        &self,
        execution_id: i64,
        processing_time_ms: i64,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            UPDATE processing_queue
            SET status = 'completed',
                processing_time_ms = $2,
                last_error = NULL
            WHERE execution_id = $1
              AND stage = 'stage2'
            "#,
        )
        .bind(execution_id)
        .bind(processing_time_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns the row to `pending` for re-claim while `attempts <
    /// max_attempts`; otherwise the row transitions permanently to
    /// `failed`. Never deletes — `last_error` is always recorded. Returns
    /// the row's current attempt count so the caller can report how many
    /// times this execution has been tried.
    pub async fn mark_failed(
        &self,
        execution_id: i64,
        error_message: &str,
    ) -> Result<i32, QueueError> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            UPDATE processing_queue
            SET status = CASE
                    WHEN attempts < max_attempts THEN 'pending'
                    ELSE 'failed'
                END,
                last_error = $2
            WHERE execution_id = $1
              AND stage = 'stage2'
            RETURNING attempts
            "#,
        )
        .bind(execution_id)
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(attempts,)| attempts).unwrap_or(0))
    }

    /// Returns rows stuck in `processing` past `threshold` to `pending`,
    /// preserving `attempts`. This is the canonical crash-recovery path —
    /// a worker that dies mid-batch leaves its claimed rows here until
    /// the next surviving worker's cleanup tick sweeps them.
    pub async fn recover_stale(&self, threshold: Duration) -> Result<i64, QueueError> {
        let threshold_secs = threshold.num_milliseconds() as f64 / 1000.0;
        let rows = sqlx::query(
            r#"
            UPDATE processing_queue
            SET status = 'pending',
                claimed_by = NULL,
                claimed_at = NULL
            WHERE stage = 'stage2'
              AND status = 'processing'
              AND claimed_at < now() - make_interval(secs => $1)
            "#,
        )
        .bind(threshold_secs)
        .execute(&self.pool)
        .await?;

        Ok(rows.rows_affected() as i64)
    }
}

#[cfg(test)]
mod tests {
    // `PgQueue` requires a live Postgres connection pool to exercise, so
    // claim-exclusivity, idempotency, and stale-recovery properties are
    // covered instead by the `FakeQueue` double in
    // `cinderwatch-worker`'s worker-loop tests, which exercises the same
    // `QueueStore` trait without a database.
}

#[async_trait]
impl QueueStore for PgQueue {
    async fn enqueue(&self, execution_id: i64, priority: i32, max_attempts: i32) -> ports::Result<()> {
        self.enqueue(execution_id, priority, max_attempts)
            .await
            .map_err(to_port_error)
    }

    async fn claim_batch(&self, worker_id: &str, size: i64) -> ports::Result<Vec<i64>> {
        self.claim_batch(worker_id, size).await.map_err(to_port_error)
    }

    async fn mark_completed(&self, execution_id: i64, processing_time_ms: i64) -> ports::Result<()> {
        self.mark_completed(execution_id, processing_time_ms)
            .await
            .map_err(to_port_error)
    }

    async fn mark_failed(&self, execution_id: i64, error_message: &str) -> ports::Result<i32> {
        self.mark_failed(execution_id, error_message)
            .await
            .map_err(to_port_error)
    }

    async fn recover_stale(&self, threshold: Duration) -> ports::Result<i64> {
        self.recover_stale(threshold).await.map_err(to_port_error)
    }
}

fn to_port_error(e: QueueError) -> PortError {
    PortError(e.to_string())
}
