//! Trigger-stage ingest. Deliberately trivial: write the
//! `Execution` skeleton, enqueue Stage-2 work, and stop — all the richer
//! extraction happens later, off this hot path.

use chrono::{DateTime, Utc};
use cinderwatch_core::ports::QueueStore;
use cinderwatch_postgres::writer;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::error::WorkerError;

/// Raw payload carried by a `sai_execution_ready` NOTIFY. The source
/// engine's trigger payload does not include `mode` — `ingest_from_notification`
/// looks that up separately from `execution_entity` before building the
/// full [`ExecutionReadyPayload`].
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionReadyNotification {
    pub execution_id: i64,
    pub workflow_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
}

/// The full set of fields `ingest` needs to write the `Execution`
/// skeleton, including the source execution's actual `mode`
/// (`trigger`/`manual`/`retry`/`webhook`/…).
#[derive(Debug, Clone)]
pub struct ExecutionReadyPayload {
    pub execution_id: i64,
    pub workflow_id: String,
    pub status: String,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub processing_time_ms: Option<i64>,
}

/// Normal Stage-2 enqueue priority; stale recovery and manual replays
/// may choose a different priority but Stage 1 always uses this one.
const DEFAULT_PRIORITY: i32 = 100;

/// Mirrors an execution into the analytics schema as a skeleton row and
/// enqueues Stage-2 work for it. Idempotent: a second call for the same
/// id is a no-op at both steps (`ON CONFLICT DO NOTHING`).
pub async fn ingest(
    target_pool: &PgPool,
    queue: &dyn QueueStore,
    max_attempts: i32,
    payload: &ExecutionReadyPayload,
) -> Result<(), WorkerError> {
    writer::insert_execution_skeleton(
        target_pool,
        payload.execution_id,
        &payload.workflow_id,
        payload.started_at,
        payload.stopped_at,
        payload.processing_time_ms,
        &payload.status,
        &payload.mode,
    )
    .await?;

    queue
        .enqueue(payload.execution_id, DEFAULT_PRIORITY, max_attempts)
        .await?;

    debug!(execution_id = payload.execution_id, "stage1 ingested");
    Ok(())
}

/// Handles a `sai_execution_ready` NOTIFY: since that payload omits
/// `mode`, looks the source execution back up by id to fill it in before
/// ingesting. Returns `Ok(false)` (not an error) if the source row is
/// gone by the time we look — the polling fallback in
/// [`ingest_unmirrored`] will pick the execution up on its next tick.
pub async fn ingest_from_notification(
    source_pool: &PgPool,
    target_pool: &PgPool,
    queue: &dyn QueueStore,
    max_attempts: i32,
    notification: &ExecutionReadyNotification,
) -> Result<bool, WorkerError> {
    let source =
        cinderwatch_postgres::source::fetch_source_execution(source_pool, notification.execution_id)
            .await?;
    let Some(source) = source else {
        return Ok(false);
    };

    let payload = ExecutionReadyPayload {
        execution_id: notification.execution_id,
        workflow_id: notification.workflow_id.clone(),
        status: notification.status.clone(),
        mode: source.mode,
        started_at: notification.started_at,
        stopped_at: notification.stopped_at,
        processing_time_ms: notification.processing_time_ms,
    };
    ingest(target_pool, queue, max_attempts, &payload).await?;
    Ok(true)
}

/// Polling fallback: scans for source executions not yet mirrored and
/// ingests each one. Used when the `sai_execution_ready` NOTIFY channel
/// is missed (e.g. a listener reconnect window).
pub async fn ingest_unmirrored(
    source_pool: &PgPool,
    target_pool: &PgPool,
    queue: &dyn QueueStore,
    max_attempts: i32,
    limit: i64,
) -> Result<i64, WorkerError> {
    let candidates =
        cinderwatch_postgres::source::fetch_unmirrored_executions(source_pool, target_pool, limit)
            .await?;

    let mut ingested = 0i64;
    for candidate in &candidates {
        let payload = ExecutionReadyPayload {
            execution_id: candidate.id,
            workflow_id: candidate.workflow_id.clone(),
            status: candidate.status.clone(),
            mode: candidate.mode.clone(),
            started_at: candidate.started_at,
            stopped_at: candidate.stopped_at,
            processing_time_ms: None,
        };
        if let Err(e) = ingest(target_pool, queue, max_attempts, &payload).await {
            warn!(execution_id = candidate.id, error = %e, "stage1 poll ingest failed");
            continue;
        }
        ingested += 1;
    }

    Ok(ingested)
}
