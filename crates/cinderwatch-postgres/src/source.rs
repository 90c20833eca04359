//! Read-only adapters over the source engine's tables. These are the
//! only place the core touches `execution_entity` / `execution_data` —
//! everything downstream works with fully resolved `serde_json::Value`
//! trees, never raw rows.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::error::QueueError;

/// Row from the source engine's `execution_entity` table — the skeleton
/// Stage 1 needs to create an `Execution` row.
#[derive(Debug, Clone, FromRow)]
pub struct SourceExecution {
    pub id: i64,
    #[sqlx(rename = "workflowId")]
    pub workflow_id: String,
    #[sqlx(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[sqlx(rename = "stoppedAt")]
    pub stopped_at: Option<DateTime<Utc>>,
    pub status: String,
    pub mode: String,
}

/// Row from `execution_data`: the reference-compressed JSON blob for one
/// execution, still a raw string — `cinderwatch_core::parse_blob` turns
/// this into the `Vec<Value>` the resolver consumes.
#[derive(Debug, Clone, FromRow)]
pub struct SourceExecutionBlob {
    pub execution_id: i64,
    pub data: String,
}

/// Finds executions present in the source engine but not yet mirrored
/// into the analytics `executions` table — the polling fallback for
/// Stage 1 when the `sai_execution_ready` NOTIFY is missed.
pub async fn fetch_unmirrored_executions(
    source_pool: &PgPool,
    target_pool: &PgPool,
    limit: i64,
) -> Result<Vec<SourceExecution>, QueueError> {
    let known_ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM executions")
        .fetch_all(target_pool)
        .await?;
    let known_ids: Vec<i64> = known_ids.into_iter().map(|(id,)| id).collect();

    let rows = sqlx::query_as::<_, SourceExecution>(
        r#"
        SELECT id, "workflowId", "startedAt", "stoppedAt", status, mode
        FROM execution_entity
        WHERE "deletedAt" IS NULL
          AND NOT (id = ANY($1))
        ORDER BY id
        LIMIT $2
        "#,
    )
    .bind(&known_ids)
    .bind(limit)
    .fetch_all(source_pool)
    .await?;

    Ok(rows)
}

/// Looks up a single source execution skeleton by id — used when Stage 1
/// is triggered by a `sai_execution_ready` NOTIFY carrying just the id.
pub async fn fetch_source_execution(
    source_pool: &PgPool,
    execution_id: i64,
) -> Result<Option<SourceExecution>, QueueError> {
    let row = sqlx::query_as::<_, SourceExecution>(
        r#"
        SELECT id, "workflowId", "startedAt", "stoppedAt", status, mode
        FROM execution_entity
        WHERE id = $1
          AND "deletedAt" IS NULL
        "#,
    )
    .bind(execution_id)
    .fetch_optional(source_pool)
    .await?;

    Ok(row)
}

/// Batch-fetches source blobs for a claimed batch in one round trip
/// (`WHERE "executionId" = ANY($1)`).
pub async fn fetch_blobs(
    source_pool: &PgPool,
    execution_ids: &[i64],
) -> Result<Vec<SourceExecutionBlob>, QueueError> {
    let rows = sqlx::query_as::<_, SourceExecutionBlob>(
        r#"
        SELECT "executionId" AS execution_id, data
        FROM execution_data
        WHERE "executionId" = ANY($1)
        "#,
    )
    .bind(execution_ids)
    .fetch_all(source_pool)
    .await?;

    Ok(rows)
}
