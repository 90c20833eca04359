//! Transactional writer: a single `BEGIN/…/COMMIT` block per execution
//! that never leaves a partial write visible.

use chrono::Utc;
use cinderwatch_core::types::{Extracted, ImageResult};
use sqlx::PgPool;

use crate::error::QueueError;

/// Applies one execution's extracted fields (and optional image result) to
/// the four analytics tables in a single transaction. `ROLLBACK` happens
/// implicitly: any `?` on a query error drops `tx` without a `commit()`.
pub async fn write_execution_result(
    pool: &PgPool,
    execution_id: i64,
    extracted: &Extracted,
    image: Option<&ImageResult>,
) -> Result<(), QueueError> {
    let mut tx = pool.begin().await?;

    // 1. Late-bound dimensions: COALESCE(new, existing) so a later partial
    // write never overwrites an earlier non-null value with null.
    if extracted.device_id.is_some()
        || extracted.camera_id.is_some()
        || extracted.location.is_some()
    {
        sqlx::query(
            r#"
            UPDATE executions
            SET device_id = COALESCE($2, device_id),
                camera_id = COALESCE($3, camera_id),
                location = COALESCE($4, location),
                camera_type = COALESCE($5, camera_type),
                capture_timestamp = COALESCE($6, capture_timestamp),
                node_id = COALESCE($2, node_id)
            WHERE id = $1
            "#,
        )
        .bind(execution_id)
        .bind(&extracted.device_id)
        .bind(&extracted.camera_id)
        .bind(&extracted.location)
        .bind(&extracted.camera_type)
        .bind(extracted.capture_timestamp)
        .execute(&mut *tx)
        .await?;
    }

    // 2. ExecutionAnalysis upsert: every non-key column overwritten on
    // conflict (idempotent re-processing), updated_at bumped to now().
    let detections_json = extracted
        .detections
        .as_ref()
        .map(|d| serde_json::to_value(d).unwrap_or(serde_json::Value::Null));
    let active_classes_json = extracted
        .active_classes
        .as_ref()
        .map(|c| serde_json::to_value(c).unwrap_or(serde_json::Value::Null));
    let alert_level_str = extracted.alert_level.map(|a| a.as_str());
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO execution_analysis (
            execution_id, request_id, model_version, detection_count,
            has_smoke, alert_level, detection_mode, active_classes,
            detections, max_confidence, smoke_confidence,
            image_width, image_height, yolo_processing_time_ms,
            updated_at
        ) VALUES (
            $1, $2, $3, $4,
            $5, $6, $7, $8,
            $9, $10, $11,
            $12, $13, $14,
            $15
        )
        ON CONFLICT (execution_id) DO UPDATE SET
            request_id = EXCLUDED.request_id,
            model_version = EXCLUDED.model_version,
            detection_count = EXCLUDED.detection_count,
            has_smoke = EXCLUDED.has_smoke,
            alert_level = EXCLUDED.alert_level,
            detection_mode = EXCLUDED.detection_mode,
            active_classes = EXCLUDED.active_classes,
            detections = EXCLUDED.detections,
            max_confidence = EXCLUDED.max_confidence,
            smoke_confidence = EXCLUDED.smoke_confidence,
            image_width = EXCLUDED.image_width,
            image_height = EXCLUDED.image_height,
            yolo_processing_time_ms = EXCLUDED.yolo_processing_time_ms,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(execution_id)
    .bind(&extracted.request_id)
    .bind(&extracted.model_version)
    .bind(extracted.detection_count)
    .bind(extracted.has_smoke)
    .bind(alert_level_str)
    .bind(&extracted.detection_mode)
    .bind(&active_classes_json)
    .bind(&detections_json)
    .bind(extracted.max_confidence)
    .bind(extracted.smoke_confidence)
    .bind(extracted.image_width)
    .bind(extracted.image_height)
    .bind(extracted.yolo_processing_time_ms)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    // 3. ExecutionNotifications: present even when nothing was sent, but
    // never clobbers a later send — the table is owned downstream.
    sqlx::query(
        r#"
        INSERT INTO execution_notifications (execution_id, telegram_sent)
        VALUES ($1, false)
        ON CONFLICT (execution_id) DO NOTHING
        "#,
    )
    .bind(execution_id)
    .execute(&mut *tx)
    .await?;

    // 4. ExecutionImages, only when the materializer produced a result.
    if let Some(img) = image {
        sqlx::query(
            r#"
            INSERT INTO execution_images (
                execution_id, original_path, webp_path, thumb_path,
                byte_size, width, height, format, extracted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'jpeg', $8)
            ON CONFLICT (execution_id) DO UPDATE SET
                original_path = EXCLUDED.original_path,
                webp_path = EXCLUDED.webp_path,
                thumb_path = EXCLUDED.thumb_path,
                byte_size = EXCLUDED.byte_size,
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                extracted_at = EXCLUDED.extracted_at
            "#,
        )
        .bind(execution_id)
        .bind(&img.original_path)
        .bind(&img.webp_path)
        .bind(&img.thumb_path)
        .bind(img.byte_size)
        .bind(img.width)
        .bind(img.height)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Inserts the Stage-1 `Execution` skeleton (late-bound dimensions all
/// NULL until Stage 2 fills them in). `ON CONFLICT DO NOTHING` keeps a
/// second NOTIFY for an already-mirrored execution a no-op.
#[allow(clippy::too_many_arguments)]
pub async fn insert_execution_skeleton(
    pool: &PgPool,
    execution_id: i64,
    workflow_id: &str,
    execution_timestamp: chrono::DateTime<Utc>,
    completion_timestamp: Option<chrono::DateTime<Utc>>,
    duration_ms: Option<i64>,
    status: &str,
    mode: &str,
) -> Result<(), QueueError> {
    sqlx::query(
        r#"
        INSERT INTO executions (
            id, workflow_id, execution_timestamp, completion_timestamp,
            duration_ms, status, mode
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(execution_id)
    .bind(workflow_id)
    .bind(execution_timestamp)
    .bind(completion_timestamp)
    .bind(duration_ms)
    .bind(status)
    .bind(mode)
    .execute(pool)
    .await?;

    Ok(())
}
