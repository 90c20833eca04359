//! SSE fan-out boundary. The fan-out policy itself — who subscribes,
//! how delivery is batched — is explicitly out of scope; this module
//! only models the obligation to *emit* a structured event, and to
//! never let emission failure affect the ETL.

use async_trait::async_trait;
use cinderwatch_core::types::{CompletionEvent, FailureEvent};

/// Delivery is always best-effort: implementations must not propagate
/// errors back into the worker loop, so the trait itself has no
/// `Result` in its signature.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn completed(&self, event: CompletionEvent);
    async fn failed(&self, event: FailureEvent);
}

/// Default sink for worker instances that don't need SSE at all (e.g.
/// batch backfills, tests).
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn completed(&self, _event: CompletionEvent) {}
    async fn failed(&self, _event: FailureEvent) {}
}

/// Logs events at info/warn instead of forwarding them anywhere —
/// useful standalone and as the base the real SSE fan-out would wrap.
pub struct LoggingEventSink;

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn completed(&self, event: CompletionEvent) {
        tracing::info!(
            execution_id = event.execution_id,
            has_smoke = event.has_smoke,
            alert_level = ?event.alert_level,
            detection_count = event.detection_count,
            processing_time_ms = event.processing_time_ms,
            image_materialized = event.image_materialized,
            "stage2 completed"
        );
    }

    async fn failed(&self, event: FailureEvent) {
        tracing::warn!(
            execution_id = event.execution_id,
            error = %event.error,
            retry_count = event.retry_count,
            "stage2 failed"
        );
    }
}
