//! Storage port trait for the queue protocol — implemented by
//! `cinderwatch-postgres::PgQueue`. Worker-loop logic depends only on
//! this trait, never on `sqlx` directly, so it can be exercised against
//! an in-memory double in tests.

use async_trait::async_trait;
use chrono::Duration;

/// Opaque backend failure. The concrete backend (Postgres today) maps
/// its own error type down to this at the trait boundary; callers never
/// need to know it started life as a `sqlx::Error`.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PortError(pub String);

pub type Result<T> = std::result::Result<T, PortError>;

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, execution_id: i64, priority: i32, max_attempts: i32) -> Result<()>;
    async fn claim_batch(&self, worker_id: &str, size: i64) -> Result<Vec<i64>>;
    async fn mark_completed(&self, execution_id: i64, processing_time_ms: i64) -> Result<()>;
    /// Returns the row's current attempt count after recording the
    /// failure, for callers that want to report how many times this
    /// execution has been tried.
    async fn mark_failed(&self, execution_id: i64, error_message: &str) -> Result<i32>;
    async fn recover_stale(&self, threshold: Duration) -> Result<i64>;
}
