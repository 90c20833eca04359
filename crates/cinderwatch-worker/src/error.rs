/// Errors at the batch-cycle boundary: batch-claim and batch-fetch
/// failures. Per-execution errors never reach here — they are caught
/// at the item boundary and converted to `MarkFailed` inside the
/// worker loop itself.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("queue backend error: {0}")]
    Queue(#[from] cinderwatch_core::ports::PortError),

    #[error("database error: {0}")]
    Database(#[from] cinderwatch_postgres::QueueError),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
