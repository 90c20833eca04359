/// Errors surfaced by the queue protocol, transactional writer, and
/// source-side readers. All are backed by `sqlx::Error` — runtime-checked
/// queries mean there is no separate "query build" error class to model.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
