//! In-memory `QueueStore` double for exercising the claim/complete/fail
//! state machine without a live Postgres instance.
//!
//! `PgQueue` is expected to satisfy the same contract against real SQL;
//! this double lets that contract (claim exclusivity, retry exhaustion,
//! stale recovery) be pinned down in a fast unit test.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use cinderwatch_core::ports::{self, PortError, QueueStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct Row {
    status: Status,
    priority: i32,
    attempts: i32,
    max_attempts: i32,
    claimed_by: Option<String>,
    claimed_at: Option<chrono::DateTime<Utc>>,
    last_error: Option<String>,
    processing_time_ms: Option<i64>,
    queued_seq: u64,
}

pub struct FakeQueue {
    rows: Mutex<HashMap<i64, Row>>,
    seq: Mutex<u64>,
}

impl FakeQueue {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            seq: Mutex::new(0),
        }
    }

    pub fn status_of(&self, execution_id: i64) -> Option<Status> {
        self.rows
            .lock()
            .unwrap()
            .get(&execution_id)
            .map(|r| r.status.clone())
    }

    pub fn attempts_of(&self, execution_id: i64) -> Option<i32> {
        self.rows.lock().unwrap().get(&execution_id).map(|r| r.attempts)
    }

    fn next_seq(&self) -> u64 {
        let mut seq = self.seq.lock().unwrap();
        *seq += 1;
        *seq
    }
}

#[async_trait]
impl QueueStore for FakeQueue {
    async fn enqueue(&self, execution_id: i64, priority: i32, max_attempts: i32) -> ports::Result<()> {
        let mut rows = self.rows.lock().unwrap();
        rows.entry(execution_id).or_insert_with(|| Row {
            status: Status::Pending,
            priority,
            attempts: 0,
            max_attempts,
            claimed_by: None,
            claimed_at: None,
            last_error: None,
            processing_time_ms: None,
            queued_seq: 0,
        });
        drop(rows);
        let seq = self.next_seq();
        if let Some(row) = self.rows.lock().unwrap().get_mut(&execution_id) {
            if row.queued_seq == 0 {
                row.queued_seq = seq;
            }
        }
        Ok(())
    }

    async fn claim_batch(&self, worker_id: &str, size: i64) -> ports::Result<Vec<i64>> {
        let mut rows = self.rows.lock().unwrap();
        let mut candidates: Vec<i64> = rows
            .iter()
            .filter(|(_, r)| r.status == Status::Pending && r.attempts < r.max_attempts)
            .map(|(id, _)| *id)
            .collect();
        candidates.sort_by_key(|id| {
            let r = &rows[id];
            (r.priority, r.queued_seq)
        });
        candidates.truncate(size as usize);
        for id in &candidates {
            let row = rows.get_mut(id).unwrap();
            row.status = Status::Processing;
            row.claimed_by = Some(worker_id.to_string());
            row.claimed_at = Some(fixed_now());
            row.attempts += 1;
        }
        Ok(candidates)
    }

    async fn mark_completed(&self, execution_id: i64, processing_time_ms: i64) -> ports::Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&execution_id) {
            row.status = Status::Completed;
            row.processing_time_ms = Some(processing_time_ms);
            row.last_error = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, execution_id: i64, error_message: &str) -> ports::Result<i32> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.get_mut(&execution_id) {
            row.status = if row.attempts < row.max_attempts {
                Status::Pending
            } else {
                Status::Failed
            };
            row.last_error = Some(error_message.to_string());
            return Ok(row.attempts);
        }
        Ok(0)
    }

    async fn recover_stale(&self, threshold: Duration) -> ports::Result<i64> {
        let mut rows = self.rows.lock().unwrap();
        let now = fixed_now();
        let mut recovered = 0i64;
        for row in rows.values_mut() {
            if row.status == Status::Processing {
                if let Some(claimed_at) = row.claimed_at {
                    if now - claimed_at > threshold {
                        row.status = Status::Pending;
                        row.claimed_by = None;
                        row.claimed_at = None;
                        recovered += 1;
                    }
                }
            }
        }
        Ok(recovered)
    }
}

/// `Utc::now()` is intentionally not used outside tests in this crate;
/// the fake's clock only needs to be monotonic within one test.
fn fixed_now() -> chrono::DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never_err<T>(_: PortError) -> T {
        panic!("fake queue must not fail")
    }

    #[tokio::test]
    async fn concurrent_double_enqueue_claims_exactly_once() {
        let queue = FakeQueue::new();
        queue.enqueue(42, 100, 5).await.unwrap_or_else(never_err);
        // A second NOTIFY for the same execution is a no-op (unique
        // constraint on (execution_id, stage) in the real backend).
        queue.enqueue(42, 100, 5).await.unwrap_or_else(never_err);

        let first = queue.claim_batch("worker-a", 10).await.unwrap();
        let second = queue.claim_batch("worker-b", 10).await.unwrap();

        assert_eq!(first, vec![42]);
        assert!(second.is_empty(), "row 42 must not be claimable twice");

        queue.mark_completed(42, 120).await.unwrap();
        assert_eq!(queue.status_of(42), Some(Status::Completed));
    }

    #[tokio::test]
    async fn retry_exhaustion_transitions_to_failed_on_fifth_attempt() {
        let queue = FakeQueue::new();
        queue.enqueue(7, 100, 5).await.unwrap();

        for attempt in 1..=5 {
            let claimed = queue.claim_batch("worker-a", 10).await.unwrap();
            assert_eq!(claimed, vec![7], "attempt {attempt} should still be claimable");
            queue.mark_failed(7, "source blob unreachable").await.unwrap();
        }

        assert_eq!(queue.status_of(7), Some(Status::Failed));
        assert_eq!(queue.attempts_of(7), Some(5));

        let claimed = queue.claim_batch("worker-a", 10).await.unwrap();
        assert!(claimed.is_empty(), "a failed row must never be claimed again");
    }

    #[tokio::test]
    async fn claim_batch_respects_priority_then_fifo_ordering() {
        let queue = FakeQueue::new();
        queue.enqueue(1, 200, 5).await.unwrap();
        queue.enqueue(2, 100, 5).await.unwrap();
        queue.enqueue(3, 100, 5).await.unwrap();

        let claimed = queue.claim_batch("worker-a", 10).await.unwrap();
        assert_eq!(claimed, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn claim_batch_respects_size_limit() {
        let queue = FakeQueue::new();
        for id in 0..5 {
            queue.enqueue(id, 100, 5).await.unwrap();
        }

        let claimed = queue.claim_batch("worker-a", 2).await.unwrap();
        assert_eq!(claimed.len(), 2);
    }

    #[tokio::test]
    async fn recover_stale_returns_processing_rows_to_pending() {
        let queue = FakeQueue::new();
        queue.enqueue(9, 100, 5).await.unwrap();
        queue.claim_batch("worker-a", 10).await.unwrap();
        assert_eq!(queue.status_of(9), Some(Status::Processing));

        // A zero threshold treats every in-flight claim as stale.
        let recovered = queue.recover_stale(Duration::zero()).await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(queue.status_of(9), Some(Status::Pending));
        assert_eq!(queue.attempts_of(9), Some(1), "attempts survive recovery");
    }

    #[tokio::test]
    async fn mark_completed_is_idempotent() {
        let queue = FakeQueue::new();
        queue.enqueue(5, 100, 5).await.unwrap();
        queue.claim_batch("worker-a", 10).await.unwrap();
        queue.mark_completed(5, 50).await.unwrap();
        queue.mark_completed(5, 999).await.unwrap();
        assert_eq!(queue.status_of(5), Some(Status::Completed));
    }
}
