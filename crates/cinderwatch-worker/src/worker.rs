//! Worker loop: Starting / Idle↔Processing / Cleanup tick / Stopping,
//! feeding a claimed batch through a per-execution pipeline (blob parse
//! → field extraction → image materialization → transactional write →
//! MarkCompleted/MarkFailed).

use std::sync::Arc;
use std::time::Instant;

use cinderwatch_core::ports::QueueStore;
use cinderwatch_core::types::{CompletionEvent, FailureEvent};
use cinderwatch_core::{extract, parse_blob, resolver};
use cinderwatch_images::ImageMaterializer;
use cinderwatch_postgres::{source, writer};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::event_sink::EventSink;

pub struct WorkerLoop {
    target_pool: PgPool,
    source_pool: PgPool,
    queue: Arc<dyn QueueStore>,
    materializer: Arc<dyn ImageMaterializer>,
    event_sink: Arc<dyn EventSink>,
    config: Config,
}

impl WorkerLoop {
    pub fn new(
        target_pool: PgPool,
        source_pool: PgPool,
        queue: Arc<dyn QueueStore>,
        materializer: Arc<dyn ImageMaterializer>,
        event_sink: Arc<dyn EventSink>,
        config: Config,
    ) -> Self {
        Self {
            target_pool,
            source_pool,
            queue,
            materializer,
            event_sink,
            config,
        }
    }

    /// Runs until `shutdown` carries `true`. Mirrors
    /// `TaskQueueListener::run`'s `tokio::select!` shape: a notify
    /// stream, a polling-interval fallback, and a shutdown watch, plus an
    /// independent cleanup tick for stale-claim recovery.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.config.worker_id, "worker starting");

        let mut listener = match sqlx::postgres::PgListener::connect_with(&self.target_pool).await
        {
            Ok(mut l) => {
                if let Err(e) = l.listen("stage2_queue").await {
                    error!(error = %e, "failed to LISTEN on stage2_queue, falling back to polling only");
                }
                Some(l)
            }
            Err(e) => {
                error!(error = %e, "failed to open LISTEN connection, falling back to polling only");
                None
            }
        };

        let mut processing_tick =
            tokio::time::interval(std::time::Duration::from_millis(self.config.poll_interval_ms));
        let mut cleanup_tick =
            tokio::time::interval(std::time::Duration::from_millis(self.config.cleanup_interval_ms));

        loop {
            if *shutdown.borrow() {
                break;
            }

            let notified = async {
                match listener.as_mut() {
                    Some(l) => {
                        let _ = l.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = notified => {
                    self.drain_until_empty().await;
                }
                _ = processing_tick.tick() => {
                    self.drain_until_empty().await;
                }
                _ = cleanup_tick.tick() => {
                    self.run_cleanup().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "worker stopping");
        if let Some(mut l) = listener {
            let _ = l.unlisten("stage2_queue").await;
        }
    }

    /// Stage-1 trigger ingest: listens for `sai_execution_ready` NOTIFY
    /// events and falls back to polling the source engine for
    /// executions not yet mirrored. Intentionally a separate loop from
    /// `run` — Stage 1 is deliberately trivial and must never block on
    /// Stage 2's slower per-execution pipeline.
    pub async fn run_stage1(&self, mut shutdown: watch::Receiver<bool>) {
        let mut listener = match sqlx::postgres::PgListener::connect_with(&self.target_pool).await
        {
            Ok(mut l) => {
                if let Err(e) = l.listen("sai_execution_ready").await {
                    error!(error = %e, "failed to LISTEN on sai_execution_ready, falling back to polling only");
                }
                Some(l)
            }
            Err(e) => {
                error!(error = %e, "failed to open stage1 LISTEN connection, falling back to polling only");
                None
            }
        };

        let mut poll_tick =
            tokio::time::interval(std::time::Duration::from_millis(self.config.poll_interval_ms));

        loop {
            if *shutdown.borrow() {
                break;
            }

            let notification = async {
                match listener.as_mut() {
                    Some(l) => l.recv().await.ok(),
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                notif = notification => {
                    if let Some(n) = notif {
                        self.handle_stage1_notification(n.payload()).await;
                    }
                }
                _ = poll_tick.tick() => {
                    self.poll_unmirrored_executions().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(mut l) = listener {
            let _ = l.unlisten("sai_execution_ready").await;
        }
    }

    async fn handle_stage1_notification(&self, payload: &str) {
        match serde_json::from_str::<crate::stage1::ExecutionReadyNotification>(payload) {
            Ok(event) => match crate::stage1::ingest_from_notification(
                &self.source_pool,
                &self.target_pool,
                self.queue.as_ref(),
                self.config.max_attempts,
                &event,
            )
            .await
            {
                Ok(true) => {}
                Ok(false) => warn!(
                    execution_id = event.execution_id,
                    "source execution vanished before stage1 could look up its mode, deferring to poll fallback"
                ),
                Err(e) => {
                    error!(execution_id = event.execution_id, error = %e, "stage1 ingest failed")
                }
            },
            Err(e) => warn!(error = %e, payload, "malformed sai_execution_ready payload"),
        }
    }

    async fn poll_unmirrored_executions(&self) {
        match crate::stage1::ingest_unmirrored(
            &self.source_pool,
            &self.target_pool,
            self.queue.as_ref(),
            self.config.max_attempts,
            self.config.batch_size,
        )
        .await
        {
            Ok(0) => {}
            Ok(n) => info!(ingested = n, "stage1 poll mirrored new executions"),
            Err(e) => error!(error = %e, "stage1 poll failed"),
        }
    }

    /// Runs batch cycles back-to-back until a claim comes back empty —
    /// an immediate self-kick into the next batch rather than waiting
    /// out the next poll tick.
    async fn drain_until_empty(&self) {
        loop {
            match self.run_batch_cycle().await {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) => {
                    error!(error = %e, "batch cycle failed, backing off");
                    break;
                }
            }
        }
    }

    async fn run_cleanup(&self) {
        let threshold = chrono::Duration::from_std(self.config.stale_threshold)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        match self.queue.recover_stale(threshold).await {
            Ok(0) => {}
            Ok(n) => info!(recovered = n, "stale claims recovered"),
            Err(e) => error!(error = %e, "stale-claim recovery failed"),
        }
    }

    /// One ClaimBatch → batch-fetch → per-item pipeline cycle. Returns
    /// the number of ids claimed (0 means the queue was empty).
    async fn run_batch_cycle(&self) -> Result<usize, crate::error::WorkerError> {
        let ids = self
            .queue
            .claim_batch(&self.config.worker_id, self.config.batch_size)
            .await?;

        if ids.is_empty() {
            return Ok(0);
        }

        let blobs = source::fetch_blobs(&self.source_pool, &ids).await?;
        let mut blobs_by_id: std::collections::HashMap<i64, String> = blobs
            .into_iter()
            .map(|b| (b.execution_id, b.data))
            .collect();

        // Claim order is priority-then-FIFO; items within this batch are
        // processed sequentially in that order.
        for id in &ids {
            let started = Instant::now();
            match blobs_by_id.remove(id) {
                Some(raw) => self.process_one(*id, &raw, started).await,
                None => {
                    self.fail_item(*id, "source blob missing for claimed execution")
                        .await;
                }
            }
        }

        Ok(ids.len())
    }

    async fn process_one(&self, execution_id: i64, raw: &str, started: Instant) {
        let arr = match parse_blob(raw) {
            Ok(arr) => arr,
            Err(e) => {
                warn!(execution_id, error = %e, "execution blob is not valid JSON, degrading to empty record");
                Vec::new()
            }
        };

        let extracted = extract::extract(&arr);
        let image_descriptor = resolver::node_binary(&arr, "Webhook", "image");
        let image = match image_descriptor {
            Some(descriptor) => self.materializer.materialize(&descriptor, execution_id).await,
            None => None,
        };
        let image_materialized = image.is_some();

        match writer::write_execution_result(&self.target_pool, execution_id, &extracted, image.as_ref())
            .await
        {
            Ok(()) => {
                let processing_time_ms = started.elapsed().as_millis() as i64;
                if let Err(e) = self
                    .queue
                    .mark_completed(execution_id, processing_time_ms)
                    .await
                {
                    error!(execution_id, error = %e, "failed to mark execution completed");
                }
                self.event_sink
                    .completed(CompletionEvent {
                        execution_id,
                        stage: "stage2",
                        has_smoke: extracted.has_smoke,
                        alert_level: extracted.alert_level,
                        detection_count: extracted.detection_count,
                        processing_time_ms,
                        image_materialized,
                    })
                    .await;
                debug!(execution_id, "execution processed");
            }
            Err(e) => {
                self.fail_item(execution_id, &e.to_string()).await;
            }
        }
    }

    async fn fail_item(&self, execution_id: i64, error_message: &str) {
        let retry_count = match self.queue.mark_failed(execution_id, error_message).await {
            Ok(attempts) => attempts,
            Err(e) => {
                error!(execution_id, error = %e, "failed to mark execution failed");
                0
            }
        };
        self.event_sink
            .failed(FailureEvent {
                execution_id,
                error: error_message.to_string(),
                retry_count,
            })
            .await;
    }
}
