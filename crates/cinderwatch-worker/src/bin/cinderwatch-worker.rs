//! cinderwatch-worker — standalone Stage-2 ETL worker process.
//!
//! Reads config from env vars (see `cinderwatch_worker::config::Config`);
//! required:
//!   CINDERWATCH_TARGET_DATABASE_URL — analytics database
//!   CINDERWATCH_SOURCE_DATABASE_URL — source engine database (read-only)

use std::sync::Arc;

use cinderwatch_core::ports::QueueStore;
use cinderwatch_images::{FilesystemImageMaterializer, ImageMaterializer, ImageMaterializerConfig};
use cinderwatch_postgres::PgQueue;
use cinderwatch_worker::{Config, LoggingEventSink, WorkerLoop};
use sqlx::postgres::PgPoolOptions;
use sqlx::Executor;
use tokio::sync::watch;

/// Every connection a pool hands out runs with this statement timeout for
/// the rest of its life, so a single hung query fails instead of blocking
/// a worker's batch cycle indefinitely.
fn statement_timeout_hook(
    statement_timeout_ms: u64,
) -> impl for<'c> Fn(
    &'c mut sqlx::postgres::PgConnection,
    sqlx::pool::PoolConnectionMetadata,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), sqlx::Error>> + Send + 'c>>
       + Send
       + Sync
       + 'static {
    move |conn, _meta| {
        Box::pin(async move {
            conn.execute(format!("SET statement_timeout = {statement_timeout_ms}").as_str())
                .await?;
            Ok(())
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cinderwatch_worker=debug".into()),
        )
        .init();

    let config = Config::from_env();

    let target_pool = PgPoolOptions::new()
        .max_connections(config.target_pool_size)
        .after_connect(statement_timeout_hook(config.statement_timeout_ms))
        .connect(&config.target_database_url)
        .await?;
    let source_pool = PgPoolOptions::new()
        .max_connections(config.source_pool_size)
        .after_connect(statement_timeout_hook(config.statement_timeout_ms))
        .connect(&config.source_database_url)
        .await?;

    tracing::info!(worker_id = %config.worker_id, "connected to target and source databases");

    let materializer: Arc<dyn ImageMaterializer> = Arc::new(FilesystemImageMaterializer::new(
        ImageMaterializerConfig {
            binary_data_root: config.n8n_binary_data_root.clone().into(),
            image_cache_root: config.image_cache_root.clone().into(),
            thumbnail_max_width: config.thumbnail_max_width,
            thumbnail_quality: config.thumbnail_quality,
            webp_quality: config.webp_quality,
        },
    ));
    let event_sink = Arc::new(LoggingEventSink);
    let queue: Arc<dyn QueueStore> = Arc::new(PgQueue::new(target_pool.clone()));

    let worker = Arc::new(WorkerLoop::new(
        target_pool,
        source_pool,
        queue,
        materializer,
        event_sink,
        config,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let stage1_worker = Arc::clone(&worker);
    let stage1_shutdown = shutdown_rx.clone();
    let stage1_handle = tokio::spawn(async move { stage1_worker.run_stage1(stage1_shutdown).await });

    worker.run(shutdown_rx).await;
    let _ = stage1_handle.await;
    Ok(())
}
