//! Worker configuration. Loaded from environment variables, with
//! required fields panicking with a descriptive message on absence and
//! everything else falling back to a documented default.

use std::time::Duration;

/// Every recognized configuration option, with its documented default.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_database_url: String,
    pub source_database_url: String,
    pub target_pool_size: u32,
    pub source_pool_size: u32,

    pub worker_id: String,
    pub batch_size: i64,
    pub poll_interval_ms: u64,
    pub cleanup_interval_ms: u64,
    pub stale_threshold: Duration,
    pub statement_timeout_ms: u64,
    pub max_attempts: i32,

    pub n8n_binary_data_root: String,
    pub image_cache_root: String,
    pub thumbnail_max_width: u32,
    pub thumbnail_quality: f32,
    pub webp_quality: f32,
}

impl Config {
    /// Reads every field from the environment. Required variables panic
    /// with a descriptive message on absence; everything else falls
    /// back to its documented default.
    pub fn from_env() -> Self {
        Self {
            target_database_url: require_env("CINDERWATCH_TARGET_DATABASE_URL"),
            source_database_url: require_env("CINDERWATCH_SOURCE_DATABASE_URL"),
            target_pool_size: env_parse("CINDERWATCH_TARGET_POOL_SIZE", 10),
            source_pool_size: env_parse("CINDERWATCH_SOURCE_POOL_SIZE", 5),

            worker_id: std::env::var("CINDERWATCH_WORKER_ID")
                .unwrap_or_else(|_| format!("worker-{}", uuid::Uuid::new_v4())),
            batch_size: env_parse("CINDERWATCH_BATCH_SIZE", 10),
            poll_interval_ms: env_parse("CINDERWATCH_POLL_INTERVAL_MS", 30_000),
            cleanup_interval_ms: env_parse("CINDERWATCH_CLEANUP_INTERVAL_MS", 60_000),
            stale_threshold: Duration::from_secs(env_parse(
                "CINDERWATCH_STALE_THRESHOLD_SECS",
                300,
            )),
            statement_timeout_ms: env_parse("CINDERWATCH_STATEMENT_TIMEOUT_MS", 30_000),
            max_attempts: env_parse("CINDERWATCH_MAX_ATTEMPTS", 5),

            n8n_binary_data_root: std::env::var("CINDERWATCH_N8N_BINARY_DATA_ROOT")
                .unwrap_or_else(|_| "/data/n8n/binary".to_string()),
            image_cache_root: std::env::var("CINDERWATCH_IMAGE_CACHE_ROOT")
                .unwrap_or_else(|_| "/data/image-cache".to_string()),
            thumbnail_max_width: env_parse("CINDERWATCH_THUMBNAIL_MAX_WIDTH", 320),
            thumbnail_quality: env_parse("CINDERWATCH_THUMBNAIL_QUALITY", 70.0),
            webp_quality: env_parse("CINDERWATCH_WEBP_QUALITY", 80.0),
        }
    }
}

fn require_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| panic!("{key} must be set"))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
