//! Analytics-side domain types.
//!
//! Every non-key field is an `Option` — nullability means "unknown," never
//! "zero" or "none-of-the-above".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse categorical severity emitted alongside the detection list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown alert level: {other}")),
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single bounding-box prediction emitted by YOLO, normalized to xywh
/// pixel coordinates regardless of how the source expressed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Output of the field extractor: a fully resolved blob reduced to
/// typed, honestly-nullable fields. Never raises; malformed subtrees
/// degrade field-by-field rather than failing the whole record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extracted {
    // YOLO fields
    pub request_id: Option<String>,
    pub model_version: Option<String>,
    /// Absence equals zero detections, which is a legitimate result —
    /// this is the one numeric field that defaults rather than nulls.
    pub detection_count: i64,
    pub has_smoke: bool,
    pub alert_level: Option<AlertLevel>,
    pub detection_mode: Option<String>,
    pub active_classes: Option<Vec<String>>,
    pub detections: Option<Vec<Detection>>,
    pub max_confidence: Option<f64>,
    pub smoke_confidence: Option<f64>,
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,
    pub yolo_processing_time_ms: Option<i64>,

    // Metadata fields (late-bound dimensions)
    pub device_id: Option<String>,
    pub camera_id: Option<String>,
    pub location: Option<String>,
    pub camera_type: Option<String>,
    pub capture_timestamp: Option<DateTime<Utc>>,

    // Webhook image reference
    pub image_hash: Option<String>,
}

/// One row per successful ingest. `id` is the source execution id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub workflow_id: String,
    pub execution_timestamp: DateTime<Utc>,
    pub completion_timestamp: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: String,
    pub mode: String,
    pub device_id: Option<String>,
    pub camera_id: Option<String>,
    pub location: Option<String>,
    pub camera_type: Option<String>,
    pub capture_timestamp: Option<DateTime<Utc>>,
    /// Mirror of `device_id`, retained only for backwards-compatible
    /// queries.
    pub node_id: Option<String>,
}

/// One row per Execution, keyed by id. Holds YOLO outputs plus
/// out-of-band manual-labeling fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionAnalysis {
    pub execution_id: i64,
    pub request_id: Option<String>,
    pub model_version: Option<String>,
    pub detection_count: i64,
    pub has_smoke: bool,
    pub alert_level: Option<AlertLevel>,
    pub detection_mode: Option<String>,
    pub active_classes: Option<Vec<String>>,
    pub detections: Option<Vec<Detection>>,
    pub max_confidence: Option<f64>,
    pub smoke_confidence: Option<f64>,
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,
    pub yolo_processing_time_ms: Option<i64>,
    pub is_false_positive: Option<bool>,
    pub false_positive_reason: Option<String>,
    pub marked_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// One row per Execution when at least one image variant was
/// materialized. Paths are relative to a configurable base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionImages {
    pub execution_id: i64,
    pub original_path: String,
    pub webp_path: String,
    pub thumb_path: String,
    pub byte_size: i64,
    pub width: i32,
    pub height: i32,
    pub format: String,
    pub extracted_at: DateTime<Utc>,
}

/// One row per Execution, present even when no notification occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionNotifications {
    pub execution_id: i64,
    pub telegram_sent: bool,
    pub telegram_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Status of a queue row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown queue status: {other}")),
        }
    }
}

/// One row per enqueued piece of Stage-2 work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingQueueRow {
    pub id: i64,
    pub execution_id: i64,
    pub stage: String,
    pub status: QueueStatus,
    pub priority: i32,
    pub attempts: i32,
    pub max_attempts: i32,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub queued_at: DateTime<Utc>,
}

/// Result of successfully materializing an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    pub original_path: String,
    pub webp_path: String,
    pub thumb_path: String,
    pub byte_size: i64,
    pub width: i32,
    pub height: i32,
}

/// Structured completion event delivered to the SSE fan-out on success.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionEvent {
    pub execution_id: i64,
    pub stage: &'static str,
    pub has_smoke: bool,
    pub alert_level: Option<AlertLevel>,
    pub detection_count: i64,
    pub processing_time_ms: i64,
    pub image_materialized: bool,
}

/// Structured failure event delivered to the SSE fan-out on failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEvent {
    pub execution_id: i64,
    pub error: String,
    pub retry_count: i32,
}
