//! Field extractor.
//!
//! Takes a fully resolved source blob and pulls YOLO fields, metadata
//! fields, the detection list, and the webhook image reference. Every
//! field is nullable and honest: absence or a parse failure degrades that
//! one field to `None`, never to a default value standing in for
//! "unknown." `detection_count` and the boolean flags are the sole
//! exceptions — absence there is itself a legitimate zero/false result.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::resolver::node_output;
use crate::types::{AlertLevel, Detection, Extracted};

/// Extract everything this module knows how to pull from a resolved
/// source blob. Infallible by contract: never panics, never returns
/// `Result::Err`.
pub fn extract(arr: &[Value]) -> Extracted {
    let yolo = node_output(arr, "YOLO Inference");
    let metadata = node_output(arr, "Metadata");

    let detections = yolo.as_ref().and_then(extract_detections);
    let detection_count = detections.as_ref().map(|d| d.len() as i64).unwrap_or(0);
    let max_confidence = detections
        .as_ref()
        .filter(|d| !d.is_empty())
        .map(|d| d.iter().map(|det| det.confidence).fold(0.0_f64, f64::max));

    let has_smoke = yolo
        .as_ref()
        .and_then(|v| v.get("has_smoke"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let alert_level = yolo
        .as_ref()
        .and_then(|v| v.get("alert_level"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<AlertLevel>().ok());

    let active_classes = yolo.as_ref().and_then(|v| v.get("active_classes")).and_then(|v| {
        v.as_array().map(|arr| {
            arr.iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
    });

    let image_ref = crate::resolver::node_binary(arr, "Webhook", "image");
    let image_hash = image_ref
        .as_ref()
        .and_then(extract_image_hash);

    let (device_id, camera_id, location, camera_type, capture_timestamp) =
        extract_metadata(metadata.as_ref(), yolo.as_ref());

    Extracted {
        request_id: str_field(yolo.as_ref(), "request_id"),
        model_version: str_field(yolo.as_ref(), "model_version"),
        detection_count,
        has_smoke,
        alert_level,
        detection_mode: str_field(yolo.as_ref(), "detection_mode"),
        active_classes,
        detections,
        max_confidence,
        smoke_confidence: f64_field(yolo.as_ref(), "smoke_confidence"),
        image_width: i32_field(yolo.as_ref(), "image_width")
            .or_else(|| i32_field(yolo.as_ref(), "width")),
        image_height: i32_field(yolo.as_ref(), "image_height")
            .or_else(|| i32_field(yolo.as_ref(), "height")),
        yolo_processing_time_ms: i64_field(yolo.as_ref(), "processing_time_ms"),
        device_id,
        camera_id,
        location,
        camera_type,
        capture_timestamp,
        image_hash,
    }
}

fn str_field(v: Option<&Value>, key: &str) -> Option<String> {
    v?.get(key)?.as_str().map(str::to_string)
}

fn f64_field(v: Option<&Value>, key: &str) -> Option<f64> {
    v?.get(key)?.as_f64()
}

fn i32_field(v: Option<&Value>, key: &str) -> Option<i32> {
    v?.get(key)?.as_i64().map(|n| n as i32)
}

fn i64_field(v: Option<&Value>, key: &str) -> Option<i64> {
    v?.get(key)?.as_i64()
}

/// Normalize the `detections` array: class from `class_name`/`class`/
/// `"unknown"`, confidence parsed as float (0 on parse failure), bbox
/// converted to xywh from either corner or legacy form.
fn extract_detections(yolo: &Value) -> Option<Vec<Detection>> {
    let raw = yolo.get("detections")?.as_array()?;
    if raw.is_empty() {
        // An explicit empty list is still "no detections," distinct from
        // an absent key (which also yields None here) only in that both
        // collapse to detection_count == 0 — the spec's distinguishing
        // case is absence-of-list vs list-present-but-empty; we treat
        // both as None since there is nothing to normalize.
        return None;
    }

    Some(
        raw.iter()
            .map(|item| {
                let class_name = item
                    .get("class_name")
                    .or_else(|| item.get("class"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string();

                let confidence = item
                    .get("confidence")
                    .and_then(numeric_as_f64)
                    .unwrap_or(0.0);

                let (x, y, width, height) = normalize_bbox(item);

                Detection {
                    class_name,
                    confidence,
                    x,
                    y,
                    width,
                    height,
                }
            })
            .collect(),
    )
}

fn numeric_as_f64(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn num_or_zero(v: &Value, key: &str) -> f64 {
    v.get(key).and_then(numeric_as_f64).unwrap_or(0.0)
}

fn normalize_bbox(item: &Value) -> (f64, f64, f64, f64) {
    let bbox = item.get("bbox").unwrap_or(item);

    let has_corners = bbox.get("x1").is_some() && bbox.get("y1").is_some();
    if has_corners {
        let x1 = num_or_zero(bbox, "x1");
        let y1 = num_or_zero(bbox, "y1");
        let x2 = num_or_zero(bbox, "x2");
        let y2 = num_or_zero(bbox, "y2");
        return (x1, y1, x2 - x1, y2 - y1);
    }

    let x = num_or_zero(bbox, "x");
    let y = num_or_zero(bbox, "y");
    let width = bbox
        .get("width")
        .and_then(numeric_as_f64)
        .or_else(|| bbox.get("w").and_then(numeric_as_f64))
        .unwrap_or(0.0);
    let height = bbox
        .get("height")
        .and_then(numeric_as_f64)
        .or_else(|| bbox.get("h").and_then(numeric_as_f64))
        .unwrap_or(0.0);
    (x, y, width, height)
}

/// 64-character hex hash of the webhook's referenced image, if present.
fn extract_image_hash(descriptor: &Value) -> Option<String> {
    let storage = descriptor.get("storage")?.as_str()?;
    let relpath = storage.strip_prefix("filesystem-v2:")?;
    let candidate = relpath.rsplit('/').next().unwrap_or(relpath);
    let hex_part = candidate.split('.').next().unwrap_or(candidate);
    if hex_part.len() == 64 && hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(hex_part.to_string())
    } else {
        None
    }
}

type MetadataTuple = (
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<DateTime<Utc>>,
);

fn extract_metadata(metadata: Option<&Value>, yolo: Option<&Value>) -> MetadataTuple {
    let yolo_camera_id = str_field(yolo, "camera_id");

    let device_id = str_field(metadata, "device_id").or_else(|| {
        yolo_camera_id
            .as_deref()
            .and_then(|c| c.split(':').next())
            .map(str::to_string)
    });

    let camera_id = str_field(metadata, "camera_id").or_else(|| yolo_camera_id.clone());

    let location = str_field(metadata, "location");
    let camera_type = str_field(metadata, "camera_type");

    let capture_timestamp = str_field(metadata, "timestamp")
        .as_deref()
        .and_then(normalize_capture_timestamp);

    (device_id, camera_id, location, camera_type, capture_timestamp)
}

/// Normalize `YYYY-MM-DD_HH-MM-SS` to ISO 8601 by replacing the first `_`
/// with `T` and the two trailing dashes (in the time portion) with
/// colons. Returns `None` on any mismatch — never a synthetic timestamp.
fn normalize_capture_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let (date_part, time_part) = raw.split_once('_')?;
    let mut time_segments = time_part.splitn(3, '-');
    let h = time_segments.next()?;
    let m = time_segments.next()?;
    let s = time_segments.next()?;
    let iso = format!("{date_part}T{h}:{m}:{s}Z");
    DateTime::parse_from_rfc3339(&iso)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blob_with_yolo(yolo_json: Value) -> Vec<Value> {
        vec![
            json!({"YOLO Inference": "1"}),
            json!([{"data": {"main": [[{"json": yolo_json}]]}}]),
        ]
    }

    #[test]
    fn happy_path_two_detections_normalizes_bboxes() {
        let arr = blob_with_yolo(json!({
            "request_id": "req-1",
            "model_version": "yolov8n-1.2",
            "alert_level": "high",
            "has_smoke": true,
            "image_width": 1920,
            "image_height": 1080,
            "detections": [
                {"class_name": "smoke", "confidence": 0.83, "bbox": {"x1": 10, "y1": 20, "x2": 110, "y2": 220}},
                {"class_name": "fire", "confidence": 0.71, "bbox": {"x1": 300, "y1": 50, "x2": 500, "y2": 250}}
            ]
        }));
        let extracted = extract(&arr);
        assert_eq!(extracted.detection_count, 2);
        assert!(extracted.has_smoke);
        assert_eq!(extracted.max_confidence, Some(0.83));
        assert_eq!(extracted.alert_level, Some(AlertLevel::High));
        let dets = extracted.detections.unwrap();
        assert_eq!(dets[0].x, 10.0);
        assert_eq!(dets[0].y, 20.0);
        assert_eq!(dets[0].width, 100.0);
        assert_eq!(dets[0].height, 200.0);
        assert_eq!(dets[1].width, 200.0);
        assert_eq!(dets[1].height, 200.0);
    }

    #[test]
    fn no_metadata_node_falls_back_to_yolo_camera_id() {
        let arr = blob_with_yolo(json!({
            "camera_id": "dev-B:cam-9",
            "detections": []
        }));
        let extracted = extract(&arr);
        assert_eq!(extracted.device_id, Some("dev-B".to_string()));
        assert_eq!(extracted.camera_id, Some("dev-B:cam-9".to_string()));
        assert_eq!(extracted.location, None);
    }

    #[test]
    fn absent_yolo_node_yields_all_nulls_and_zero_count() {
        let arr = vec![json!({"Metadata": "1"}), json!([{"data": {"main": [[{"json": {}}]]}}])];
        let extracted = extract(&arr);
        assert_eq!(extracted.detection_count, 0);
        assert!(!extracted.has_smoke);
        assert!(extracted.alert_level.is_none());
        assert!(extracted.model_version.is_none());
        assert!(extracted.max_confidence.is_none());
    }

    #[test]
    fn reference_cycle_degrades_to_null_without_panicking() {
        // arr[2] and arr[3] point at each other; YOLO Inference resolves fine.
        let arr = vec![
            json!({"YOLO Inference": "1", "Metadata": "2"}),
            json!([{"data": {"main": [[{"json": {"alert_level": "medium", "detections": []}}]]}}]),
            json!("3"),
            json!("2"),
        ];
        let extracted = extract(&arr);
        assert_eq!(extracted.alert_level, Some(AlertLevel::Medium));
        // Metadata's cycle resolves to a string, not an object, so every
        // metadata-derived field degrades to None rather than panicking.
        assert!(extracted.device_id.is_none());
        assert!(extracted.location.is_none());
    }

    #[test]
    fn legacy_xywh_bbox_preserved() {
        let arr = blob_with_yolo(json!({
            "detections": [{"class": "fire", "confidence": "0.5", "x": 1, "y": 2, "w": 3, "h": 4}]
        }));
        let dets = extract(&arr).detections.unwrap();
        assert_eq!(dets[0].class_name, "fire");
        assert_eq!(dets[0].confidence, 0.5);
        assert_eq!((dets[0].x, dets[0].y, dets[0].width, dets[0].height), (1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn missing_class_name_defaults_to_unknown_but_confidence_parse_failure_defaults_to_zero() {
        let arr = blob_with_yolo(json!({
            "detections": [{"confidence": "not-a-number", "x": 0, "y": 0, "width": 0, "height": 0}]
        }));
        let dets = extract(&arr).detections.unwrap();
        assert_eq!(dets[0].class_name, "unknown");
        assert_eq!(dets[0].confidence, 0.0);
    }

    #[test]
    fn capture_timestamp_normalizes_underscored_form() {
        let ts = normalize_capture_timestamp("2026-07-27_14-30-05").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-07-27T14:30:05+00:00");
    }

    #[test]
    fn capture_timestamp_malformed_yields_none_not_synthetic() {
        assert!(normalize_capture_timestamp("not-a-timestamp").is_none());
        assert!(normalize_capture_timestamp("2026-07-27").is_none());
    }

    #[test]
    fn image_hash_requires_exactly_64_hex_chars() {
        let hash = "a".repeat(64);
        let descriptor = json!({"storage": format!("filesystem-v2:ab/{hash}.jpg")});
        assert_eq!(extract_image_hash(&descriptor), Some(hash));

        let short = json!({"storage": "filesystem-v2:ab/notahash.jpg"});
        assert!(extract_image_hash(&short).is_none());

        let unknown_scheme = json!({"storage": "s3:bucket/key"});
        assert!(extract_image_hash(&unknown_scheme).is_none());
    }

    #[test]
    fn empty_detections_list_yields_none_but_zero_count() {
        let arr = blob_with_yolo(json!({"detections": []}));
        let extracted = extract(&arr);
        assert!(extracted.detections.is_none());
        assert_eq!(extracted.detection_count, 0);
        assert!(extracted.max_confidence.is_none());
    }
}
