//! Image materializer.
//!
//! An abstract async trait plus a concrete filesystem implementation, so
//! worker-loop tests can swap in a fake that never touches a disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cinderwatch_core::types::ImageResult;
use serde_json::Value;
use tracing::warn;

use crate::error::ImageError;

/// Configuration governing where images are read from and written to,
/// and the quality/size knobs for the derived variants.
#[derive(Debug, Clone)]
pub struct ImageMaterializerConfig {
    pub binary_data_root: PathBuf,
    pub image_cache_root: PathBuf,
    pub thumbnail_max_width: u32,
    pub thumbnail_quality: f32,
    pub webp_quality: f32,
}

impl Default for ImageMaterializerConfig {
    fn default() -> Self {
        Self {
            binary_data_root: PathBuf::from("/data/n8n/binary"),
            image_cache_root: PathBuf::from("/data/image-cache"),
            thumbnail_max_width: 320,
            thumbnail_quality: 70.0,
            webp_quality: 80.0,
        }
    }
}

/// Abstraction over "take a webhook binary descriptor, produce three
/// stored variants." Exists mainly so worker-loop tests can swap in a
/// fake that never touches a disk.
#[async_trait]
pub trait ImageMaterializer: Send + Sync {
    async fn materialize(&self, descriptor: &Value, execution_id: i64) -> Option<ImageResult>;
}

/// Filesystem-backed implementation reading from a content-addressable
/// binary-data root and writing the partitioned `<variant>/<partition>/
/// <id>.<ext>` layout.
pub struct FilesystemImageMaterializer {
    config: ImageMaterializerConfig,
}

impl FilesystemImageMaterializer {
    pub fn new(config: ImageMaterializerConfig) -> Self {
        Self { config }
    }

    async fn materialize_inner(
        &self,
        descriptor: &Value,
        execution_id: i64,
    ) -> Result<ImageResult, ImageError> {
        let relpath = parse_filesystem_v2_path(descriptor)?;
        let source_path = self.config.binary_data_root.join(relpath);

        let bytes = tokio::fs::read(&source_path).await?;
        let decoded = image::load_from_memory(&bytes)?;
        let (width, height) = (decoded.width(), decoded.height());

        let partition = execution_id / 1000;
        let original_rel = format!("original/{partition}/{execution_id}.jpg");
        let webp_rel = format!("webp/{partition}/{execution_id}.webp");
        let thumb_rel = format!("thumb/{partition}/{execution_id}.webp");

        let original_abs = self.config.image_cache_root.join(&original_rel);
        let webp_abs = self.config.image_cache_root.join(&webp_rel);
        let thumb_abs = self.config.image_cache_root.join(&thumb_rel);

        create_parent_dir(&original_abs).await?;
        create_parent_dir(&webp_abs).await?;
        create_parent_dir(&thumb_abs).await?;

        // Original bytes are written through unchanged — no re-encode.
        tokio::fs::write(&original_abs, &bytes).await?;

        let webp_bytes = encode_webp(&decoded, self.config.webp_quality)?;
        tokio::fs::write(&webp_abs, &webp_bytes).await?;

        let thumbnail = resize_for_thumbnail(&decoded, self.config.thumbnail_max_width);
        let thumb_bytes = encode_webp(&thumbnail, self.config.thumbnail_quality)?;
        tokio::fs::write(&thumb_abs, &thumb_bytes).await?;

        Ok(ImageResult {
            original_path: original_rel,
            webp_path: webp_rel,
            thumb_path: thumb_rel,
            byte_size: bytes.len() as i64,
            width: width as i32,
            height: height as i32,
        })
    }
}

#[async_trait]
impl ImageMaterializer for FilesystemImageMaterializer {
    async fn materialize(&self, descriptor: &Value, execution_id: i64) -> Option<ImageResult> {
        match self.materialize_inner(descriptor, execution_id).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(execution_id, error = %e, "image materialization skipped");
                None
            }
        }
    }
}

fn parse_filesystem_v2_path(descriptor: &Value) -> Result<String, ImageError> {
    let storage = descriptor
        .get("storage")
        .and_then(|v| v.as_str())
        .ok_or(ImageError::MissingField("storage"))?;

    storage
        .strip_prefix("filesystem-v2:")
        .map(str::to_string)
        .ok_or_else(|| ImageError::UnsupportedScheme(storage.to_string()))
}

async fn create_parent_dir(path: &Path) -> Result<(), ImageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}

fn encode_webp(img: &image::DynamicImage, quality: f32) -> Result<Vec<u8>, ImageError> {
    let rgba = img.to_rgba8();
    let encoder = webp::Encoder::from_rgba(&rgba, rgba.width(), rgba.height());
    let encoded = encoder.encode(quality);
    Ok(encoded.to_vec())
}

/// Resize to at most `max_width` wide, preserving aspect ratio, without
/// ever upscaling an image that is already narrower than `max_width`.
fn resize_for_thumbnail(img: &image::DynamicImage, max_width: u32) -> image::DynamicImage {
    if img.width() <= max_width {
        return img.clone();
    }
    let ratio = max_width as f64 / img.width() as f64;
    let target_height = (img.height() as f64 * ratio).round().max(1.0) as u32;
    img.resize(max_width, target_height, image::imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn materializes_three_variants_with_correct_partition() {
        let binary_root = TempDir::new().unwrap();
        let cache_root = TempDir::new().unwrap();

        let relpath = "ab/cd/image.jpg";
        let abs_source = binary_root.path().join(relpath);
        tokio::fs::create_dir_all(abs_source.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&abs_source, sample_jpeg_bytes(1920, 1080))
            .await
            .unwrap();

        let materializer = FilesystemImageMaterializer::new(ImageMaterializerConfig {
            binary_data_root: binary_root.path().to_path_buf(),
            image_cache_root: cache_root.path().to_path_buf(),
            ..ImageMaterializerConfig::default()
        });

        let descriptor = json!({"storage": format!("filesystem-v2:{relpath}"), "mimeType": "image/jpeg"});
        let result = materializer.materialize(&descriptor, 42_042).await.unwrap();

        assert_eq!(result.original_path, "original/42/42042.jpg");
        assert_eq!(result.webp_path, "webp/42/42042.webp");
        assert_eq!(result.thumb_path, "thumb/42/42042.webp");
        assert_eq!(result.width, 1920);
        assert_eq!(result.height, 1080);
        assert!(cache_root.path().join(&result.original_path).exists());
        assert!(cache_root.path().join(&result.webp_path).exists());
        assert!(cache_root.path().join(&result.thumb_path).exists());
    }

    #[tokio::test]
    async fn missing_file_returns_none_not_err() {
        let binary_root = TempDir::new().unwrap();
        let cache_root = TempDir::new().unwrap();
        let materializer = FilesystemImageMaterializer::new(ImageMaterializerConfig {
            binary_data_root: binary_root.path().to_path_buf(),
            image_cache_root: cache_root.path().to_path_buf(),
            ..ImageMaterializerConfig::default()
        });

        let descriptor = json!({"storage": "filesystem-v2:nope/missing.jpg"});
        let result = materializer.materialize(&descriptor, 7).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn unknown_scheme_returns_none() {
        let binary_root = TempDir::new().unwrap();
        let cache_root = TempDir::new().unwrap();
        let materializer = FilesystemImageMaterializer::new(ImageMaterializerConfig {
            binary_data_root: binary_root.path().to_path_buf(),
            image_cache_root: cache_root.path().to_path_buf(),
            ..ImageMaterializerConfig::default()
        });

        let descriptor = json!({"storage": "s3:bucket/key.jpg"});
        assert!(materializer.materialize(&descriptor, 7).await.is_none());
    }

    #[test]
    fn thumbnail_never_upscales() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(100, 50));
        let thumb = resize_for_thumbnail(&img, 320);
        assert_eq!(thumb.width(), 100);
        assert_eq!(thumb.height(), 50);
    }

    #[test]
    fn thumbnail_downscales_preserving_aspect_ratio() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(1920, 960));
        let thumb = resize_for_thumbnail(&img, 320);
        assert_eq!(thumb.width(), 320);
        assert_eq!(thumb.height(), 160);
    }
}
