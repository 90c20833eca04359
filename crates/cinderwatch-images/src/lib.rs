//! Image materialization: reads webhook-borne source images off a
//! content-addressable filesystem and writes original/web/thumbnail
//! variants under a partitioned path layout.

pub mod error;
pub mod materializer;

pub use error::ImageError;
pub use materializer::{FilesystemImageMaterializer, ImageMaterializer, ImageMaterializerConfig};
