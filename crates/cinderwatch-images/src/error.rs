/// Internal error type for the image materializer. Never surfaced to
/// callers directly — every public entry point collapses these into
/// `None` plus a `tracing::warn!`: an unreadable or undecodable image is
/// not fatal to the rest of the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("unsupported storage scheme: {0}")]
    UnsupportedScheme(String),

    #[error("missing descriptor field: {0}")]
    MissingField(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("webp encode error: {0}")]
    WebpEncode(String),
}
