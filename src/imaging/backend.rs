//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations every backend must
//! support: identify (read dimensions from encoded bytes) and render (crop,
//! resize and encode one derivative).
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Backends work on in-memory byte buffers; where the bytes come from
//! (blob store) and where they go (derivative cache) is the pipeline's concern.

use super::params::{OutputFormat, RenderParams};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to decode reference image: {0}")]
    Decode(String),
    #[error("{format} cannot represent {color} pixel data")]
    UnsupportedPixels { format: OutputFormat, color: String },
    #[error("{format} encode failed: {detail}")]
    Encode { format: OutputFormat, detail: String },
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Trait for image processing backends.
///
/// `Send + Sync` so a single backend can serve concurrent renders.
pub trait ImageBackend: Send + Sync {
    /// Read the dimensions of an encoded image without a full decode.
    fn identify(&self, source: &[u8]) -> Result<Dimensions, BackendError>;

    /// Decode `source`, apply the crop then the resize, and encode.
    fn render(&self, source: &[u8], params: &RenderParams) -> Result<Vec<u8>, BackendError>;
}
