//! Error taxonomy for derivative requests.
//!
//! Every failure is terminal for the request that triggered it; nothing is
//! retried internally. The variants split along who is at fault, which is
//! what an HTTP layer needs to pick a status code:
//!
//! | Variant | Cause | Status |
//! |---|---|---|
//! | [`InvalidGeometry`](TransformError::InvalidGeometry) | non-positive sizes | 400 |
//! | [`InvalidRequest`](TransformError::InvalidRequest) | malformed parameters, ids, page numbers | 400 |
//! | [`NotFound`](TransformError::NotFound) | unknown image id | 404 |
//! | [`Conversion`](TransformError::Conversion) | PDF rasterization failed | 500 |
//! | [`Encode`](TransformError::Encode) | output format cannot hold the pixels, or is unknown | 500 |
//! | [`Decode`](TransformError::Decode) | stored reference raster is unreadable | 500 |
//! | [`Storage`](TransformError::Storage) | blob store I/O failed | 500 |
//!
//! Derivative cache failures are deliberately absent: the cache is best
//! effort and its errors are logged, never returned.

use crate::imaging::{BackendError, GeometryError, UnsupportedFormat};
use crate::rasterize::ConversionError;
use crate::request::ImageId;
use thiserror::Error;

/// All errors returned by pipeline operations.
#[derive(Debug, Error)]
pub enum TransformError {
    // ── Client errors ─────────────────────────────────────────────────────
    #[error("invalid geometry: {0}")]
    InvalidGeometry(#[from] GeometryError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("image '{0}' not found")]
    NotFound(ImageId),

    // ── Server errors ─────────────────────────────────────────────────────
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("reference image unreadable: {0}")]
    Decode(String),

    #[error("blob store error: {0}")]
    Storage(#[from] std::io::Error),
}

impl TransformError {
    /// True when the request itself is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TransformError::InvalidGeometry(_)
                | TransformError::InvalidRequest(_)
                | TransformError::NotFound(_)
        )
    }

    /// HTTP status an HTTP layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            TransformError::InvalidGeometry(_) | TransformError::InvalidRequest(_) => 400,
            TransformError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

impl From<BackendError> for TransformError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Decode(detail) => TransformError::Decode(detail),
            other => TransformError::Encode(other.to_string()),
        }
    }
}

impl From<UnsupportedFormat> for TransformError {
    fn from(err: UnsupportedFormat) -> Self {
        TransformError::Encode(err.to_string())
    }
}
