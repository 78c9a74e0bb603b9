//! High-level image operations.
//!
//! These functions combine calculations with backend execution.
//! They take a request, compute parameters, and call the backend.

use super::backend::{Dimensions, ImageBackend};
use super::calculations::{
    GeometryError, calculate_crop_box, calculate_resize_dimensions, check_output_size,
};
use super::params::{Quality, RenderParams};
use crate::error::TransformError;
use crate::request::TransformRequest;
use tracing::debug;

/// Longest output side a resize may produce, by default.
pub const DEFAULT_MAX_DIMENSION: u32 = 8192;

/// Encoder settings that are not part of a request (and so not part of its
/// cache key): they are fixed per deployment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeSettings {
    pub quality: Quality,
    pub avif_speed: u8,
    /// Upper bound on each side of a resized output.
    pub max_dimension: u32,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            avif_speed: 6,
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

/// Get image dimensions using the backend.
pub fn get_dimensions(
    backend: &impl ImageBackend,
    source: &[u8],
) -> Result<Dimensions, TransformError> {
    Ok(backend.identify(source)?)
}

/// Plan a derivative without executing it.
///
/// The crop (when both crop sides are given) is computed against the source;
/// the resize is computed against the cropped size, since cropping always
/// happens first. A resize beyond `settings.max_dimension` on either side is
/// rejected before any pixel buffer is allocated.
pub fn plan_render(
    source: Dimensions,
    request: &TransformRequest,
    settings: &EncodeSettings,
) -> Result<RenderParams, GeometryError> {
    let crop = request
        .crop()
        .map(|crop| calculate_crop_box(source.as_tuple(), crop, request.focus))
        .transpose()?;

    let cropped = crop
        .map(|c| (c.width(), c.height()))
        .unwrap_or(source.as_tuple());

    let resize = if request.has_resize() {
        let dims = calculate_resize_dimensions(cropped, request.width, request.height)?;
        check_output_size(dims, settings.max_dimension)?;
        Some(dims)
    } else {
        None
    };

    Ok(RenderParams {
        crop,
        resize,
        format: request.format,
        quality: settings.quality,
        avif_speed: settings.avif_speed,
    })
}

/// Produce the encoded bytes of one derivative from reference image bytes.
pub fn create_derivative(
    backend: &impl ImageBackend,
    source: &[u8],
    request: &TransformRequest,
    settings: &EncodeSettings,
) -> Result<Vec<u8>, TransformError> {
    let dims = backend.identify(source)?;
    let params = plan_render(dims, request, settings)?;
    debug!(
        key = %request.cache_key(),
        crop = ?params.crop,
        resize = ?params.resize,
        "planned derivative"
    );
    Ok(backend.render(source, &params)?)
}
