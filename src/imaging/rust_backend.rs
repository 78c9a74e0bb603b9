//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Identify | `image::ImageReader::into_dimensions` (header only) |
//! | Decode (PNG, JPEG, TIFF, WebP) | `image::load_from_memory` |
//! | Crop | `image::DynamicImage::crop_imm` |
//! | Resize | `image::DynamicImage::resize_exact` with `Lanczos3` filter |
//! | Encode → PNG / TIFF | `image::codecs::{png, tiff}` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (quality) |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed + quality) |

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::params::{OutputFormat, RenderParams};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tiff::TiffEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::io::Cursor;
use tracing::debug;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode an image held in memory, guessing the format from its magic bytes.
fn load_image(source: &[u8]) -> Result<DynamicImage, BackendError> {
    image::load_from_memory(source).map_err(|e| BackendError::Decode(e.to_string()))
}

/// Encode `img` in the requested format.
///
/// Pixel layouts the target cannot hold (alpha in JPEG) are refused up front
/// rather than silently flattened.
fn encode_image(img: &DynamicImage, params: &RenderParams) -> Result<Vec<u8>, BackendError> {
    let format = params.format;
    if img.color().has_alpha() && !format.supports_alpha() {
        return Err(BackendError::UnsupportedPixels {
            format,
            color: format!("{:?}", img.color()),
        });
    }

    let mut cursor = Cursor::new(Vec::new());
    let quality = params.quality.value() as u8;
    let result = match format {
        OutputFormat::Png => img.write_with_encoder(PngEncoder::new(&mut cursor)),
        OutputFormat::Jpeg => {
            img.write_with_encoder(JpegEncoder::new_with_quality(&mut cursor, quality))
        }
        OutputFormat::WebP => img.write_with_encoder(WebPEncoder::new_lossless(&mut cursor)),
        OutputFormat::Avif => img.write_with_encoder(AvifEncoder::new_with_speed_quality(
            &mut cursor,
            params.avif_speed,
            quality,
        )),
        OutputFormat::Tiff => img.write_with_encoder(TiffEncoder::new(&mut cursor)),
    };
    result.map_err(|e| BackendError::Encode {
        format,
        detail: e.to_string(),
    })?;

    Ok(cursor.into_inner())
}

/// The same pixels without an alpha channel when every pixel is fully
/// opaque, or `None` when the image has no alpha or uses it.
fn without_opaque_alpha(img: &DynamicImage) -> Option<DynamicImage> {
    match img {
        DynamicImage::ImageRgba8(buf) if buf.pixels().all(|p| p[3] == u8::MAX) => {
            Some(DynamicImage::ImageRgb8(img.to_rgb8()))
        }
        DynamicImage::ImageLumaA8(buf) if buf.pixels().all(|p| p[1] == u8::MAX) => {
            Some(DynamicImage::ImageLuma8(img.to_luma8()))
        }
        DynamicImage::ImageRgba16(buf) if buf.pixels().all(|p| p[3] == u16::MAX) => {
            Some(DynamicImage::ImageRgb16(img.to_rgb16()))
        }
        DynamicImage::ImageLumaA16(buf) if buf.pixels().all(|p| p[1] == u16::MAX) => {
            Some(DynamicImage::ImageLuma16(img.to_luma16()))
        }
        _ => None,
    }
}

/// Encode a rasterized page as the PNG reference kept in the blob store.
///
/// Rasterizers commonly hand back RGBA even for opaque pages. An alpha
/// channel that is fully opaque is dropped so the reference can still be
/// served in formats without alpha (JPEG).
pub fn encode_reference(img: &DynamicImage) -> Result<Vec<u8>, BackendError> {
    let opaque = without_opaque_alpha(img);
    let img = opaque.as_ref().unwrap_or(img);
    let params = RenderParams {
        crop: None,
        resize: None,
        format: OutputFormat::Png,
        quality: Default::default(),
        avif_speed: 6,
    };
    encode_image(img, &params)
}

impl ImageBackend for RustBackend {
    fn identify(&self, source: &[u8]) -> Result<Dimensions, BackendError> {
        let (width, height) = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| BackendError::Decode(e.to_string()))?
            .into_dimensions()
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(Dimensions { width, height })
    }

    fn render(&self, source: &[u8], params: &RenderParams) -> Result<Vec<u8>, BackendError> {
        let mut img = load_image(source)?;

        if let Some(crop) = params.crop {
            img = img.crop_imm(crop.left, crop.top, crop.width(), crop.height());
        }

        if let Some((width, height)) = params.resize {
            img = img.resize_exact(width, height, FilterType::Lanczos3);
        }

        debug!(
            width = img.width(),
            height = img.height(),
            format = %params.format,
            "encoding derivative"
        );
        encode_image(&img, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::{CropBox, Quality};
    use crate::test_helpers::{png_bytes, rgba_png_bytes};

    fn params(format: OutputFormat) -> RenderParams {
        RenderParams {
            crop: None,
            resize: None,
            format,
            quality: Quality::new(85),
            avif_speed: 10,
        }
    }

    #[test]
    fn identify_synthetic_png() {
        let backend = RustBackend::new();
        let dims = backend.identify(&png_bytes(200, 150)).unwrap();
        assert_eq!(dims.as_tuple(), (200, 150));
    }

    #[test]
    fn identify_garbage_errors() {
        let backend = RustBackend::new();
        let result = backend.identify(b"definitely not an image");
        assert!(matches!(result, Err(BackendError::Decode(_))));
    }

    #[test]
    fn render_garbage_errors() {
        let backend = RustBackend::new();
        let result = backend.render(b"nope", &params(OutputFormat::Png));
        assert!(matches!(result, Err(BackendError::Decode(_))));
    }

    #[test]
    fn render_crop_then_resize_dimensions() {
        let backend = RustBackend::new();
        let render = RenderParams {
            crop: Some(CropBox {
                left: 50,
                top: 0,
                right: 150,
                bottom: 100,
            }),
            resize: Some((40, 30)),
            ..params(OutputFormat::Png)
        };

        let bytes = backend.render(&png_bytes(200, 100), &render).unwrap();
        let dims = backend.identify(&bytes).unwrap();
        assert_eq!(dims.as_tuple(), (40, 30));
    }

    #[test]
    fn render_crop_only_dimensions() {
        let backend = RustBackend::new();
        let render = RenderParams {
            crop: Some(CropBox {
                left: 0,
                top: 25,
                right: 60,
                bottom: 85,
            }),
            ..params(OutputFormat::Png)
        };

        let bytes = backend.render(&png_bytes(60, 120), &render).unwrap();
        assert_eq!(backend.identify(&bytes).unwrap().as_tuple(), (60, 60));
    }

    #[test]
    fn render_every_format_from_rgb() {
        let backend = RustBackend::new();
        let source = png_bytes(64, 48);

        for format in OutputFormat::ALL {
            let render = RenderParams {
                resize: Some((32, 24)),
                ..params(format)
            };
            let bytes = backend.render(&source, &render).unwrap();
            assert!(!bytes.is_empty(), "{format} produced no bytes");
            assert_eq!(
                image::guess_format(&bytes).unwrap(),
                format.image_format(),
                "{format} produced the wrong container"
            );
        }
    }

    #[test]
    fn render_jpeg_with_alpha_is_refused() {
        let backend = RustBackend::new();
        let result = backend.render(&rgba_png_bytes(16, 16), &params(OutputFormat::Jpeg));
        assert!(matches!(
            result,
            Err(BackendError::UnsupportedPixels {
                format: OutputFormat::Jpeg,
                ..
            })
        ));
    }

    #[test]
    fn render_png_with_alpha_succeeds() {
        let backend = RustBackend::new();
        let bytes = backend
            .render(&rgba_png_bytes(16, 16), &params(OutputFormat::Png))
            .unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(decoded.color().has_alpha());
    }

    #[test]
    fn encode_reference_writes_png() {
        let img = DynamicImage::new_rgb8(30, 20);
        let bytes = encode_reference(&img).unwrap();
        assert_eq!(image::guess_format(&bytes).unwrap(), image::ImageFormat::Png);
        assert_eq!(
            RustBackend::new().identify(&bytes).unwrap().as_tuple(),
            (30, 20)
        );
    }

    #[test]
    fn encode_reference_drops_opaque_alpha() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            20,
            10,
            image::Rgba([255, 255, 255, 255]),
        ));
        let bytes = encode_reference(&img).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);

        let jpeg = RustBackend::new().render(&bytes, &params(OutputFormat::Jpeg));
        assert!(jpeg.is_ok());
    }

    #[test]
    fn encode_reference_keeps_real_transparency() {
        let mut buf = image::RgbaImage::from_pixel(20, 10, image::Rgba([0, 0, 0, 255]));
        buf.put_pixel(3, 3, image::Rgba([0, 0, 0, 0]));
        let bytes = encode_reference(&DynamicImage::ImageRgba8(buf)).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgba8);
    }

    #[test]
    fn encode_reference_drops_opaque_grey_alpha() {
        let img = DynamicImage::ImageLumaA8(image::GrayAlphaImage::from_pixel(
            4,
            4,
            image::LumaA([90, 255]),
        ));
        let bytes = encode_reference(&img).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.color(), image::ColorType::L8);
    }

    #[test]
    fn render_is_deterministic() {
        let backend = RustBackend::new();
        let source = png_bytes(120, 80);
        let render = RenderParams {
            resize: Some((60, 40)),
            ..params(OutputFormat::WebP)
        };
        let a = backend.render(&source, &render).unwrap();
        let b = backend.render(&source, &render).unwrap();
        assert_eq!(a, b);
    }
}
