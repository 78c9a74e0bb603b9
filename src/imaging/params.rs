//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the [`operations`](super::operations) module (which plans
//! a derivative from a request and the source dimensions) and the
//! [`backend`](super::backend) (which does the actual pixel work). This
//! separation allows swapping backends (e.g. for testing with a mock) without
//! changing the planning logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 90). Clamped on construction.
//! - [`OutputFormat`]: The fixed set of raster encodings a derivative can be served in.
//! - [`FocusPoint`]: Where a crop window is anchored, as fractions of the trimmed side.
//! - [`CropBox`]: A pixel rectangle in source coordinates.
//! - [`RenderParams`]: Full specification for one derivative: crop, resize, encoding.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(90)
    }
}

/// The requested output format name is not one of the supported encodings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported output format '{0}' (expected webp, png, jpeg, avif or tiff)")]
pub struct UnsupportedFormat(pub String);

/// Raster encodings a derivative can be served in.
///
/// Parsing is case-insensitive and accepts `jpg` as an alias for `jpeg`.
/// The canonical lowercase name ([`OutputFormat::name`]) is what appears in
/// cache keys and URLs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum OutputFormat {
    #[default]
    WebP,
    Png,
    Jpeg,
    Avif,
    Tiff,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::WebP,
        OutputFormat::Png,
        OutputFormat::Jpeg,
        OutputFormat::Avif,
        OutputFormat::Tiff,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::WebP => "webp",
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Avif => "avif",
            OutputFormat::Tiff => "tiff",
        }
    }

    /// MIME type for the `Content-Type` of a served derivative.
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::WebP => "image/webp",
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Avif => "image/avif",
            OutputFormat::Tiff => "image/tiff",
        }
    }

    /// Whether the encoding can carry an alpha channel.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, OutputFormat::Jpeg)
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            OutputFormat::WebP => image::ImageFormat::WebP,
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
            OutputFormat::Avif => image::ImageFormat::Avif,
            OutputFormat::Tiff => image::ImageFormat::Tiff,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webp" => Ok(OutputFormat::WebP),
            "png" => Ok(OutputFormat::Png),
            "jpeg" | "jpg" => Ok(OutputFormat::Jpeg),
            "avif" => Ok(OutputFormat::Avif),
            "tiff" | "tif" => Ok(OutputFormat::Tiff),
            _ => Err(UnsupportedFormat(s.to_string())),
        }
    }
}

impl TryFrom<String> for OutputFormat {
    type Error = UnsupportedFormat;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutputFormat> for String {
    fn from(format: OutputFormat) -> Self {
        format.name().to_string()
    }
}

/// A focus coordinate was NaN or infinite.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("focus coordinates must be finite numbers, got ({0}, {1})")]
pub struct NonFiniteFocus(pub f64, pub f64);

/// Anchor of a crop window, as fractions of the trimmed side.
///
/// `(0.5, 0.5)` centers the window. Values outside `[0, 1]` are accepted;
/// the crop calculation keeps the window inside the source regardless.
/// `-0.0` is stored as `0.0` so that equal points print identically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusPoint {
    x: f64,
    y: f64,
}

impl FocusPoint {
    pub const CENTER: FocusPoint = FocusPoint { x: 0.5, y: 0.5 };

    pub fn new(x: f64, y: f64) -> Result<Self, NonFiniteFocus> {
        if !x.is_finite() || !y.is_finite() {
            return Err(NonFiniteFocus(x, y));
        }
        Ok(Self {
            x: x + 0.0,
            y: y + 0.0,
        })
    }

    pub fn x(self) -> f64 {
        self.x
    }

    pub fn y(self) -> f64 {
        self.y
    }
}

impl Default for FocusPoint {
    fn default() -> Self {
        Self::CENTER
    }
}

/// Pixel rectangle in source coordinates; `right`/`bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl CropBox {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Everything the backend needs to produce one derivative.
///
/// The crop is applied first, then the resize to exactly
/// `resize` pixels, then the result is encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub crop: Option<CropBox>,
    pub resize: Option<(u32, u32)>,
    pub format: OutputFormat,
    pub quality: Quality,
    /// rav1e speed preset for AVIF (1 = slowest/best, 10 = fastest).
    pub avif_speed: u8,
}

impl RenderParams {
    /// Dimensions of the encoded output given the source dimensions.
    pub fn output_dimensions(&self, source: (u32, u32)) -> (u32, u32) {
        self.resize
            .or_else(|| self.crop.map(|c| (c.width(), c.height())))
            .unwrap_or(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_clamps_to_valid_range() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(50).value(), 50);
        assert_eq!(Quality::new(150).value(), 100);
    }

    #[test]
    fn quality_default_is_90() {
        assert_eq!(Quality::default().value(), 90);
    }

    #[test]
    fn format_parse_is_case_insensitive() {
        assert_eq!("WEBP".parse::<OutputFormat>(), Ok(OutputFormat::WebP));
        assert_eq!("Png".parse::<OutputFormat>(), Ok(OutputFormat::Png));
    }

    #[test]
    fn format_aliases() {
        assert_eq!("jpg".parse::<OutputFormat>(), Ok(OutputFormat::Jpeg));
        assert_eq!("tif".parse::<OutputFormat>(), Ok(OutputFormat::Tiff));
    }

    #[test]
    fn format_unknown_rejected() {
        assert_eq!(
            "gif".parse::<OutputFormat>(),
            Err(UnsupportedFormat("gif".into()))
        );
        assert!("".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn format_name_roundtrips() {
        for format in OutputFormat::ALL {
            assert_eq!(format.name().parse::<OutputFormat>(), Ok(format));
            assert!(format.mime_type().ends_with(format.name()));
        }
    }

    #[test]
    fn format_default_is_webp() {
        assert_eq!(OutputFormat::default(), OutputFormat::WebP);
    }

    #[test]
    fn only_jpeg_lacks_alpha() {
        assert!(!OutputFormat::Jpeg.supports_alpha());
        assert!(OutputFormat::Png.supports_alpha());
        assert!(OutputFormat::WebP.supports_alpha());
    }

    #[test]
    fn format_deserializes_from_toml_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: OutputFormat,
        }
        let w: Wrapper = toml::from_str(r#"format = "JPG""#).unwrap();
        assert_eq!(w.format, OutputFormat::Jpeg);
        assert!(toml::from_str::<Wrapper>(r#"format = "bmp""#).is_err());
    }

    #[test]
    fn focus_rejects_non_finite() {
        assert!(FocusPoint::new(f64::NAN, 0.5).is_err());
        assert!(FocusPoint::new(0.5, f64::INFINITY).is_err());
    }

    #[test]
    fn focus_accepts_out_of_range() {
        let f = FocusPoint::new(-1.5, 2.0).unwrap();
        assert_eq!((f.x(), f.y()), (-1.5, 2.0));
    }

    #[test]
    fn focus_normalizes_negative_zero() {
        let f = FocusPoint::new(-0.0, -0.0).unwrap();
        assert_eq!(f.x().to_string(), "0");
        assert!(f.x().is_sign_positive());
    }

    #[test]
    fn crop_box_size() {
        let b = CropBox {
            left: 10,
            top: 20,
            right: 110,
            bottom: 70,
        };
        assert_eq!((b.width(), b.height()), (100, 50));
    }

    #[test]
    fn output_dimensions_prefers_resize_then_crop() {
        let crop = CropBox {
            left: 0,
            top: 0,
            right: 50,
            bottom: 40,
        };
        let mut params = RenderParams {
            crop: Some(crop),
            resize: Some((10, 8)),
            format: OutputFormat::Png,
            quality: Quality::default(),
            avif_speed: 6,
        };
        assert_eq!(params.output_dimensions((200, 100)), (10, 8));
        params.resize = None;
        assert_eq!(params.output_dimensions((200, 100)), (50, 40));
        params.crop = None;
        assert_eq!(params.output_dimensions((200, 100)), (200, 100));
    }
}
