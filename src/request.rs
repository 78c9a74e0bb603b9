//! Transform requests, their cache keys, and their URL form.
//!
//! A [`TransformRequest`] is the complete description of one derivative. It
//! is fully determined by its field values, which is what makes
//! [`TransformRequest::cache_key`] sound: the key is just those values
//! written out in a fixed order.
//!
//! ## Cache key layout
//!
//! ```text
//! {image_id}_{format}_{width}_{height}_{crop_width}_{crop_height}_{focus_x}_{focus_y}
//! 3f9a…_webp_640_480___0.5_0.5
//! ```
//!
//! Absent sizes are written as the empty string, which no present value can
//! produce (present sizes are positive integers). None of the fields can
//! contain `_`: ids are restricted to ASCII alphanumerics and `-`, format
//! names are fixed lowercase words, and numbers print as digits, `.` and
//! `-`. Splitting a key on `_` therefore recovers every field, so two
//! requests share a key exactly when they are equal.
//!
//! The same values drive the query string ([`TransformRequest::query_string`])
//! that HTTP consumers and the [`responsive`](crate::responsive) generator
//! build URLs from, and [`TransformRequest::from_query`] parses it back.

use crate::error::TransformError;
use crate::imaging::{FocusPoint, GeometryError, OutputFormat};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Longest accepted image id.
const MAX_ID_LEN: usize = 128;

/// Hex digits kept from the page digest.
const PAGE_ID_LEN: usize = 32;

/// Opaque identifier of a reference image in the blob store.
///
/// Non-empty, at most 128 characters, ASCII alphanumerics and `-` only, so
/// it is safe both as a cache key component and as a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Result<Self, TransformError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_ID_LEN {
            return Err(TransformError::InvalidRequest(format!(
                "image id must be 1-{MAX_ID_LEN} characters, got {}",
                id.len()
            )));
        }
        if let Some(bad) = id.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
            return Err(TransformError::InvalidRequest(format!(
                "image id '{id}' contains '{bad}'; only letters, digits and '-' are allowed"
            )));
        }
        Ok(Self(id))
    }

    /// Content-addressed id of one page of a PDF.
    ///
    /// Uploading the same document again yields the same id, so a page is
    /// only ever rasterized once.
    pub fn for_pdf_page(pdf: &[u8], page: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"pdf-page\0");
        hasher.update(page.to_le_bytes());
        hasher.update(pdf);
        let mut hex = format!("{:x}", hasher.finalize());
        hex.truncate(PAGE_ID_LEN);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ImageId {
    type Error = TransformError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ImageId> for String {
    fn from(id: ImageId) -> Self {
        id.0
    }
}

/// One derivative: which reference image, how to crop and size it, and
/// which encoding to serve.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformRequest {
    pub image_id: ImageId,
    pub format: OutputFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub crop_width: Option<u32>,
    pub crop_height: Option<u32>,
    pub focus: FocusPoint,
}

impl TransformRequest {
    /// The identity derivative: source size, centered focus, WebP.
    pub fn new(image_id: ImageId) -> Self {
        Self {
            image_id,
            format: OutputFormat::default(),
            width: None,
            height: None,
            crop_width: None,
            crop_height: None,
            focus: FocusPoint::CENTER,
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_crop(mut self, crop_width: u32, crop_height: u32) -> Self {
        self.crop_width = Some(crop_width);
        self.crop_height = Some(crop_height);
        self
    }

    pub fn with_focus(mut self, focus: FocusPoint) -> Self {
        self.focus = focus;
        self
    }

    /// Crop dimensions, only when both sides were given.
    pub fn crop(&self) -> Option<(u32, u32)> {
        self.crop_width.zip(self.crop_height)
    }

    /// Whether a resize was asked for.
    pub fn has_resize(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }

    /// Deterministic cache key; also used as the on-disk storage name.
    pub fn cache_key(&self) -> String {
        fn opt(value: Option<u32>) -> String {
            value.map(|v| v.to_string()).unwrap_or_default()
        }

        format!(
            "{}_{}_{}_{}_{}_{}_{}_{}",
            self.image_id,
            self.format,
            opt(self.width),
            opt(self.height),
            opt(self.crop_width),
            opt(self.crop_height),
            self.focus.x(),
            self.focus.y(),
        )
    }

    /// Query string addressing this derivative, without the leading `?`.
    ///
    /// Focus is only written when it can matter: when a crop is requested or
    /// the point is not the default center.
    pub fn query_string(&self) -> String {
        let mut params: Vec<String> = Vec::new();
        let sizes = [
            ("width", self.width),
            ("height", self.height),
            ("crop_width", self.crop_width),
            ("crop_height", self.crop_height),
        ];
        for (name, value) in sizes {
            if let Some(v) = value {
                params.push(format!("{name}={v}"));
            }
        }
        if self.crop().is_some() || self.focus != FocusPoint::CENTER {
            params.push(format!("focus_x={}", self.focus.x()));
            params.push(format!("focus_y={}", self.focus.y()));
        }
        params.push(format!("format={}", self.format));
        params.join("&")
    }

    /// Absolute URL of this derivative under `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}?{}", base_url, self.query_string())
    }

    /// Parse already-decoded query parameters.
    ///
    /// Unknown parameters are ignored and the first occurrence of a repeated
    /// parameter wins. Empty values count as absent. `format` defaults to
    /// WebP and the focus to the center.
    pub fn from_query<'a, I>(image_id: ImageId, pairs: I) -> Result<Self, TransformError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut format: Option<&str> = None;
        let mut sizes: [Option<&str>; 4] = [None; 4];
        let mut focus: [Option<&str>; 2] = [None; 2];

        for (name, value) in pairs {
            if value.is_empty() {
                continue;
            }
            let slot = match name {
                "format" => &mut format,
                "width" => &mut sizes[0],
                "height" => &mut sizes[1],
                "crop_width" => &mut sizes[2],
                "crop_height" => &mut sizes[3],
                "focus_x" => &mut focus[0],
                "focus_y" => &mut focus[1],
                _ => continue,
            };
            slot.get_or_insert(value);
        }

        let format = match format {
            Some(name) => name.parse::<OutputFormat>()?,
            None => OutputFormat::default(),
        };
        let focus_x = parse_focus("focus_x", focus[0])?;
        let focus_y = parse_focus("focus_y", focus[1])?;
        let focus = FocusPoint::new(focus_x, focus_y)
            .map_err(|e| TransformError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            image_id,
            format,
            width: parse_size("width", sizes[0])?,
            height: parse_size("height", sizes[1])?,
            crop_width: parse_size("crop_width", sizes[2])?,
            crop_height: parse_size("crop_height", sizes[3])?,
            focus,
        })
    }
}

fn parse_size(field: &'static str, raw: Option<&str>) -> Result<Option<u32>, TransformError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: i64 = raw.trim().parse().map_err(|_| {
        TransformError::InvalidRequest(format!("{field} must be an integer, got '{raw}'"))
    })?;
    if value <= 0 {
        return Err(GeometryError::NonPositive { field, value }.into());
    }
    u32::try_from(value)
        .map(Some)
        .map_err(|_| TransformError::InvalidRequest(format!("{field} is too large: {value}")))
}

fn parse_focus(field: &'static str, raw: Option<&str>) -> Result<f64, TransformError> {
    let Some(raw) = raw else {
        return Ok(0.5);
    };
    let value: f64 = raw.trim().parse().map_err(|_| {
        TransformError::InvalidRequest(format!("{field} must be a number, got '{raw}'"))
    })?;
    if !value.is_finite() {
        return Err(TransformError::InvalidRequest(format!(
            "{field} must be finite, got '{raw}'"
        )));
    }
    Ok(value)
}
