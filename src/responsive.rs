//! Responsive image descriptors.
//!
//! Given the size of a reference image (or of the crop the page wants) this
//! module derives the family of derivative URLs a browser can choose from:
//! one per breakpoint of the ladder up to the display width, each with a
//! height that keeps the display aspect ratio. The result renders to a single
//! `<img srcset sizes>` fragment.
//!
//! Everything here is pure. URLs are built with the same query encoding the
//! pipeline parses ([`TransformRequest::query_string`]), so every URL emitted
//! here round-trips through [`TransformRequest::from_query`].

use crate::imaging::{Breakpoint, Dimensions, FocusPoint, OutputFormat, calculate_breakpoints};
use crate::request::{ImageId, TransformRequest};
use maud::{Markup, html};

/// Breakpoint widths advertised by default, ascending.
pub const DEFAULT_LADDER: [u32; 7] = [320, 480, 640, 768, 1024, 1280, 1536];

/// Alt text on generated `<img>` tags.
const ALT_TEXT: &str = "Responsive image";

/// Ladder and output format used for every descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsiveSettings {
    pub ladder: Vec<u32>,
    pub format: OutputFormat,
}

impl Default for ResponsiveSettings {
    fn default() -> Self {
        Self {
            ladder: DEFAULT_LADDER.to_vec(),
            format: OutputFormat::WebP,
        }
    }
}

impl ResponsiveSettings {
    /// The `sizes` attribute for this ladder: a `(max-width)` condition per
    /// breakpoint and the widest one as the fallback.
    pub fn sizes(&self) -> String {
        match self.ladder.split_last() {
            None => String::new(),
            Some((last, rest)) => rest
                .iter()
                .map(|bp| format!("(max-width: {bp}px) {bp}px"))
                .chain(std::iter::once(format!("{last}px")))
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// One `srcset` candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub width: u32,
    pub height: u32,
    pub url: String,
    pub request: TransformRequest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponsiveImage {
    /// Ascending by width.
    pub descriptors: Vec<Descriptor>,
    pub display_width: u32,
    pub display_height: u32,
    pub default_url: String,
    pub default_request: TransformRequest,
    pub sizes: String,
}

impl ResponsiveImage {
    /// `srcset` attribute value: `"<url> <w>w"` entries joined by `", "`.
    pub fn srcset(&self) -> String {
        self.descriptors
            .iter()
            .map(|d| format!("{} {}w", d.url, d.width))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Every distinct request this image refers to, the default included.
    pub fn requests(&self) -> Vec<&TransformRequest> {
        let mut requests: Vec<&TransformRequest> =
            self.descriptors.iter().map(|d| &d.request).collect();
        if !requests.contains(&&self.default_request) {
            requests.push(&self.default_request);
        }
        requests
    }

    /// The `<img>` fragment. `srcset` is omitted when no breakpoint fits.
    pub fn to_markup(&self) -> Markup {
        let srcset = Some(self.srcset()).filter(|s| !s.is_empty());
        html! {
            img src=(self.default_url)
                srcset=[srcset]
                sizes=(self.sizes)
                width=(self.display_width)
                height=(self.display_height)
                alt=(ALT_TEXT)
                loading="lazy";
        }
    }
}

/// Build the descriptor set for `image_id`.
///
/// `crop` only counts when both sides are positive; it then sets the display
/// size and is carried (with `focus`) on every URL. Without it the source
/// dimensions are used and the focus is dropped, since it cannot affect an
/// uncropped derivative.
pub fn describe(
    image_id: &ImageId,
    source: Dimensions,
    crop: Option<(u32, u32)>,
    focus: FocusPoint,
    base_url: &str,
    settings: &ResponsiveSettings,
) -> ResponsiveImage {
    let crop = crop.filter(|&(w, h)| w > 0 && h > 0);
    let (display_width, display_height) = crop.unwrap_or(source.as_tuple());

    let base = {
        let request = TransformRequest::new(image_id.clone()).with_format(settings.format);
        match crop {
            Some((w, h)) => request.with_crop(w, h).with_focus(focus),
            None => request,
        }
    };

    let descriptors = calculate_breakpoints((display_width, display_height), &settings.ladder)
        .into_iter()
        .map(|Breakpoint { width, height }| {
            let request = base.clone().with_size(Some(width), Some(height));
            Descriptor {
                width,
                height,
                url: request.url(base_url),
                request,
            }
        })
        .collect();

    let default_request = base.with_size(Some(display_width), Some(display_height));

    ResponsiveImage {
        descriptors,
        display_width,
        display_height,
        default_url: default_request.url(base_url),
        default_request,
        sizes: settings.sizes(),
    }
}
