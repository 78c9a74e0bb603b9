//! CLI output formatting.
//!
//! Output is **information-first**: the primary line for each operation names
//! what was produced (image id, format, size), with file paths and URLs shown
//! as indented context lines.
//!
//! # Output Format
//!
//! ## Convert
//!
//! ```text
//! 3f9a0c…e1 report.pdf page 1 (2000x2829)
//!     Url: /image/3f9a0c…e1
//! ```
//!
//! ## Render
//!
//! ```text
//! 3f9a0c…e1 webp 640x480: encoded (48.2 KB)
//!     Output: hero.webp
//! ```
//!
//! ## Prewarm
//!
//! ```text
//! 3f9a0c…e1 800x800
//!     320w 480w 640w 768w
//! Cache: 2 cached, 3 encoded (5 total)
//! ```
//!
//! # Architecture
//!
//! Each operation has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::cache::CacheStats;
use crate::imaging::Dimensions;
use crate::pipeline::{ConvertedPage, Derivative};
use crate::request::TransformRequest;
use crate::responsive::ResponsiveImage;
use std::path::Path;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count.
fn format_size(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    let b = bytes as f64;
    if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Convert
// ============================================================================

pub fn format_convert_output(page: &ConvertedPage, base_url: &str) -> Vec<String> {
    vec![
        format!(
            "{} {} page {} ({}x{})",
            page.id, page.original_filename, page.page, page.width, page.height
        ),
        format!("{}Url: {}/{}", indent(1), base_url.trim_end_matches('/'), page.id),
    ]
}

pub fn print_convert_output(page: &ConvertedPage, base_url: &str) {
    for line in format_convert_output(page, base_url) {
        println!("{}", line);
    }
}

// ============================================================================
// Render
// ============================================================================

/// `dims` are the dimensions of the encoded derivative, when known.
pub fn format_render_output(
    request: &TransformRequest,
    derivative: &Derivative,
    dims: Option<Dimensions>,
    output: &Path,
) -> Vec<String> {
    let status = if derivative.cached { "cached" } else { "encoded" };
    let size = dims
        .map(|d| format!(" {}x{}", d.width, d.height))
        .unwrap_or_default();
    vec![
        format!(
            "{} {}{}: {} ({})",
            request.image_id,
            derivative.format,
            size,
            status,
            format_size(derivative.bytes.len())
        ),
        format!("{}Output: {}", indent(1), output.display()),
    ]
}

pub fn print_render_output(
    request: &TransformRequest,
    derivative: &Derivative,
    dims: Option<Dimensions>,
    output: &Path,
) {
    for line in format_render_output(request, derivative, dims, output) {
        println!("{}", line);
    }
}

// ============================================================================
// Prewarm
// ============================================================================

pub fn format_prewarm_output(image: &ResponsiveImage, stats: &CacheStats) -> Vec<String> {
    let widths: Vec<String> = image
        .descriptors
        .iter()
        .map(|d| format!("{}w", d.width))
        .collect();
    let mut lines = vec![format!(
        "{} {}x{}",
        image.default_request.image_id, image.display_width, image.display_height
    )];
    if !widths.is_empty() {
        lines.push(format!("{}{}", indent(1), widths.join(" ")));
    }
    lines.push(format!("Cache: {}", stats));
    lines
}

pub fn print_prewarm_output(image: &ResponsiveImage, stats: &CacheStats) {
    for line in format_prewarm_output(image, stats) {
        println!("{}", line);
    }
}
