//! Pure calculation functions for derivative geometry.
//!
//! All functions here are pure and testable without any I/O or images.
//! Ratios are compared with integer cross-multiplication so that results do
//! not depend on floating point rounding; only the focus point is a float.

use super::params::{CropBox, FocusPoint};
use thiserror::Error;

/// Rejected transform geometry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("source dimensions must be positive, got {width}x{height}")]
    EmptySource { width: u32, height: u32 },
    #[error("{field} must be a positive integer, got {value}")]
    NonPositive { field: &'static str, value: i64 },
    #[error("output {width}x{height} exceeds the {max}px limit per side")]
    TooLarge { width: u32, height: u32, max: u32 },
}

fn check_source(width: u32, height: u32) -> Result<(), GeometryError> {
    if width == 0 || height == 0 {
        return Err(GeometryError::EmptySource { width, height });
    }
    Ok(())
}

fn check_positive(field: &'static str, value: Option<u32>) -> Result<(), GeometryError> {
    match value {
        Some(0) => Err(GeometryError::NonPositive { field, value: 0 }),
        _ => Ok(()),
    }
}

/// Reject output dimensions with a side longer than `max`.
pub fn check_output_size(dims: (u32, u32), max: u32) -> Result<(), GeometryError> {
    let (width, height) = dims;
    if width > max || height > max {
        return Err(GeometryError::TooLarge { width, height, max });
    }
    Ok(())
}

/// Calculate output dimensions for a resize.
///
/// - Both targets given: the exact box is returned, aspect ratio is not kept.
/// - One target given: the other side follows the source aspect ratio, rounded.
/// - Neither given: the source dimensions (no resize).
///
/// A derived side never drops below 1 pixel.
///
/// # Examples
/// ```
/// # use folio::imaging::calculate_resize_dimensions;
/// assert_eq!(calculate_resize_dimensions((100, 200), Some(50), None), Ok((50, 100)));
/// assert_eq!(calculate_resize_dimensions((100, 200), None, Some(50)), Ok((25, 50)));
/// assert_eq!(calculate_resize_dimensions((100, 200), Some(50), Some(80)), Ok((50, 80)));
/// ```
pub fn calculate_resize_dimensions(
    source: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
) -> Result<(u32, u32), GeometryError> {
    let (src_w, src_h) = source;
    check_source(src_w, src_h)?;
    check_positive("width", width)?;
    check_positive("height", height)?;

    let dims = match (width, height) {
        (Some(w), Some(h)) => (w, h),
        (Some(w), None) => {
            let h = (w as f64 / src_w as f64 * src_h as f64).round() as u32;
            (w, h.max(1))
        }
        (None, Some(h)) => {
            let w = (h as f64 / src_h as f64 * src_w as f64).round() as u32;
            (w.max(1), h)
        }
        (None, None) => (src_w, src_h),
    };
    Ok(dims)
}

/// Calculate the crop box that gives the `crop_width:crop_height` aspect ratio.
///
/// The excess of whichever side is relatively too long is removed, and the
/// focus point decides where the kept window sits along that side (0.0 keeps
/// the start, 1.0 keeps the end). The other side is kept whole.
///
/// Focus values outside `[0, 1]` would place the window partly outside the
/// source; the box is translated back inside the source bounds instead.
///
/// # Examples
/// ```
/// # use folio::imaging::{calculate_crop_box, CropBox, FocusPoint};
/// // 2:1 landscape cropped to a square keeps the middle 100px columns.
/// let b = calculate_crop_box((200, 100), (100, 100), FocusPoint::CENTER).unwrap();
/// assert_eq!(b, CropBox { left: 50, top: 0, right: 150, bottom: 100 });
/// ```
pub fn calculate_crop_box(
    source: (u32, u32),
    crop: (u32, u32),
    focus: FocusPoint,
) -> Result<CropBox, GeometryError> {
    let (src_w, src_h) = source;
    let (crop_w, crop_h) = crop;
    check_source(src_w, src_h)?;
    check_positive("crop_width", Some(crop_w))?;
    check_positive("crop_height", Some(crop_h))?;

    // crop_w / crop_h > src_w / src_h
    let crop_is_wider = crop_w as u64 * src_h as u64 > src_w as u64 * crop_h as u64;

    let crop_box = if crop_is_wider {
        // Source is relatively taller: trim rows
        let new_h = ((src_w as u64 * crop_h as u64) / crop_w as u64).max(1) as u32;
        let top = offset_along(src_h, new_h, focus.y());
        CropBox {
            left: 0,
            top,
            right: src_w,
            bottom: top + new_h,
        }
    } else {
        // Source is relatively wider (or equal): trim columns
        let new_w = ((src_h as u64 * crop_w as u64) / crop_h as u64).max(1) as u32;
        let left = offset_along(src_w, new_w, focus.x());
        CropBox {
            left,
            top: 0,
            right: left + new_w,
            bottom: src_h,
        }
    };
    Ok(crop_box)
}

/// Start offset of a `window`-long span on a `total`-long side.
///
/// `floor((total - window) * focus)`, clamped to `[0, total - window]`.
fn offset_along(total: u32, window: u32, focus: f64) -> u32 {
    let slack = total.saturating_sub(window);
    let offset = (slack as f64 * focus).floor();
    offset.clamp(0.0, slack as f64) as u32
}

/// One entry of a responsive breakpoint ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakpoint {
    pub width: u32,
    pub height: u32,
}

/// Calculate the breakpoints to advertise for a display box.
///
/// The ladder is walked in order and truncated at the first breakpoint wider
/// than the display; nothing past it is considered even if later entries
/// would fit. Heights are `floor(bp / aspect)`, computed exactly, and never
/// below 1.
///
/// # Examples
/// ```
/// # use folio::imaging::calculate_breakpoints;
/// let ladder = [320, 480, 640, 768, 1024];
/// let widths: Vec<u32> = calculate_breakpoints((700, 350), &ladder)
///     .iter()
///     .map(|bp| bp.width)
///     .collect();
/// assert_eq!(widths, vec![320, 480, 640]);
/// ```
pub fn calculate_breakpoints(display: (u32, u32), ladder: &[u32]) -> Vec<Breakpoint> {
    let (display_w, display_h) = display;
    if display_w == 0 || display_h == 0 {
        return Vec::new();
    }

    ladder
        .iter()
        .take_while(|&&bp| bp <= display_w)
        .map(|&bp| Breakpoint {
            width: bp,
            height: ((bp as u64 * display_h as u64 / display_w as u64) as u32).max(1),
        })
        .collect()
}
