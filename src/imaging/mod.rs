//! Image processing: pure Rust, statically linked.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **Crop** | focus-anchored box from [`calculate_crop_box`], `crop_imm` |
//! | **Resize** | [`calculate_resize_dimensions`], Lanczos3 |
//! | **Encode** | PNG, JPEG, WebP (lossless), AVIF (rav1e), TIFF |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension math (unit testable)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: High-level functions combining calculations + backend

pub mod backend;
mod calculations;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{
    Breakpoint, GeometryError, calculate_breakpoints, calculate_crop_box,
    calculate_resize_dimensions,
};
pub use operations::{
    DEFAULT_MAX_DIMENSION, EncodeSettings, create_derivative, get_dimensions, plan_render,
};
pub use params::{
    CropBox, FocusPoint, NonFiniteFocus, OutputFormat, Quality, RenderParams, UnsupportedFormat,
};
pub use rust_backend::{RustBackend, encode_reference};
