//! # folio
//!
//! Cropped and resized derivatives of rasterized PDF pages, served from a
//! deterministic cache.
//!
//! An uploaded PDF page is rasterized once into a *reference image*. Every
//! image a page actually shows is a *derivative* of that reference: cropped
//! around a focus point, resized, and encoded in one of a fixed set of
//! formats. Derivatives are computed on demand and cached under a key that
//! fully describes them, so each distinct derivative is encoded once per
//! cache lifetime.
//!
//! # Architecture
//!
//! ```text
//! convert   PDF page   →  reference PNG     (rasterize → blob store)
//! render    request    →  derivative bytes  (cache → crop → resize → encode → cache)
//! responsive reference →  <img srcset>      (breakpoint ladder → request URLs)
//! ```
//!
//! Requests are plain values ([`request::TransformRequest`]) with a stable
//! [`cache_key`](request::TransformRequest::cache_key) and a URL form. The
//! responsive generator builds the same values the pipeline consumes, so
//! every URL it emits names exactly one cacheable derivative.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | Render, convert, prewarm: the operations the CLI and an HTTP layer call |
//! | [`request`] | `ImageId`, `TransformRequest`, cache keys and query strings |
//! | [`responsive`] | Breakpoint descriptors and `<img>` markup (Maud) |
//! | [`imaging`] | Geometry math, the `ImageBackend` trait and the pure-Rust backend |
//! | [`cache`] | Derivative cache trait with memory, disk and no-op implementations |
//! | [`store`] | Blob store for reference images |
//! | [`rasterize`] | PDF page rasterization (pdfium behind the `pdfium` feature) |
//! | [`inflight`] | Single-flight coordination of concurrent renders |
//! | [`config`] | `folio.toml` loading, merging and validation |
//! | [`error`] | `TransformError` and its HTTP status mapping |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## The Key Is the Derivative
//!
//! A request is fully determined by its field values and the cache key is
//! those values in a fixed order, with a separator no field can contain.
//! Entries therefore never need invalidation; they only expire.
//!
//! ## Crop Before Resize
//!
//! Cropping always happens on the full-resolution reference and resizing on
//! the crop. Requested sizes describe the final image, whatever was cut.
//!
//! ## Best-Effort Cache
//!
//! The cache only saves time. Its failures are logged and the request is
//! rendered as if it had missed.

pub mod cache;
pub mod config;
pub mod error;
pub mod imaging;
pub mod inflight;
pub mod output;
pub mod pipeline;
pub mod rasterize;
pub mod request;
pub mod responsive;
pub mod store;

pub use error::TransformError;
pub use pipeline::{ConvertedPage, Derivative, FsPipeline, Pipeline};
pub use request::{ImageId, TransformRequest};

#[cfg(test)]
pub(crate) mod test_helpers;
