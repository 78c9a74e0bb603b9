//! Shared test utilities for the folio test suite.
//!
//! Synthetic reference images, plus collaborators that count or fail so
//! pipeline tests can observe what happened without touching the disk.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let store = CountingBlobStore::new(MemoryBlobStore::new());
//! store.save(&ImageId::new("page").unwrap(), &png_bytes(64, 32)).unwrap();
//! let pipeline = Pipeline::new(store, MemoryCache::new());
//! // ...
//! assert_eq!(pipeline.store().loads(), 1);
//! ```

use std::io::{self, Cursor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

use crate::cache::{CacheError, DerivativeCache};
use crate::rasterize::{ConversionError, Rasterizer};
use crate::request::ImageId;
use crate::store::BlobStore;

// =========================================================================
// Synthetic images
// =========================================================================

fn encode_png(img: DynamicImage) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, ImageFormat::Png).unwrap();
    cursor.into_inner()
}

/// An opaque RGB PNG with a gradient, so crops of different regions differ.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    encode_png(DynamicImage::ImageRgb8(img))
}

/// A PNG with a half-transparent alpha channel.
pub fn rgba_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 128])
    });
    encode_png(DynamicImage::ImageRgba8(img))
}

// =========================================================================
// Collaborators
// =========================================================================

/// Wraps a store and counts `load` calls.
pub struct CountingBlobStore<S> {
    inner: S,
    loads: AtomicUsize,
}

impl<S: BlobStore> CountingBlobStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            loads: AtomicUsize::new(0),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl<S: BlobStore> BlobStore for CountingBlobStore<S> {
    fn save(&self, id: &ImageId, bytes: &[u8]) -> io::Result<()> {
        self.inner.save(id, bytes)
    }

    fn load(&self, id: &ImageId) -> io::Result<Option<Vec<u8>>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(id)
    }
}

/// A cache whose every operation fails.
pub struct FailingCache;

impl DerivativeCache for FailingCache {
    fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Err(CacheError::Io(io::Error::other("cache backend down")))
    }

    fn put(&self, _key: &str, _bytes: &[u8], _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Io(io::Error::other("cache backend down")))
    }
}

/// Rasterizer that returns a solid page of a fixed size and counts calls.
pub struct SolidRasterizer {
    width: u32,
    height: u32,
    calls: AtomicUsize,
}

impl SolidRasterizer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Rasterizer for SolidRasterizer {
    fn rasterize(&self, pdf: &[u8], page: u32) -> Result<DynamicImage, ConversionError> {
        crate::rasterize::check_pdf_header(pdf)?;
        if page == 0 {
            return Err(ConversionError::new("page 0 does not exist"));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let img = RgbImage::from_pixel(self.width, self.height, Rgb([250, 250, 245]));
        Ok(DynamicImage::ImageRgb8(img))
    }
}
