//! The derivative pipeline.
//!
//! A [`Pipeline`] owns the three collaborators of a derivative request (the
//! blob store of reference rasters, the derivative cache, and the image
//! backend) and runs requests through them:
//!
//! ```text
//! render(request)
//!   key = request.cache_key()
//!   cache.get(key) ── hit ──────────────────────────────→ bytes (cached)
//!        │ miss
//!   single-flight join(key) ── follower ── wait ────────→ leader's bytes
//!        │ leader
//!   store.load(id) → crop → resize → encode → cache.put(key) → bytes
//! ```
//!
//! Conversion feeds the store: [`Pipeline::convert`] rasterizes a PDF page
//! and saves it under a content-addressed [`ImageId`].
//!
//! The cache is consulted and filled on a best-effort basis. A failing cache
//! is logged at `warn` and otherwise behaves like an empty one.

use crate::cache::{CacheStats, DEFAULT_TTL, DerivativeCache, DiskCache, NoCache};
use crate::config::FolioConfig;
use crate::error::TransformError;
use crate::imaging::{
    Dimensions, EncodeSettings, FocusPoint, ImageBackend, OutputFormat, RustBackend,
    create_derivative, encode_reference, get_dimensions,
};
use crate::inflight::{Joined, SingleFlight};
use crate::rasterize::Rasterizer;
use crate::request::{ImageId, TransformRequest};
use crate::responsive::{ResponsiveImage, ResponsiveSettings, describe};
use crate::store::{BlobStore, FsBlobStore};
use rayon::prelude::*;
use serde::Serialize;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Encoded bytes of one derivative plus what an HTTP layer needs to send them.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivative {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    /// Served straight from the derivative cache.
    pub cached: bool,
    ttl: Duration,
}

impl Derivative {
    pub fn content_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// `Cache-Control` value for freshly rendered bytes; cache hits carry no
    /// header.
    pub fn cache_control(&self) -> Option<String> {
        (!self.cached).then(|| format!("public, max-age={}", self.ttl.as_secs()))
    }
}

/// Result of converting one PDF page into a reference raster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertedPage {
    pub id: ImageId,
    pub original_filename: String,
    pub page: u32,
    pub width: u32,
    pub height: u32,
}

/// Runs derivative requests against a blob store, a cache and a backend.
///
/// `Pipeline` is `Sync` when its collaborators are, so one instance can be
/// shared by every request handler.
pub struct Pipeline<S, C, B = RustBackend> {
    store: S,
    cache: C,
    backend: B,
    ttl: Duration,
    settings: EncodeSettings,
    responsive: ResponsiveSettings,
    inflight: SingleFlight<Arc<Vec<u8>>>,
}

impl<S: BlobStore, C: DerivativeCache> Pipeline<S, C> {
    /// Pipeline with the pure-Rust backend and default settings.
    pub fn new(store: S, cache: C) -> Self {
        Self::with_backend(store, cache, RustBackend::new())
    }
}

/// Pipeline as the CLI builds it: reference rasters on disk and a disk
/// cache, or no cache at all.
pub type FsPipeline = Pipeline<FsBlobStore, Box<dyn DerivativeCache>>;

impl FsPipeline {
    /// Build from config. `no_cache` overrides `cache.enabled`.
    pub fn from_config(config: &FolioConfig, no_cache: bool) -> io::Result<Self> {
        let store = FsBlobStore::open(&config.storage.root)?;
        let cache: Box<dyn DerivativeCache> = if config.cache.enabled && !no_cache {
            Box::new(DiskCache::open(&config.cache.dir)?)
        } else {
            Box::new(NoCache)
        };
        Ok(Pipeline::new(store, cache)
            .with_ttl(config.cache_ttl())
            .with_encode_settings(config.encode_settings())
            .with_responsive_settings(config.responsive_settings()))
    }
}

impl<S: BlobStore, C: DerivativeCache, B: ImageBackend> Pipeline<S, C, B> {
    pub fn with_backend(store: S, cache: C, backend: B) -> Self {
        Self {
            store,
            cache,
            backend,
            ttl: DEFAULT_TTL,
            settings: EncodeSettings::default(),
            responsive: ResponsiveSettings::default(),
            inflight: SingleFlight::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_encode_settings(mut self, settings: EncodeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_responsive_settings(mut self, responsive: ResponsiveSettings) -> Self {
        self.responsive = responsive;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn responsive_settings(&self) -> &ResponsiveSettings {
        &self.responsive
    }

    /// Serve one derivative, from the cache when possible.
    ///
    /// Concurrent misses for the same key are coalesced: one caller renders
    /// and the rest receive its bytes. If that render fails, each waiting
    /// caller renders on its own and gets its own outcome.
    pub fn render(&self, request: &TransformRequest) -> Result<Derivative, TransformError> {
        let key = request.cache_key();

        if let Some(bytes) = self.cache_get(&key) {
            debug!(key = %key, "cache hit");
            return Ok(self.derivative(request, bytes, true));
        }

        match self.inflight.join(&key) {
            Joined::Leader(leader) => {
                // The previous leader for this key may have filled the cache
                // between our miss and our join.
                if let Some(bytes) = self.cache_get(&key) {
                    debug!(key = %key, "cache hit after join");
                    leader.finish(Some(Arc::new(bytes.clone())));
                    return Ok(self.derivative(request, bytes, true));
                }
                debug!(key = %key, "cache miss");
                let result = self.encode(request, &key);
                leader.finish(result.as_ref().ok().map(|bytes| Arc::new(bytes.clone())));
                Ok(self.derivative(request, result?, false))
            }
            Joined::Follower(flight) => match flight.wait() {
                Some(bytes) => {
                    debug!(key = %key, "joined in-flight render");
                    Ok(self.derivative(request, bytes.to_vec(), false))
                }
                None => {
                    debug!(key = %key, "in-flight render failed; rendering independently");
                    let bytes = self.encode(request, &key)?;
                    Ok(self.derivative(request, bytes, false))
                }
            },
        }
    }

    /// Dimensions of a stored reference image.
    pub fn dimensions(&self, id: &ImageId) -> Result<Dimensions, TransformError> {
        let source = self.load_reference(id)?;
        get_dimensions(&self.backend, &source)
    }

    /// Responsive descriptor set for a stored image, using the configured
    /// ladder and format.
    pub fn responsive(
        &self,
        id: &ImageId,
        crop: Option<(u32, u32)>,
        focus: FocusPoint,
        base_url: &str,
    ) -> Result<ResponsiveImage, TransformError> {
        let source = self.dimensions(id)?;
        Ok(describe(id, source, crop, focus, base_url, &self.responsive))
    }

    /// Render every request of a responsive set in parallel so later page
    /// views are cache hits.
    pub fn prewarm(&self, image: &ResponsiveImage) -> Result<CacheStats, TransformError> {
        let stats = image
            .requests()
            .into_par_iter()
            .map(|request| {
                let derivative = self.render(request)?;
                let mut stats = CacheStats::default();
                if derivative.cached {
                    stats.hit();
                } else {
                    stats.miss();
                }
                Ok::<_, TransformError>(stats)
            })
            .try_reduce(CacheStats::default, |a, b| Ok(a.merge(b)))?;
        info!(image = %image.default_request.image_id, %stats, "prewarmed");
        Ok(stats)
    }

    /// Rasterize page `page` (1-based) of `pdf` and store it as a reference
    /// image. A page already in the store is not rasterized again.
    pub fn convert(
        &self,
        rasterizer: &dyn Rasterizer,
        pdf: &[u8],
        page: u32,
        original_filename: &str,
    ) -> Result<ConvertedPage, TransformError> {
        if page == 0 {
            return Err(TransformError::InvalidRequest(
                "page numbers start at 1".into(),
            ));
        }
        let id = ImageId::for_pdf_page(pdf, page);

        let (width, height) = match self.store.load(&id)? {
            Some(existing) => {
                let dims = get_dimensions(&self.backend, &existing)?;
                debug!(id = %id, page, "page already converted");
                dims.as_tuple()
            }
            None => {
                let image = rasterizer.rasterize(pdf, page)?;
                let png = encode_reference(&image)?;
                self.store.save(&id, &png)?;
                info!(
                    id = %id,
                    page,
                    file = original_filename,
                    width = image.width(),
                    height = image.height(),
                    "converted page"
                );
                (image.width(), image.height())
            }
        };

        Ok(ConvertedPage {
            id,
            original_filename: original_filename.to_string(),
            page,
            width,
            height,
        })
    }

    fn load_reference(&self, id: &ImageId) -> Result<Vec<u8>, TransformError> {
        self.store
            .load(id)?
            .ok_or_else(|| TransformError::NotFound(id.clone()))
    }

    /// Cache-missing path: load, transform, encode, then populate the cache.
    fn encode(&self, request: &TransformRequest, key: &str) -> Result<Vec<u8>, TransformError> {
        let source = self.load_reference(&request.image_id)?;
        let bytes = create_derivative(&self.backend, &source, request, &self.settings)?;
        info!(key = %key, format = %request.format, size = bytes.len(), "encoded derivative");
        self.cache_put(key, &bytes);
        Ok(bytes)
    }

    fn cache_get(&self, key: &str) -> Option<Vec<u8>> {
        match self.cache.get(key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed; treating as miss");
                None
            }
        }
    }

    fn cache_put(&self, key: &str, bytes: &[u8]) {
        if let Err(e) = self.cache.put(key, bytes, self.ttl) {
            warn!(key = %key, error = %e, "cache write failed; derivative not cached");
        }
    }

    fn derivative(&self, request: &TransformRequest, bytes: Vec<u8>, cached: bool) -> Derivative {
        Derivative {
            bytes,
            format: request.format,
            cached,
            ttl: self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::rasterize::{ConversionError, UnavailableRasterizer};
    use crate::store::MemoryBlobStore;
    use crate::test_helpers::{
        CountingBlobStore, FailingCache, SolidRasterizer, png_bytes, rgba_png_bytes,
    };

    fn id(s: &str) -> ImageId {
        ImageId::new(s).unwrap()
    }

    fn mock_pipeline() -> Pipeline<MemoryBlobStore, MemoryCache, MockBackend> {
        let store = MemoryBlobStore::new();
        store.save(&id("page"), b"reference").unwrap();
        Pipeline::with_backend(store, MemoryCache::new(), MockBackend::with_dimensions(400, 200))
    }

    #[test]
    fn miss_renders_and_populates_cache() {
        let pipeline = mock_pipeline();
        let request = TransformRequest::new(id("page")).with_size(Some(100), None);

        let derivative = pipeline.render(&request).unwrap();
        assert!(!derivative.cached);
        assert_eq!(pipeline.cache().len(), 1);
        assert_eq!(
            pipeline.cache().get(&request.cache_key()).unwrap(),
            Some(derivative.bytes)
        );
    }

    #[test]
    fn hit_skips_backend() {
        let pipeline = mock_pipeline();
        let request = TransformRequest::new(id("page")).with_size(Some(100), None);

        let first = pipeline.render(&request).unwrap();
        let ops_after_first = pipeline.backend.get_operations().len();
        let second = pipeline.render(&request).unwrap();

        assert!(second.cached);
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(pipeline.backend.get_operations().len(), ops_after_first);
    }

    #[test]
    fn crop_precedes_resize() {
        let pipeline = mock_pipeline();
        let request = TransformRequest::new(id("page"))
            .with_crop(1, 1)
            .with_size(Some(50), None);
        pipeline.render(&request).unwrap();

        let ops = pipeline.backend.get_operations();
        assert!(matches!(
            &ops[1],
            RecordedOp::Render {
                crop: Some(_),
                resize: Some((50, 50)),
                ..
            }
        ));
    }

    #[test]
    fn missing_image_is_not_found() {
        let pipeline = mock_pipeline();
        let err = pipeline
            .render(&TransformRequest::new(id("nope")))
            .unwrap_err();
        assert!(matches!(err, TransformError::NotFound(_)));
        assert_eq!(err.status_code(), 404);
        assert!(pipeline.cache().is_empty());
    }

    #[test]
    fn invalid_geometry_writes_nothing() {
        let pipeline = mock_pipeline();
        let request = TransformRequest::new(id("page")).with_size(Some(0), None);
        let err = pipeline.render(&request).unwrap_err();
        assert!(matches!(err, TransformError::InvalidGeometry(_)));
        assert!(pipeline.cache().is_empty());
    }

    #[test]
    fn failing_cache_degrades_to_miss() {
        let store = MemoryBlobStore::new();
        store.save(&id("page"), &png_bytes(40, 20)).unwrap();
        let pipeline = Pipeline::new(store, FailingCache);
        let request = TransformRequest::new(id("page")).with_format(OutputFormat::Png);

        let first = pipeline.render(&request).unwrap();
        let second = pipeline.render(&request).unwrap();
        assert!(!first.cached);
        assert!(!second.cached);
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn second_render_does_not_load_blob() {
        let inner = MemoryBlobStore::new();
        inner.save(&id("page"), &png_bytes(64, 32)).unwrap();
        let pipeline = Pipeline::new(CountingBlobStore::new(inner), MemoryCache::new());
        let request = TransformRequest::new(id("page")).with_size(Some(32), None);

        pipeline.render(&request).unwrap();
        pipeline.render(&request).unwrap();
        assert_eq!(pipeline.store().loads(), 1);
    }

    #[test]
    fn jpeg_with_alpha_is_encode_error() {
        let store = MemoryBlobStore::new();
        store.save(&id("rgba"), &rgba_png_bytes(8, 8)).unwrap();
        let pipeline = Pipeline::new(store, MemoryCache::new());
        let request = TransformRequest::new(id("rgba")).with_format(OutputFormat::Jpeg);

        let err = pipeline.render(&request).unwrap_err();
        assert!(matches!(err, TransformError::Encode(_)));
        assert!(pipeline.cache().is_empty());
    }

    #[test]
    fn derivative_headers() {
        let pipeline = mock_pipeline().with_ttl(Duration::from_secs(60));
        let request = TransformRequest::new(id("page")).with_format(OutputFormat::Avif);

        let fresh = pipeline.render(&request).unwrap();
        assert_eq!(fresh.content_type(), "image/avif");
        assert_eq!(fresh.cache_control().as_deref(), Some("public, max-age=60"));

        let cached = pipeline.render(&request).unwrap();
        assert_eq!(cached.cache_control(), None);
    }

    #[test]
    fn dimensions_of_stored_image() {
        let pipeline = mock_pipeline();
        assert_eq!(pipeline.dimensions(&id("page")).unwrap().as_tuple(), (400, 200));
        assert!(matches!(
            pipeline.dimensions(&id("gone")),
            Err(TransformError::NotFound(_))
        ));
    }

    #[test]
    fn responsive_uses_stored_dimensions() {
        let pipeline = mock_pipeline();
        let image = pipeline
            .responsive(&id("page"), None, FocusPoint::CENTER, "/image/page")
            .unwrap();
        assert_eq!((image.display_width, image.display_height), (400, 200));
        assert_eq!(image.descriptors.len(), 1);
        assert_eq!(image.default_url, "/image/page?width=400&height=200&format=webp");
    }

    #[test]
    fn prewarm_renders_every_request_once() {
        let pipeline = mock_pipeline();
        let image = pipeline
            .responsive(&id("page"), None, FocusPoint::CENTER, "/i")
            .unwrap();

        let first = pipeline.prewarm(&image).unwrap();
        assert_eq!(first, CacheStats { hits: 0, misses: 2 });

        let second = pipeline.prewarm(&image).unwrap();
        assert_eq!(second, CacheStats { hits: 2, misses: 0 });
    }

    #[test]
    fn convert_stores_png_reference() {
        let pipeline = Pipeline::new(MemoryBlobStore::new(), MemoryCache::new());
        let rasterizer = SolidRasterizer::new(120, 90);

        let page = pipeline
            .convert(&rasterizer, b"%PDF-1.7 fake", 1, "report.pdf")
            .unwrap();
        assert_eq!((page.width, page.height), (120, 90));
        assert_eq!(page.original_filename, "report.pdf");
        assert_eq!(page.id, ImageId::for_pdf_page(b"%PDF-1.7 fake", 1));

        let stored = pipeline.store().load(&page.id).unwrap().unwrap();
        assert_eq!(image::guess_format(&stored).unwrap(), image::ImageFormat::Png);
        assert_eq!(pipeline.dimensions(&page.id).unwrap().as_tuple(), (120, 90));
    }

    #[test]
    fn convert_is_skipped_for_known_page() {
        let pipeline = Pipeline::new(MemoryBlobStore::new(), MemoryCache::new());
        let rasterizer = SolidRasterizer::new(10, 10);
        let first = pipeline.convert(&rasterizer, b"%PDF-x", 2, "a.pdf").unwrap();
        let second = pipeline.convert(&rasterizer, b"%PDF-x", 2, "b.pdf").unwrap();

        assert_eq!(rasterizer.calls(), 1);
        assert_eq!(first.id, second.id);
        assert_eq!(second.original_filename, "b.pdf");
    }

    #[test]
    fn convert_rejects_page_zero() {
        let pipeline = Pipeline::new(MemoryBlobStore::new(), MemoryCache::new());
        let err = pipeline
            .convert(&SolidRasterizer::new(1, 1), b"%PDF-", 0, "a.pdf")
            .unwrap_err();
        assert!(matches!(err, TransformError::InvalidRequest(_)));
    }

    #[test]
    fn convert_failure_is_conversion_error() {
        let pipeline = Pipeline::new(MemoryBlobStore::new(), MemoryCache::new());
        let err = pipeline
            .convert(&UnavailableRasterizer, b"%PDF-", 1, "a.pdf")
            .unwrap_err();
        assert!(matches!(err, TransformError::Conversion(ConversionError(_))));
        assert!(pipeline.store().is_empty());
    }
}
