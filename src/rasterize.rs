//! PDF page rasterization.
//!
//! A [`Rasterizer`] turns one page of a PDF into a pixel image; the pipeline
//! then stores it as the reference raster every derivative is cut from.
//! Failures are fatal to the conversion that asked for them and are never
//! retried.
//!
//! The pdfium-backed implementation is behind the `pdfium` feature because it
//! needs the pdfium shared library at runtime. Without it,
//! [`UnavailableRasterizer`] reports every conversion as failed, so stores
//! populated elsewhere can still be served.

use image::DynamicImage;
use thiserror::Error;

/// Rasterization failed; the message says why.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("PDF conversion failed: {0}")]
pub struct ConversionError(pub String);

impl ConversionError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// Renders a single PDF page to pixels.
pub trait Rasterizer: Send + Sync {
    /// Render page `page` (1-based) of the PDF in `pdf`.
    fn rasterize(&self, pdf: &[u8], page: u32) -> Result<DynamicImage, ConversionError>;
}

impl<T: Rasterizer + ?Sized> Rasterizer for Box<T> {
    fn rasterize(&self, pdf: &[u8], page: u32) -> Result<DynamicImage, ConversionError> {
        (**self).rasterize(pdf, page)
    }
}

/// Stand-in used when no PDF engine is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRasterizer;

impl Rasterizer for UnavailableRasterizer {
    fn rasterize(&self, _pdf: &[u8], _page: u32) -> Result<DynamicImage, ConversionError> {
        Err(ConversionError::new(
            "no PDF rasterizer available (build with the `pdfium` feature)",
        ))
    }
}

/// Quick structural check so obviously wrong uploads fail before the engine
/// is involved.
pub fn check_pdf_header(pdf: &[u8]) -> Result<(), ConversionError> {
    if pdf.starts_with(b"%PDF-") {
        Ok(())
    } else {
        let magic: Vec<u8> = pdf.iter().take(5).copied().collect();
        Err(ConversionError::new(format!(
            "input is not a PDF (first bytes: {magic:?})"
        )))
    }
}

#[cfg(feature = "pdfium")]
pub use pdfium::PdfiumRasterizer;

#[cfg(feature = "pdfium")]
mod pdfium {
    //! Rasterization via pdfium.
    //!
    //! pdfium is bound per conversion: the bindings keep thread-local state
    //! and conversions are rare next to renders, so there is nothing worth
    //! sharing between calls.

    use super::{ConversionError, Rasterizer, check_pdf_header};
    use image::DynamicImage;
    use pdfium_render::prelude::*;
    use std::path::PathBuf;
    use tracing::debug;

    /// Renders pages with pdfium, scaled to a fixed pixel width.
    pub struct PdfiumRasterizer {
        target_width: u32,
        library_path: Option<PathBuf>,
    }

    impl PdfiumRasterizer {
        /// `library_path` points at a pdfium shared library; `None` uses the
        /// system library search path.
        pub fn new(target_width: u32, library_path: Option<PathBuf>) -> Self {
            Self {
                target_width,
                library_path,
            }
        }

        fn bind(&self) -> Result<Pdfium, ConversionError> {
            let bindings = match &self.library_path {
                Some(path) => Pdfium::bind_to_library(path),
                None => Pdfium::bind_to_system_library(),
            }
            .map_err(|e| ConversionError::new(format!("cannot load pdfium: {e:?}")))?;
            Ok(Pdfium::new(bindings))
        }
    }

    impl Rasterizer for PdfiumRasterizer {
        fn rasterize(&self, pdf: &[u8], page: u32) -> Result<DynamicImage, ConversionError> {
            check_pdf_header(pdf)?;
            let pdfium = self.bind()?;

            let document = pdfium
                .load_pdf_from_byte_slice(pdf, None)
                .map_err(|e| ConversionError::new(format!("corrupt PDF: {e:?}")))?;

            let pages = document.pages();
            let total = pages.len() as u32;
            if page == 0 || page > total {
                return Err(ConversionError::new(format!(
                    "page {page} is out of range (document has {total} pages)"
                )));
            }

            let render_config = PdfRenderConfig::new().set_target_width(self.target_width as i32);
            let pdf_page = pages.get((page - 1) as u16).map_err(|e| {
                ConversionError::new(format!("cannot open page {page}: {e:?}"))
            })?;
            let bitmap = pdf_page.render_with_config(&render_config).map_err(|e| {
                ConversionError::new(format!("rasterization of page {page} failed: {e:?}"))
            })?;

            let image = bitmap.as_image();
            debug!(
                page,
                width = image.width(),
                height = image.height(),
                "rasterized page"
            );
            Ok(image)
        }
    }
}
