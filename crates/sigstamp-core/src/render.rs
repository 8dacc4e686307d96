//! Page previews
//!
//! Rasterization sits behind [`PageRasterizer`] so the server can be driven
//! without a native PDFium library in tests.

use crate::error::StampError;
use image::codecs::png::PngEncoder;
use image::DynamicImage;
use std::io::Cursor;
use std::path::Path;

/// Zoom applied to previews, relative to 72 dpi
pub const PREVIEW_ZOOM: f32 = 1.2;

/// Renders a single page of a PDF to PNG bytes
pub trait PageRasterizer: Send + Sync {
    /// `page_number` is 1-based
    fn render_png(&self, pdf: &Path, page_number: u32, zoom: f32) -> Result<Vec<u8>, StampError>;
}

/// Encode a rendered page as PNG
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, StampError> {
    let mut bytes = Vec::new();
    image
        .write_with_encoder(PngEncoder::new(Cursor::new(&mut bytes)))
        .map_err(|e| StampError::RenderError(format!("Failed to encode PNG: {}", e)))?;
    Ok(bytes)
}

/// Convert a 1-based page number into a 0-based index, checking bounds
pub fn page_index(page_number: u32, page_count: u32) -> Result<u32, StampError> {
    if page_number == 0 || page_number > page_count {
        return Err(StampError::PageOutOfRange {
            page: page_number,
            count: page_count,
        });
    }
    Ok(page_number - 1)
}

#[cfg(feature = "pdfium")]
pub use self::pdfium::PdfiumRasterizer;

#[cfg(feature = "pdfium")]
mod pdfium {
    use super::{encode_png, page_index, PageRasterizer};
    use crate::error::StampError;
    use pdfium_render::prelude::*;
    use std::path::{Path, PathBuf};
    use tracing::debug;

    /// PDFium backed rasterizer.
    ///
    /// The library is bound per call; `Pdfium` handles are not shared across
    /// worker threads.
    #[derive(Debug, Clone, Default)]
    pub struct PdfiumRasterizer {
        library_dir: Option<PathBuf>,
    }

    impl PdfiumRasterizer {
        pub fn new(library_dir: Option<PathBuf>) -> Self {
            Self { library_dir }
        }

        fn bind(&self) -> Result<Pdfium, PdfiumError> {
            if let Some(dir) = &self.library_dir {
                match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)) {
                    Ok(binding) => return Ok(Pdfium::new(binding)),
                    Err(e) => debug!("PDFium not found in {}: {}", dir.display(), e),
                }
            }
            Pdfium::bind_to_system_library().map(Pdfium::new)
        }
    }

    fn render_error(e: PdfiumError) -> StampError {
        StampError::RenderError(e.to_string())
    }

    impl PageRasterizer for PdfiumRasterizer {
        fn render_png(
            &self,
            pdf: &Path,
            page_number: u32,
            zoom: f32,
        ) -> Result<Vec<u8>, StampError> {
            let pdfium = self.bind().map_err(render_error)?;
            let document = pdfium
                .load_pdf_from_file(pdf, None)
                .map_err(|e| StampError::ParseError(e.to_string()))?;

            let pages = document.pages();
            let index = page_index(page_number, pages.len() as u32)?;
            let page = pages.get(index as u16).map_err(render_error)?;

            let config = PdfRenderConfig::new().scale_page_by_factor(zoom);
            let image = page
                .render_with_config(&config)
                .map_err(render_error)?
                .as_image();

            debug!(
                "Rendered page {} of {} at {}x{}",
                page_number,
                pdf.display(),
                image.width(),
                image.height()
            );
            encode_png(&image)
        }
    }
}
