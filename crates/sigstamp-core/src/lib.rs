//! Visual signature stamping for PDF documents
//!
//! Places a raster signature on chosen pages of a PDF using lopdf.
//! Positions arrive as fractions of the page as displayed and are mapped
//! into each page's user space, honouring its box and rotation.

pub mod compose;
pub mod error;
pub mod filename;
pub mod geometry;
pub mod placement;
pub mod render;
pub mod save;
pub mod signature;

pub use compose::{stamp_document, AppliedPlacement, SkippedPlacement, StampReport};
pub use error::StampError;
pub use geometry::PageGeometry;
pub use placement::{placement_rect, PlacementEntry, PlacementMap, PlacementRect, DEFAULT_SCALE};
pub use render::{PageRasterizer, PREVIEW_ZOOM};
#[cfg(feature = "pdfium")]
pub use render::PdfiumRasterizer;
pub use save::{compress_document, save_compressed};
pub use signature::{normalize_or_original, normalize_signature, SignatureImage};

use lopdf::Document;
use std::path::Path;
use tracing::info;

fn load_document(path: &Path) -> Result<Document, StampError> {
    Document::load(path).map_err(|e| StampError::ParseError(format!("{}: {}", path.display(), e)))
}

/// Open a PDF and return its page count
pub fn get_page_count(path: &Path) -> Result<u32, StampError> {
    let doc = load_document(path)?;
    Ok(doc.get_pages().len() as u32)
}

/// Stamp `signature` onto the pages named in `placements` and write the
/// compressed result to `output`.
///
/// Only an unreadable source PDF or a failed save aborts; an unreadable
/// signature or a bad entry shows up as skipped placements in the report.
pub fn sign_pdf_file(
    pdf: &Path,
    signature: &Path,
    placements: &PlacementMap,
    scale_width: f64,
    output: &Path,
) -> Result<StampReport, StampError> {
    let mut doc = load_document(pdf)?;
    let image = SignatureImage::open(signature);

    let report = stamp_document(&mut doc, placements, scale_width, image.as_ref());
    save_compressed(&mut doc, output)?;

    info!(
        "Signed {} -> {} ({} placement(s))",
        pdf.display(),
        output.display(),
        report.applied.len()
    );
    Ok(report)
}
