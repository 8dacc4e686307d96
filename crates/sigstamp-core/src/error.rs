use thiserror::Error;

#[derive(Error, Debug)]
pub enum StampError {
    #[error("Failed to parse PDF: {0}")]
    ParseError(String),

    #[error("Page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: u32, count: u32 },

    #[error("Invalid placement: {0}")]
    InvalidPlacement(String),

    #[error("Signature image error: {0}")]
    ImageError(String),

    #[error("Failed to render page: {0}")]
    RenderError(String),

    #[error("Failed to save PDF: {0}")]
    SaveError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
