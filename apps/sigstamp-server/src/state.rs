//! Application state for the sigstamp server

use std::path::PathBuf;
use std::sync::Arc;

use sigstamp_core::filename::is_plain_name;
use sigstamp_core::PageRasterizer;
use tracing::info;

use crate::error::ServerError;

/// Directory holding uploads, normalized signatures and signed output.
///
/// Files are addressed only by their generated names and are never removed.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Create the directory if needed
    pub fn prepare(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        info!("Scratch directory: {}", root.display());
        Ok(Self { root })
    }

    /// Path for a name generated by the server
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Path for a name supplied by a client, refusing anything that could
    /// point outside the directory.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ServerError> {
        if !is_plain_name(name) {
            return Err(ServerError::InvalidRequest(format!(
                "Invalid file name: {:?}",
                name
            )));
        }
        Ok(self.root.join(name))
    }

    /// Like [`ScratchDir::resolve`], but the file must already exist
    pub fn existing(&self, name: &str) -> Result<PathBuf, ServerError> {
        let path = self.resolve(name)?;
        if !path.is_file() {
            return Err(ServerError::NotFound(name.to_string()));
        }
        Ok(path)
    }
}

/// Shared application state
pub struct AppState {
    pub scratch: ScratchDir,
    pub rasterizer: Arc<dyn PageRasterizer>,
}

impl AppState {
    pub fn new(scratch: ScratchDir, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            scratch,
            rasterizer,
        }
    }
}
