//! sigstamp server
//!
//! Serves a small editor for placing a handwritten signature image on the
//! pages of a PDF. Provides endpoints for:
//!
//! - Uploading a PDF and a signature image
//! - Rendering page previews
//! - Stamping the signature and downloading the signed copy

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use sigstamp_core::PdfiumRasterizer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;
mod state;

use api::{handle_health, handle_index, handle_preview, handle_sign, handle_upload};
use state::{AppState, ScratchDir};

/// Command-line arguments for the sigstamp server
#[derive(Parser, Debug)]
#[command(name = "sigstamp-server")]
#[command(about = "Upload, preview and visually sign PDF documents")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "5000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Directory for uploads and signed output
    #[arg(long, env = "SIGSTAMP_SCRATCH_DIR", default_value = "uploads")]
    scratch_dir: PathBuf,

    /// Read-only filesystem target: keep files in the system temp directory
    #[arg(long, env = "VERCEL")]
    serverless: bool,

    /// Directory containing the PDFium shared library
    #[arg(long, env = "PDFIUM_DYNAMIC_LIB_PATH")]
    pdfium_dir: Option<PathBuf>,

    /// Maximum request body size in megabytes
    #[arg(long, default_value = "25")]
    max_upload_mb: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn scratch_root(&self) -> PathBuf {
        if self.serverless {
            std::env::temp_dir()
        } else {
            self.scratch_dir.clone()
        }
    }

    /// Body limit in bytes, clamped at `usize::MAX`
    fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Editor
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        // Workflow
        .route("/upload_temp", post(handle_upload))
        .route("/preview/:filename/:page", get(handle_preview))
        .route("/assinar", post(handle_sign))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(format!(
            "sigstamp_server={level},sigstamp_core={level},tower_http=debug"
        ))
    })?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let scratch = ScratchDir::prepare(args.scratch_root())?;
    let rasterizer = Arc::new(PdfiumRasterizer::new(args.pdfium_dir.clone()));
    let state = Arc::new(AppState::new(scratch, rasterizer));

    let app = build_router(state, args.max_upload_bytes());

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Upload limit: {} MB", args.max_upload_mb);

    axum::serve(listener, app).await?;

    Ok(())
}
