//! API handlers for the sigstamp server
//!
//! Provides endpoints for:
//! - Uploading a PDF together with a signature image
//! - Page previews for the editor
//! - Stamping the signature and downloading the result

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::header,
    response::{Html, IntoResponse, Response},
    Form, Json,
};
use serde::Serialize;
use sigstamp_core::filename::{
    attachment_disposition, download_name, normalized_name, output_name, stored_name,
};
use sigstamp_core::{
    get_page_count, normalize_or_original, sign_pdf_file, PlacementMap, DEFAULT_SCALE,
    PREVIEW_ZOOM,
};
use tracing::{debug, info};

use crate::error::ServerError;
use crate::state::AppState;

/// Handler: GET /
pub async fn handle_index() -> Html<&'static str> {
    Html(include_str!("../templates/index.html"))
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Handler: GET /health
pub async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "sigstamp-server",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Upload response
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub pdf_name: String,
    pub img_name: String,
    pub total_paginas: u32,
}

struct UploadedFile {
    file_name: String,
    bytes: Vec<u8>,
}

/// Handler: POST /upload_temp
///
/// Expects multipart fields `pdf` and `assinatura`.
pub async fn handle_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ServerError> {
    let mut pdf = None;
    let mut signature = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidRequest(e.body_text()))?
    {
        let slot = match field.name() {
            Some("pdf") => &mut pdf,
            Some("assinatura") => &mut signature,
            _ => continue,
        };
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
        *slot = Some(UploadedFile {
            file_name,
            bytes: bytes.to_vec(),
        });
    }

    let (Some(pdf), Some(signature)) = (pdf, signature) else {
        return Err(ServerError::MissingFiles);
    };

    let pdf_name = stored_name(&pdf.file_name);
    let img_name = stored_name(&signature.file_name);
    let pdf_path = state.scratch.path_for(&pdf_name);

    tokio::fs::write(&pdf_path, &pdf.bytes).await?;
    tokio::fs::write(state.scratch.path_for(&img_name), &signature.bytes).await?;

    let total_paginas = tokio::task::spawn_blocking(move || get_page_count(&pdf_path))
        .await?
        .map_err(|e| ServerError::InvalidUpload(e.to_string()))?;

    info!(
        "Stored upload {} ({} pages) with signature {}",
        pdf_name, total_paginas, img_name
    );

    Ok(Json(UploadResponse {
        pdf_name,
        img_name,
        total_paginas,
    }))
}

/// Handler: GET /preview/:filename/:page
pub async fn handle_preview(
    State(state): State<Arc<AppState>>,
    Path((filename, page)): Path<(String, u32)>,
) -> Result<Response, ServerError> {
    let path = state
        .scratch
        .resolve(&filename)
        .map_err(|e| ServerError::Preview(e.to_string()))?;
    if !path.is_file() {
        return Err(ServerError::Preview(format!("no such file: '{}'", filename)));
    }

    let rasterizer = Arc::clone(&state.rasterizer);
    let png = tokio::task::spawn_blocking(move || rasterizer.render_png(&path, page, PREVIEW_ZOOM))
        .await
        .map_err(|e| ServerError::Preview(e.to_string()))?
        .map_err(|e| ServerError::Preview(e.to_string()))?;

    debug!("Preview {} page {} ({} bytes)", filename, page, png.len());
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// Validated fields of a signing request
#[derive(Debug)]
pub struct SignForm {
    pub pdf_name: String,
    pub img_name: String,
    pub scale: f64,
    pub placements: PlacementMap,
    pub download_name: String,
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str, ServerError> {
    fields
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ServerError::InvalidRequest(format!("Missing field: {}", name)))
}

impl SignForm {
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, ServerError> {
        let pdf_name = required(fields, "pdf_name")?.to_string();
        let img_name = required(fields, "img_name")?.to_string();

        let scale = match fields.get("escala").map(|s| s.trim()) {
            None | Some("") => DEFAULT_SCALE,
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    ServerError::InvalidRequest(format!("Invalid escala: {:?}", raw))
                })?,
        };

        let placements = PlacementMap::from_json(required(fields, "mapa_assinaturas")?)?;

        Ok(Self {
            pdf_name,
            img_name,
            scale,
            placements,
            download_name: download_name(fields.get("nome_final").map(String::as_str)),
        })
    }
}

/// Collect text fields from a multipart or urlencoded body
async fn read_form(request: Request) -> Result<HashMap<String, String>, ServerError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if !is_multipart {
        let Form(fields) = Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
        return Ok(fields);
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ServerError::InvalidRequest(e.body_text()))?;

    let mut fields = HashMap::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::InvalidRequest(e.body_text()))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
        fields.insert(name, value);
    }
    Ok(fields)
}

/// Handler: POST /assinar
///
/// Stamps the stored signature onto the stored PDF and returns the result
/// as an attachment.
pub async fn handle_sign(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Response, ServerError> {
    let form = SignForm::from_fields(&read_form(request).await?)?;

    let pdf_path = state.scratch.existing(&form.pdf_name)?;
    let img_path = state.scratch.existing(&form.img_name)?;
    let normalized_path = state.scratch.path_for(&normalized_name(&form.img_name));
    let output_path = state.scratch.path_for(&output_name());

    info!(
        "Signing {} with {} ({} placement(s), scale {})",
        form.pdf_name,
        form.img_name,
        form.placements.len(),
        form.scale
    );

    let placements = form.placements;
    let scale = form.scale;
    let output = output_path.clone();
    let report = tokio::task::spawn_blocking(move || {
        let signature = normalize_or_original(&img_path, &normalized_path);
        sign_pdf_file(&pdf_path, &signature, &placements, scale, &output)
    })
    .await??;

    let bytes = tokio::fs::read(&output_path).await?;
    info!(
        "Sending {} as {:?} ({} bytes, {} applied, {} skipped)",
        output_path.display(),
        form.download_name,
        bytes.len(),
        report.applied.len(),
        report.skipped.len()
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                attachment_disposition(&form.download_name),
            ),
        ],
        bytes,
    )
        .into_response())
}
