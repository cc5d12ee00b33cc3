use crate::AppState;
use crate::api::error::AppError;
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::Response,
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tokio_util::io::ReaderStream;

use super::types::{OutputFileEntry, OutputListResponse, UploadListResponse, UploadedFileEntry};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// `attachment` disposition with an ASCII fallback and an RFC 5987 encoded name
pub(crate) fn attachment_disposition(filename: &str) -> String {
    let ascii_filename = filename
        .chars()
        .filter(|c| c.is_ascii() && !c.is_control() && *c != '"' && *c != '\\' && *c != ';')
        .collect::<String>();
    let fallback_filename = if ascii_filename.is_empty() {
        "dashboard.xlsx"
    } else {
        &ascii_filename
    };

    let encoded_filename = utf8_percent_encode(filename, NON_ALPHANUMERIC).to_string();

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback_filename, encoded_filename
    )
}

#[utoipa::path(
    get,
    path = "/files",
    responses(
        (status = 200, description = "Staged uploads", body = UploadListResponse)
    ),
    tag = "files"
)]
pub async fn list_files(
    State(state): State<AppState>,
) -> Result<Json<UploadListResponse>, AppError> {
    let files: Vec<UploadedFileEntry> = state
        .uploads
        .list()
        .await?
        .into_iter()
        .map(UploadedFileEntry::from)
        .collect();

    tracing::info!("📂 Listed {} uploaded files", files.len());
    Ok(Json(UploadListResponse {
        success: true,
        files,
    }))
}

#[utoipa::path(
    get,
    path = "/outputs",
    responses(
        (status = 200, description = "Generated dashboards", body = OutputListResponse)
    ),
    tag = "files"
)]
pub async fn list_outputs(
    State(state): State<AppState>,
) -> Result<Json<OutputListResponse>, AppError> {
    let files: Vec<OutputFileEntry> = state
        .outputs
        .list()
        .await?
        .into_iter()
        .map(OutputFileEntry::from)
        .collect();

    tracing::info!("📂 Listed {} output files", files.len());
    Ok(Json(OutputListResponse {
        success: true,
        files,
    }))
}

#[utoipa::path(
    get,
    path = "/download/{filename}",
    params(
        ("filename" = String, Path, description = "Generated dashboard name")
    ),
    responses(
        (status = 200, description = "Dashboard file stream"),
        (status = 404, description = "File not found")
    ),
    tag = "files"
)]
pub async fn download_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let (file, stored) = state.outputs.open(&filename).await.map_err(|e| {
        if matches!(e, AppError::NotFound(_)) {
            tracing::warn!("❌ File not found: {}", filename);
        }
        e
    })?;

    tracing::info!("📥 Downloading file: {} ({} bytes)", stored.name, stored.size);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, XLSX_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, stored.size)
        .header(header::CONTENT_DISPOSITION, attachment_disposition(&stored.name))
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::Internal(format!("Failed to build download response: {}", e)))
}
