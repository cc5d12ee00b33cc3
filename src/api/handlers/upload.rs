use crate::AppState;
use crate::api::error::AppError;
use crate::services::upload_service::UPLOAD_TOO_LARGE;
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::StatusCode,
};
use futures::TryStreamExt;
use tokio_util::io::StreamReader;

use super::types::OperationResponse;

fn multipart_error(e: &MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::InvalidInput(UPLOAD_TOO_LARGE.to_string())
    } else {
        AppError::InvalidInput(format!("Failed to read uploaded file: {}", e.body_text()))
    }
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = Multipart, description = "Spreadsheet upload in field `file`"),
    responses(
        (status = 200, description = "Upload result; check `success`", body = OperationResponse)
    ),
    tag = "files"
)]
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<OperationResponse>, AppError> {
    let result: Result<Json<OperationResponse>, AppError> = async {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(&e))?
        {
            if field.name() != Some("file") {
                continue;
            }

            let declared = field.file_name().unwrap_or_default().to_string();
            // Reject before a single byte reaches the disk
            state.upload_service.check_filename(&declared)?;

            let reader = StreamReader::new(field.map_err(std::io::Error::other));
            tokio::pin!(reader);

            let stored = state
                .upload_service
                .stage(&declared, &mut reader)
                .await
                .map_err(|e| match e {
                    // Body errors arrive wrapped in the reader's io::Error
                    AppError::Io(io) => match io
                        .get_ref()
                        .and_then(|inner| inner.downcast_ref::<MultipartError>())
                    {
                        Some(multipart) => multipart_error(multipart),
                        None => AppError::Io(io),
                    },
                    other => other,
                })?;

            return Ok(Json(OperationResponse {
                success: true,
                message: Some("File uploaded successfully".to_string()),
                output_file: Some(stored.name),
                ..Default::default()
            }));
        }

        Err(AppError::InvalidInput(
            "Failed to read uploaded file: no `file` field in form".to_string(),
        ))
    }
    .await;

    match result {
        Ok(res) => Ok(res),
        Err(e) => {
            // Drain the rest of the body so the client sees our response instead of a reset
            tracing::warn!("Upload failed early: {}. Consuming remaining stream...", e);
            while let Ok(Some(mut field)) = multipart.next_field().await {
                while let Ok(Some(_)) = field.chunk().await {}
            }
            Err(e)
        }
    }
}
