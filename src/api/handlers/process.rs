use crate::AppState;
use crate::api::error::AppError;
use crate::services::job_service::ProcessingRequest;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};

use super::types::OperationResponse;

#[utoipa::path(
    post,
    path = "/process",
    request_body = ProcessingRequest,
    responses(
        (status = 200, description = "Processing result; check `success`", body = OperationResponse)
    ),
    tag = "jobs"
)]
pub async fn process_data(
    State(state): State<AppState>,
    payload: Result<Json<ProcessingRequest>, JsonRejection>,
) -> Result<Json<OperationResponse>, AppError> {
    let Json(req) = payload.map_err(|e| {
        tracing::warn!("❌ Error decoding request: {}", e.body_text());
        AppError::InvalidInput(format!("Invalid request body: {}", e.body_text()))
    })?;

    // Cancelled on shutdown; dropping this future (client gone) kills the processor
    let cancel = state.shutdown.child_token();
    let outcome = state.job_service.dispatch(req, cancel).await?;

    Ok(Json(OperationResponse {
        success: true,
        message: Some("Data processed successfully".to_string()),
        output_file: Some(outcome.output_file),
        logs: Some(vec![outcome.logs]),
        ..Default::default()
    }))
}
