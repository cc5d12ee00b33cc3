use crate::AppState;
use axum::{Json, extract::State};

use super::types::CleanupResponse;

#[utoipa::path(
    delete,
    path = "/cleanup",
    responses(
        (status = 200, description = "Every staged and generated file removed", body = CleanupResponse)
    ),
    tag = "files"
)]
pub async fn cleanup_files(State(state): State<AppState>) -> Json<CleanupResponse> {
    let deleted = state.retention.purge_all().await;

    Json(CleanupResponse {
        success: true,
        message: "Cleanup completed".to_string(),
        deleted,
    })
}
