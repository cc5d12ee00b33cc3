use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{message}")]
    ProcessingFailed { message: String, logs: String },

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, AppError::InvalidInput(_))
    }
}

// Only NotFound changes the status code; every other failure is reported
// inside a 200 body with `success: false`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::InvalidInput(msg) => (
                StatusCode::OK,
                json!({ "success": false, "error": msg }),
            ),
            AppError::Io(e) => {
                tracing::error!("I/O error: {:?}", e);
                (
                    StatusCode::OK,
                    json!({ "success": false, "error": format!("File operation failed: {}", e) }),
                )
            }
            AppError::ProcessingFailed { message, logs } => (
                StatusCode::OK,
                json!({ "success": false, "error": message, "logs": [logs] }),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({ "success": false, "error": msg }),
            ),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::OK,
                    json!({ "success": false, "error": "Internal Server Error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
