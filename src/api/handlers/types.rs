use crate::services::storage::StoredFile;
use chrono::SecondsFormat;
use serde::Serialize;
use utoipa::ToSchema;

/// Result of an upload or processing request
#[derive(Debug, Default, Serialize, ToSchema)]
pub struct OperationResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<String>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadedFileEntry {
    pub name: String,
    pub size: u64,
    pub uploaded_at: String,
}

impl From<StoredFile> for UploadedFileEntry {
    fn from(file: StoredFile) -> Self {
        Self {
            uploaded_at: file.modified.to_rfc3339_opts(SecondsFormat::Secs, true),
            name: file.name,
            size: file.size,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OutputFileEntry {
    pub name: String,
    pub size: u64,
    pub created_at: String,
}

impl From<StoredFile> for OutputFileEntry {
    fn from(file: StoredFile) -> Self {
        Self {
            created_at: file.modified.to_rfc3339_opts(SecondsFormat::Secs, true),
            name: file.name,
            size: file.size,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadListResponse {
    pub success: bool,
    pub files: Vec<UploadedFileEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OutputListResponse {
    pub success: bool,
    pub files: Vec<OutputFileEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CleanupResponse {
    pub success: bool,
    pub message: String,
    pub deleted: usize,
}
