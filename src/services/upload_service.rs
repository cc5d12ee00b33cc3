use crate::api::error::AppError;
use crate::services::storage::{StorageArea, StoredFile};
use crate::utils::validation::{sanitize_filename, validate_extension};
use chrono::Utc;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

pub const UPLOAD_TOO_LARGE: &str = "Request body exceeds the maximum allowed limit";

pub fn staged_name(timestamp: i64, token: Option<&str>, filename: &str) -> String {
    match token {
        Some(t) => format!("{}-{}_{}", timestamp, t, filename),
        None => format!("{}_{}", timestamp, filename),
    }
}

pub struct UploadService {
    uploads: Arc<StorageArea>,
    allowed_extensions: Vec<String>,
    max_size: u64,
}

impl UploadService {
    pub fn new(
        uploads: Arc<StorageArea>,
        allowed_extensions: Vec<String>,
        max_size: u64,
    ) -> Self {
        Self {
            uploads,
            allowed_extensions,
            max_size,
        }
    }

    /// Checks a declared filename and returns the name it will be stored under
    /// (without the timestamp prefix).
    pub fn check_filename(&self, declared: &str) -> Result<String, AppError> {
        validate_extension(declared, &self.allowed_extensions).map_err(|e| {
            tracing::warn!("❌ Invalid file extension: {}", e.message);
            AppError::InvalidInput("Only Excel files (.xlsx, .xls) or CSV are allowed".to_string())
        })?;

        sanitize_filename(declared).map_err(|e| AppError::InvalidInput(e.message))
    }

    /// Stages one uploaded file under `<unix-timestamp>_<filename>`.
    /// A file over the size limit is removed again and rejected.
    pub async fn stage<R>(&self, declared: &str, reader: &mut R) -> Result<StoredFile, AppError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let filename = self.check_filename(declared)?;
        let timestamp = Utc::now().timestamp();

        // One byte past the limit is enough to tell it was exceeded
        let mut limited = reader.take(self.max_size + 1);
        let stored = self
            .uploads
            .put(|token| staged_name(timestamp, token, &filename), &mut limited)
            .await?;

        if stored.size > self.max_size {
            tracing::warn!("❌ {} exceeds {} bytes, discarding", stored.name, self.max_size);
            self.uploads.delete(&stored.name).await?;
            return Err(AppError::InvalidInput(UPLOAD_TOO_LARGE.to_string()));
        }

        tracing::info!(
            "✅ File uploaded: {} (size: {:.2} MB)",
            stored.name,
            stored.size as f64 / (1024.0 * 1024.0)
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> (tempfile::TempDir, Arc<StorageArea>, UploadService) {
        let dir = tempfile::tempdir().unwrap();
        let uploads = Arc::new(StorageArea::new("uploads", dir.path().join("uploads")));
        uploads.ensure_dir().await.unwrap();
        let allowed = vec![".xlsx".to_string(), ".xls".to_string(), ".csv".to_string()];
        let service = UploadService::new(uploads.clone(), allowed, 64);
        (dir, uploads, service)
    }

    #[tokio::test]
    async fn test_valid_extensions_are_staged_intact() {
        let (_dir, uploads, service) = service().await;

        for name in ["trades.xlsx", "jisdor.xls", "history.csv"] {
            let content = format!("content of {}", name);
            let mut reader = content.as_bytes();
            let stored = service.stage(name, &mut reader).await.unwrap();

            assert!(!stored.name.is_empty());
            assert!(stored.name.ends_with(&format!("_{}", name)));
            let prefix = stored.name.split('_').next().unwrap();
            assert!(prefix.parse::<i64>().is_ok());

            let on_disk = std::fs::read(uploads.root().join(&stored.name)).unwrap();
            assert_eq!(on_disk, content.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_invalid_extensions_write_nothing() {
        let (_dir, uploads, service) = service().await;

        for name in ["notes.txt", "report.pdf", "README", "TRADES.XLSX"] {
            let mut reader: &[u8] = b"data";
            let err = service.stage(name, &mut reader).await.unwrap_err();
            assert!(err.is_invalid_input(), "{} should be rejected", name);
        }
        assert!(uploads.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_name_same_second_does_not_overwrite() {
        let (_dir, uploads, service) = service().await;
        let mut first: &[u8] = b"first";
        let mut second: &[u8] = b"second";
        let a = service.stage("trades.xlsx", &mut first).await.unwrap();
        let b = service.stage("trades.xlsx", &mut second).await.unwrap();

        assert_ne!(a.name, b.name);
        assert_eq!(std::fs::read(uploads.root().join(&a.name)).unwrap(), b"first");
        assert_eq!(std::fs::read(uploads.root().join(&b.name)).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_size_limit_is_exact() {
        let (_dir, uploads, service) = service().await;

        let at_limit = vec![b'a'; 64];
        let stored = service.stage("trades.csv", &mut at_limit.as_slice()).await.unwrap();
        assert_eq!(stored.size, 64);

        let over_limit = vec![b'a'; 65];
        let err = service.stage("big.csv", &mut over_limit.as_slice()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(ref m) if m == UPLOAD_TOO_LARGE));

        let names: Vec<String> = uploads
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec![stored.name]);
    }

    #[tokio::test]
    async fn test_directory_components_are_dropped() {
        let (_dir, uploads, service) = service().await;
        let mut reader: &[u8] = b"data";
        let stored = service.stage("../../outside/trades.csv", &mut reader).await.unwrap();

        assert!(stored.name.ends_with("_trades.csv"));
        assert!(!stored.name.contains('/'));
        assert!(uploads.root().join(&stored.name).exists());
    }
}
