use crate::config::{RetentionConfig, RetentionPolicy};
use crate::services::storage::{StorageArea, StoredFile};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Deleted counts of one pass over both areas
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub uploads: usize,
    pub outputs: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.uploads + self.outputs
    }
}

/// Age of a file at `now`; files stamped in the future count as brand new.
pub fn file_age(file: &StoredFile, now: DateTime<Utc>) -> Duration {
    (now - file.modified).to_std().unwrap_or(Duration::ZERO)
}

pub struct RetentionSweeper {
    uploads: Arc<StorageArea>,
    outputs: Arc<StorageArea>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(
        uploads: Arc<StorageArea>,
        outputs: Arc<StorageArea>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            uploads,
            outputs,
            config,
        }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Deletes every file in `area` older than the policy allows.
    /// Failures are logged; the sweep itself never fails.
    pub async fn sweep(area: &StorageArea, policy: RetentionPolicy) -> usize {
        let now = Utc::now();
        let result = area
            .delete_where(|file| file_age(file, now) > policy.max_age)
            .await;

        match result {
            Ok(deleted) => {
                if deleted > 0 {
                    tracing::info!(
                        "✅ Auto-cleanup completed in {}: {} files deleted (max age {:?})",
                        area.name(),
                        deleted,
                        policy.max_age
                    );
                }
                deleted
            }
            Err(e) => {
                tracing::error!("Failed to sweep {}: {}", area.name(), e);
                0
            }
        }
    }

    /// One age-based pass over both areas with their own policies.
    pub async fn sweep_all(&self) -> SweepReport {
        SweepReport {
            uploads: Self::sweep(&self.uploads, self.config.uploads).await,
            outputs: Self::sweep(&self.outputs, self.config.outputs).await,
        }
    }

    /// Runs once before the server starts accepting requests.
    pub async fn startup_sweep(&self) -> SweepReport {
        tracing::info!("🧹 Cleaning up old files...");
        let report = self.sweep_all().await;
        tracing::info!(
            "🧹 Startup sweep removed {} uploads and {} outputs",
            report.uploads,
            report.outputs
        );
        report
    }

    /// Unconditionally deletes every file in both areas. Returns the number deleted.
    pub async fn purge_all(&self) -> usize {
        let mut deleted = 0;

        for area in [&self.uploads, &self.outputs] {
            match area.delete_where(|_| true).await {
                Ok(n) => deleted += n,
                Err(e) => tracing::error!("Failed to purge {}: {}", area.name(), e),
            }
        }

        tracing::info!("✅ Cleanup completed: {} files deleted", deleted);
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::SystemTime;

    fn touch(path: &Path, age: Duration) {
        std::fs::write(path, b"data").unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    async fn areas() -> (tempfile::TempDir, Arc<StorageArea>, Arc<StorageArea>) {
        let dir = tempfile::tempdir().unwrap();
        let uploads = Arc::new(StorageArea::new("uploads", dir.path().join("uploads")));
        let outputs = Arc::new(StorageArea::new("outputs", dir.path().join("outputs")));
        uploads.ensure_dir().await.unwrap();
        outputs.ensure_dir().await.unwrap();
        (dir, uploads, outputs)
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired() {
        let (_dir, uploads, _outputs) = areas().await;
        touch(&uploads.root().join("old.csv"), Duration::from_secs(2 * 3600));
        touch(&uploads.root().join("fresh.csv"), Duration::from_secs(30 * 60));

        let policy = RetentionPolicy::new(Duration::from_secs(3600));
        assert_eq!(RetentionSweeper::sweep(&uploads, policy).await, 1);

        let names: Vec<String> = uploads
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["fresh.csv".to_string()]);
    }

    #[tokio::test]
    async fn test_startup_sweep_uses_area_policies() {
        let (_dir, uploads, outputs) = areas().await;
        // Two hours old: expired as an upload, retained as an output
        touch(&uploads.root().join("1_trades.xlsx"), Duration::from_secs(2 * 3600));
        touch(&outputs.root().join("dashboard_1.xlsx"), Duration::from_secs(2 * 3600));
        touch(&outputs.root().join("dashboard_0.xlsx"), Duration::from_secs(25 * 3600));

        let sweeper =
            RetentionSweeper::new(uploads.clone(), outputs.clone(), RetentionConfig::default());
        let report = sweeper.startup_sweep().await;

        assert_eq!(report, SweepReport { uploads: 1, outputs: 1 });
        assert!(uploads.list().await.unwrap().is_empty());
        assert_eq!(outputs.list().await.unwrap()[0].name, "dashboard_1.xlsx");
    }

    #[tokio::test]
    async fn test_purge_all_is_idempotent() {
        let (_dir, uploads, outputs) = areas().await;
        touch(&uploads.root().join("a.csv"), Duration::ZERO);
        touch(&uploads.root().join("b.xls"), Duration::from_secs(10 * 3600));
        touch(&outputs.root().join("dashboard_1.xlsx"), Duration::ZERO);

        let sweeper =
            RetentionSweeper::new(uploads.clone(), outputs.clone(), RetentionConfig::default());
        assert_eq!(sweeper.purge_all().await, 3);
        assert!(uploads.list().await.unwrap().is_empty());
        assert!(outputs.list().await.unwrap().is_empty());
        assert_eq!(sweeper.purge_all().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_of_missing_directory_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let area = StorageArea::new("uploads", dir.path().join("does-not-exist"));
        let policy = RetentionPolicy::new(Duration::from_secs(1));
        assert_eq!(RetentionSweeper::sweep(&area, policy).await, 0);
    }

    #[test]
    fn test_future_mtime_has_zero_age() {
        let now = Utc::now();
        let file = StoredFile {
            name: "x".to_string(),
            size: 0,
            modified: now + chrono::Duration::minutes(5),
        };
        assert_eq!(file_age(&file, now), Duration::ZERO);
    }
}
