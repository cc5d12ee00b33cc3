use crate::api::error::AppError;
use crate::utils::keyed_lock::{KeyedLock, ReadGuard, WriteGuard};
use crate::utils::validation::validate_storage_key;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use uuid::Uuid;

const MAX_NAME_ATTEMPTS: usize = 8;

/// Prefix of files still being written by a job. Hidden from listing and download.
const PENDING_PREFIX: &str = ".pending-";

fn pending_key(key: &str) -> String {
    format!("{}{}", PENDING_PREFIX, key)
}

/// Key whose lock covers `name`: a pending file shares the lock of its final name.
fn lock_key(name: &str) -> &str {
    name.strip_prefix(PENDING_PREFIX).unwrap_or(name)
}

/// Metadata view of one entry in a storage area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl StoredFile {
    fn from_metadata(name: String, metadata: &std::fs::Metadata) -> Self {
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        Self {
            name,
            size: metadata.len(),
            modified,
        }
    }
}

/// A freshly created, exclusively locked file
pub struct Reservation {
    pub key: String,
    pub path: PathBuf,
    pub file: File,
    pub guard: WriteGuard,
}

/// A hidden file another program writes to, published under `key` by `commit`.
/// Dropped without commit, the pending file is removed.
pub struct PendingFile {
    key: String,
    path: PathBuf,
    pending_path: PathBuf,
    committed: bool,
    _guard: WriteGuard,
}

impl PendingFile {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Where the writer should put its output.
    pub fn pending_path(&self) -> &Path {
        &self.pending_path
    }

    /// Moves the pending file to its final name.
    pub async fn commit(mut self) -> Result<StoredFile, AppError> {
        fs::rename(&self.pending_path, &self.path).await?;
        self.committed = true;
        let metadata = fs::metadata(&self.path).await?;
        Ok(StoredFile::from_metadata(self.key.clone(), &metadata))
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Also runs when the owning request is dropped mid-job
        match std::fs::remove_file(&self.pending_path) {
            Ok(()) => tracing::info!("🗑️  Discarded unfinished {}", self.key),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove pending {}: {}", self.key, e),
        }
    }
}

/// Short random token inserted into a generated name when the plain name is taken
pub fn collision_token() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// One flat directory of generated file names.
pub struct StorageArea {
    name: &'static str,
    root: PathBuf,
    locks: KeyedLock,
}

impl StorageArea {
    pub fn new(name: &'static str, root: impl Into<PathBuf>) -> Self {
        Self {
            name,
            root: root.into(),
            locks: KeyedLock::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    /// Resolves a caller-supplied key inside this area.
    pub fn path_of(&self, key: &str) -> Result<PathBuf, AppError> {
        validate_storage_key(key).map_err(|e| AppError::InvalidInput(e.message))?;
        Ok(self.root.join(key))
    }

    pub async fn read_lock(&self, key: &str) -> ReadGuard {
        self.locks.read(key).await
    }

    /// Creates a new file under the first free name produced by `make_key`.
    /// `make_key` receives `None` first and a random token on each retry.
    pub async fn reserve<F>(&self, make_key: F) -> Result<Reservation, AppError>
    where
        F: Fn(Option<&str>) -> String,
    {
        let mut token: Option<String> = None;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let key = make_key(token.as_deref());
            let path = self.path_of(&key)?;
            let guard = self.locks.write(&key).await;

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    return Ok(Reservation {
                        key,
                        path,
                        file,
                        guard,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!("Name {} already taken in {}, retrying", key, self.name);
                    token = Some(collision_token());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::Internal(format!(
            "Could not allocate a unique file name in {}",
            self.name
        )))
    }

    /// Like `reserve`, but the file is created hidden and only appears under
    /// its name once committed. The name stays locked until then.
    pub async fn reserve_pending<F>(&self, make_key: F) -> Result<PendingFile, AppError>
    where
        F: Fn(Option<&str>) -> String,
    {
        let mut token: Option<String> = None;

        for _ in 0..MAX_NAME_ATTEMPTS {
            let key = make_key(token.as_deref());
            let path = self.path_of(&key)?;
            let pending_path = self.path_of(&pending_key(&key))?;
            let guard = self.locks.write(&key).await;

            let taken = fs::try_exists(&path).await?;
            let created = if taken {
                None
            } else {
                match OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&pending_path)
                    .await
                {
                    Ok(file) => Some(file),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => None,
                    Err(e) => return Err(e.into()),
                }
            };

            match created {
                Some(_file) => {
                    return Ok(PendingFile {
                        key,
                        path,
                        pending_path,
                        committed: false,
                        _guard: guard,
                    });
                }
                None => {
                    tracing::debug!("Name {} already taken in {}, retrying", key, self.name);
                    token = Some(collision_token());
                }
            }
        }

        Err(AppError::Internal(format!(
            "Could not allocate a unique file name in {}",
            self.name
        )))
    }

    /// Streams `reader` into a new file named by `make_key`.
    /// A failed copy leaves the partial file in place.
    pub async fn put<F, R>(&self, make_key: F, reader: &mut R) -> Result<StoredFile, AppError>
    where
        F: Fn(Option<&str>) -> String,
        R: AsyncRead + Unpin + ?Sized,
    {
        let Reservation {
            key,
            mut file,
            guard,
            ..
        } = self.reserve(make_key).await?;

        let written = tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;

        let metadata = file.metadata().await?;
        drop(guard);

        let mut stored = StoredFile::from_metadata(key, &metadata);
        stored.size = written;
        Ok(stored)
    }

    /// Opens an existing file for reading. Invalid and missing names are both `NotFound`.
    pub async fn open(&self, key: &str) -> Result<(File, StoredFile), AppError> {
        let not_found = || AppError::NotFound(format!("File not found: {}", key));

        if key.starts_with(PENDING_PREFIX) {
            return Err(not_found());
        }
        let path = self.path_of(key).map_err(|_| not_found())?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        Ok((file, StoredFile::from_metadata(key.to_string(), &metadata)))
    }

    /// Metadata of a published file, `None` when absent.
    pub async fn stat(&self, key: &str) -> Result<Option<StoredFile>, AppError> {
        let path = self.path_of(key)?;
        if key.starts_with(PENDING_PREFIX) {
            return Ok(None);
        }
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {
                Ok(Some(StoredFile::from_metadata(key.to_string(), &metadata)))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every published file, in directory enumeration order.
    pub async fn list(&self) -> Result<Vec<StoredFile>, AppError> {
        let mut files = self.entries().await?;
        files.retain(|f| !f.name.starts_with(PENDING_PREFIX));
        Ok(files)
    }

    /// Every non-directory entry, pending files included.
    async fn entries(&self) -> Result<Vec<StoredFile>, AppError> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    // Removed between read_dir and stat
                    tracing::debug!("Skipping {:?}: {}", entry.file_name(), e);
                    continue;
                }
            };
            if metadata.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            files.push(StoredFile::from_metadata(name, &metadata));
        }

        Ok(files)
    }

    /// Deletes one published file, waiting for readers and writers of that key.
    /// Returns false if absent.
    pub async fn delete(&self, key: &str) -> Result<bool, AppError> {
        let path = self.path_of(key)?;
        let _guard = self.locks.write(key).await;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!("🗑️  Deleted {} from {}", key, self.name);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every file matching `predicate`, pending leftovers included.
    /// Files that are locked or fail to delete are logged and skipped.
    pub async fn delete_where<P>(&self, predicate: P) -> Result<usize, AppError>
    where
        P: Fn(&StoredFile) -> bool,
    {
        let mut deleted = 0;

        for file in self.entries().await? {
            if !predicate(&file) {
                continue;
            }

            let Some(_guard) = self.locks.try_write(lock_key(&file.name)) else {
                tracing::info!("⏳ Skipping {} in {}: file is in use", file.name, self.name);
                continue;
            };

            match fs::remove_file(self.root.join(&file.name)).await {
                Ok(()) => {
                    deleted += 1;
                    tracing::info!("🗑️  Deleted {} from {}", file.name, self.name);
                }
                Err(e) => {
                    tracing::warn!("Failed to delete {} from {}: {}", file.name, self.name, e);
                }
            }
        }

        self.locks.cleanup();
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn area() -> (tempfile::TempDir, StorageArea) {
        let dir = tempfile::tempdir().unwrap();
        let area = StorageArea::new("uploads", dir.path().join("uploads"));
        area.ensure_dir().await.unwrap();
        (dir, area)
    }

    #[tokio::test]
    async fn test_put_then_open() {
        let (_dir, area) = area().await;
        let mut body: &[u8] = b"a,b,c\n1,2,3\n";
        let stored = area
            .put(|_| "100_trades.csv".to_string(), &mut body)
            .await
            .unwrap();
        assert_eq!(stored.name, "100_trades.csv");
        assert_eq!(stored.size, 12);

        let (mut file, meta) = area.open("100_trades.csv").await.unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"a,b,c\n1,2,3\n");
        assert_eq!(meta.size, 12);
    }

    #[tokio::test]
    async fn test_reserve_never_overwrites() {
        let (_dir, area) = area().await;
        let make = |token: Option<&str>| match token {
            Some(t) => format!("100-{}_trades.csv", t),
            None => "100_trades.csv".to_string(),
        };

        let mut first: &[u8] = b"first";
        let mut second: &[u8] = b"second";
        let a = area.put(make, &mut first).await.unwrap();
        let b = area.put(make, &mut second).await.unwrap();

        assert_eq!(a.name, "100_trades.csv");
        assert_ne!(a.name, b.name);
        assert!(b.name.starts_with("100-") && b.name.ends_with("_trades.csv"));
        assert_eq!(area.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_open_rejects_traversal_as_not_found() {
        let (_dir, area) = area().await;
        assert!(matches!(
            area.open("../secret").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            area.open("missing.xlsx").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_skips_directories() {
        let (_dir, area) = area().await;
        fs::create_dir(area.root().join("nested")).await.unwrap();
        fs::write(area.root().join("1_a.csv"), b"x").await.unwrap();

        let files = area.list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "1_a.csv");
        assert_eq!(files[0].size, 1);
    }

    #[tokio::test]
    async fn test_lock_map_drains_after_use() {
        let (_dir, area) = area().await;
        for i in 0..500 {
            let mut body: &[u8] = b"x";
            let stored = area
                .put(|_| format!("{}_trades.csv", i), &mut body)
                .await
                .unwrap();
            let _reading = area.read_lock(&stored.name).await;
        }
        assert!(area.locks.is_empty());

        for i in 0..250 {
            assert!(area.delete(&format!("{}_trades.csv", i)).await.unwrap());
        }
        assert!(!area.delete("0_trades.csv").await.unwrap());
        assert_eq!(area.delete_where(|_| true).await.unwrap(), 250);
        assert!(area.list().await.unwrap().is_empty());
        assert!(area.locks.is_empty());
    }

    #[tokio::test]
    async fn test_pending_file_hidden_until_commit() {
        let (_dir, area) = area().await;
        let pending = area
            .reserve_pending(|_| "dashboard_1.xlsx".to_string())
            .await
            .unwrap();
        fs::write(pending.pending_path(), b"PK").await.unwrap();

        assert!(area.list().await.unwrap().is_empty());
        assert!(area.stat("dashboard_1.xlsx").await.unwrap().is_none());
        assert!(matches!(
            area.open("dashboard_1.xlsx").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            area.open(".pending-dashboard_1.xlsx").await,
            Err(AppError::NotFound(_))
        ));

        let stored = pending.commit().await.unwrap();
        assert_eq!(stored.name, "dashboard_1.xlsx");
        assert_eq!(stored.size, 2);
        let names: Vec<String> = area.list().await.unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["dashboard_1.xlsx"]);
        assert!(area.locks.is_empty());
    }

    #[tokio::test]
    async fn test_pending_file_removed_on_drop() {
        let (_dir, area) = area().await;
        let pending = area
            .reserve_pending(|_| "dashboard_1.xlsx".to_string())
            .await
            .unwrap();
        let path = pending.pending_path().to_path_buf();
        fs::write(&path, b"half").await.unwrap();

        drop(pending);
        assert!(!path.exists());
        assert!(area.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_never_takes_a_published_name() {
        let (_dir, area) = area().await;
        fs::write(area.root().join("dashboard_1.xlsx"), b"old").await.unwrap();
        let make = |token: Option<&str>| match token {
            Some(t) => format!("dashboard_1-{}.xlsx", t),
            None => "dashboard_1.xlsx".to_string(),
        };

        let pending = area.reserve_pending(make).await.unwrap();
        assert!(pending.key().starts_with("dashboard_1-"));
        pending.commit().await.unwrap();
        assert_eq!(
            fs::read(area.root().join("dashboard_1.xlsx")).await.unwrap(),
            b"old"
        );
    }

    #[tokio::test]
    async fn test_sweep_skips_pending_file_of_running_job() {
        let (_dir, area) = area().await;
        let pending = area
            .reserve_pending(|_| "dashboard_1.xlsx".to_string())
            .await
            .unwrap();
        assert_eq!(area.delete_where(|_| true).await.unwrap(), 0);
        assert!(pending.pending_path().exists());

        // Leftover from a crashed process
        drop(pending);
        fs::write(area.root().join(".pending-dashboard_0.xlsx"), b"x").await.unwrap();
        assert_eq!(area.delete_where(|_| true).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_where_skips_locked_keys() {
        let (_dir, area) = area().await;
        fs::write(area.root().join("1_busy.csv"), b"x").await.unwrap();
        fs::write(area.root().join("1_idle.csv"), b"x").await.unwrap();

        let guard = area.read_lock("1_busy.csv").await;
        assert_eq!(area.delete_where(|_| true).await.unwrap(), 1);
        assert!(area.stat("1_busy.csv").await.unwrap().is_some());

        drop(guard);
        assert_eq!(area.delete_where(|_| true).await.unwrap(), 1);
        assert!(area.list().await.unwrap().is_empty());
    }
}
