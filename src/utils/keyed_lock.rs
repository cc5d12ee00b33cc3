use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

type LockMap = Arc<DashMap<String, Arc<RwLock<()>>>>;

/// A read/write lock selected by key (a stored file name).
/// Writers, running jobs and the sweeper coordinate per file instead of
/// serialising on a whole storage area.
#[derive(Debug, Clone)]
pub struct KeyedLock {
    locks: LockMap,
}

/// Holds one key. Dropping the last holder removes the key from the map.
#[derive(Debug)]
pub struct KeyGuard<G> {
    guard: Option<G>,
    key: String,
    locks: LockMap,
}

pub type ReadGuard = KeyGuard<OwnedRwLockReadGuard<()>>;
pub type WriteGuard = KeyGuard<OwnedRwLockWriteGuard<()>>;

impl<G> Drop for KeyGuard<G> {
    fn drop(&mut self) {
        // Release the lock first so its Arc no longer counts as a holder
        drop(self.guard.take());
        self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl KeyedLock {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    fn entry(&self, key: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .value()
            .clone()
    }

    fn hold<G>(&self, key: &str, guard: G) -> KeyGuard<G> {
        KeyGuard {
            guard: Some(guard),
            key: key.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Shared access, held while a job reads the file.
    pub async fn read(&self, key: &str) -> ReadGuard {
        let guard = self.entry(key).read_owned().await;
        self.hold(key, guard)
    }

    /// Exclusive access, held while the file is written.
    pub async fn write(&self, key: &str) -> WriteGuard {
        let guard = self.entry(key).write_owned().await;
        self.hold(key, guard)
    }

    /// Exclusive access only if nobody else holds the key.
    pub fn try_write(&self, key: &str) -> Option<WriteGuard> {
        let guard = self.entry(key).try_write_owned().ok();
        match guard {
            Some(guard) => Some(self.hold(key, guard)),
            None => {
                self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
                None
            }
        }
    }

    /// Removes locks that are not currently held by any task.
    /// Catches entries left by acquisitions that were cancelled while waiting.
    pub fn cleanup(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Default for KeyedLock {
    fn default() -> Self {
        Self::new()
    }
}
