//! Deduplicated set of paths waiting for the scheduler.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub struct PendingSet {
    paths: Mutex<HashSet<PathBuf>>,
    ready: Notify,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` as needing a look. Returns `false` if it was already pending.
    ///
    /// Safe to call from non-async threads such as the watcher callback.
    pub fn add(&self, path: PathBuf) -> bool {
        let inserted = self.paths.lock().insert(path);
        if inserted {
            self.ready.notify_one();
        }
        inserted
    }

    /// Remove and return any pending path without waiting.
    pub fn try_take(&self) -> Option<PathBuf> {
        let mut paths = self.paths.lock();
        let path = paths.iter().next().cloned()?;
        paths.remove(&path);
        Some(path)
    }

    /// Remove and return a pending path, waiting while the set is empty.
    pub async fn take(&self) -> PathBuf {
        loop {
            let notified = self.ready.notified();
            if let Some(path) = self.try_take() {
                return path;
            }
            notified.await;
        }
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.paths.lock().remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
