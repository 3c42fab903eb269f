//! Open destination handles with one writer per path.
//!
//! The map lock is held only to look up, insert, claim or remove an entry.
//! File I/O happens through a [`HandleGuard`] after the lock is released, so
//! writers to different paths never wait on each other.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct HandleEntry {
    file: Mutex<Option<File>>,
    last_touched: Mutex<Instant>,
    claimed: AtomicBool,
}

impl HandleEntry {
    fn claimed() -> Arc<Self> {
        Arc::new(Self {
            file: Mutex::new(None),
            last_touched: Mutex::new(Instant::now()),
            claimed: AtomicBool::new(true),
        })
    }
}

/// Result of asking for a path.
pub enum Claim<'a> {
    /// No entry existed; a claimed one without a handle was inserted.
    Vacant(HandleGuard<'a>),
    /// An idle entry existed and is now claimed; it may hold an open handle.
    Occupied(HandleGuard<'a>),
    /// Another operation holds the path.
    InUse,
}

#[derive(Default)]
pub struct HandleArbiter {
    entries: Mutex<HashMap<PathBuf, Arc<HandleEntry>>>,
}

impl HandleArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, path: &Path) -> Claim<'_> {
        let mut entries = self.entries.lock();
        match entries.get(path) {
            Some(entry) => {
                if entry
                    .claimed
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return Claim::InUse;
                }
                Claim::Occupied(HandleGuard::new(self, path, Arc::clone(entry)))
            }
            None => {
                let entry = HandleEntry::claimed();
                entries.insert(path.to_path_buf(), Arc::clone(&entry));
                Claim::Vacant(HandleGuard::new(self, path, entry))
            }
        }
    }

    /// Close every unclaimed entry untouched for longer than `idle`.
    pub fn sweep(&self, idle: Duration) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut closed = Vec::new();
        self.entries.lock().retain(|path, entry| {
            let keep = entry.claimed.load(Ordering::Acquire)
                || now.duration_since(*entry.last_touched.lock()) <= idle;
            if !keep {
                closed.push(path.clone());
            }
            keep
        });
        for path in &closed {
            debug!(path = %path.display(), "closed idle file handle");
        }
        closed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.entries
            .lock()
            .get(path)
            .is_some_and(|e| e.claimed.load(Ordering::Acquire))
    }

    fn remove_if_same(&self, path: &Path, entry: &Arc<HandleEntry>) {
        let mut entries = self.entries.lock();
        if entries.get(path).is_some_and(|cur| Arc::ptr_eq(cur, entry)) {
            entries.remove(path);
        }
    }

    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        idle: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let arbiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let closed = arbiter.sweep(idle);
                        if !closed.is_empty() {
                            info!(closed = closed.len(), open = arbiter.len(), "file handle sweep");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}

/// Exclusive access to one path's entry.
///
/// Dropping the guard releases the claim, or removes the entry if it never
/// got an open handle.
pub struct HandleGuard<'a> {
    arbiter: &'a HandleArbiter,
    path: PathBuf,
    entry: Arc<HandleEntry>,
    settled: bool,
}

impl<'a> HandleGuard<'a> {
    fn new(arbiter: &'a HandleArbiter, path: &Path, entry: Arc<HandleEntry>) -> Self {
        Self {
            arbiter,
            path: path.to_path_buf(),
            entry,
            settled: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The open handle, if any. Uncontended while the claim is held.
    pub fn handle(&self) -> MutexGuard<'_, Option<File>> {
        self.entry.file.lock()
    }

    pub fn install(&self, file: File) {
        *self.entry.file.lock() = Some(file);
    }

    /// Close the cached handle but keep the claim.
    pub fn close_handle(&self) {
        self.entry.file.lock().take();
    }

    /// Keep the entry cached and let the next operation claim it.
    pub fn release(mut self) {
        self.unclaim();
    }

    /// Drop the entry and its handle.
    pub fn evict(mut self) {
        self.remove();
    }

    fn unclaim(&mut self) {
        *self.entry.last_touched.lock() = Instant::now();
        self.entry.claimed.store(false, Ordering::Release);
        self.settled = true;
    }

    fn remove(&mut self) {
        self.entry.file.lock().take();
        self.arbiter.remove_if_same(&self.path, &self.entry);
        self.entry.claimed.store(false, Ordering::Release);
        self.settled = true;
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if self.entry.file.lock().is_some() {
            self.unclaim();
        } else {
            self.remove();
        }
    }
}
