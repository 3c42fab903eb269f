//! Filesystem change feeder
//!
//! ```text
//! inotify / kqueue / ReadDirectoryChangesW
//!       │
//!       ▼
//!  ChangeFeeder (notify callback) ──→ PendingSet ──→ Scheduler
//! ```
//!
//! The callback runs on the watcher's own thread and only inserts paths;
//! the scheduler stats each path itself, so a delete needs no special
//! treatment here.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::client::mapping::RemoteMapper;
use crate::client::pending::PendingSet;

/// Keeps the OS watch alive; dropping it stops the feed.
pub struct ChangeFeeder {
    _watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl ChangeFeeder {
    /// Watch every mapped local root recursively.
    pub fn start(mapper: Arc<RemoteMapper>, pending: Arc<PendingSet>) -> Result<Self> {
        let filter = Arc::clone(&mapper);
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for path in event_paths(&event) {
                        feed(&filter, &pending, path);
                    }
                }
                Err(err) => error!(error = %err, "file watcher error"),
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        let roots: Vec<PathBuf> = mapper.local_roots().map(Path::to_path_buf).collect();
        for root in &roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch path: {}", root.display()))?;
            info!(path = %root.display(), "watching");
        }
        Ok(Self {
            _watcher: watcher,
            roots,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

fn feed(mapper: &RemoteMapper, pending: &PendingSet, path: PathBuf) {
    // A directory moved into a watched tree arrives as a single event
    if path.is_dir() {
        for entry in WalkDir::new(&path).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && mapper.remote_path(entry.path()).is_some() {
                pending.add(entry.into_path());
            }
        }
        return;
    }
    if mapper.remote_path(&path).is_some() {
        debug!(path = %path.display(), "change queued");
        pending.add(path);
    }
}

/// Paths worth rescheduling for one raw event. Access and metadata-only
/// events yield nothing.
pub fn event_paths(event: &notify::Event) -> Vec<PathBuf> {
    match &event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        // The source of a rename is gone; feeding it lets its state be dropped
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event.paths.clone(),
        EventKind::Modify(_) => event.paths.clone(),
        _ => Vec::new(),
    }
}
