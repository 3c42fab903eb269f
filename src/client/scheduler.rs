//! Upload scheduler - drains the pending set into transfer tasks
//!
//! ```text
//! PendingSet ──take──→ stat ──→ TransferTable::reconcile ──→ WorkerPool ──→ Uploader::transfer
//!      ▲                                                                         │
//!      └───────────────────── delayed re-enqueue on failure ─────────────────────┘
//! ```
//!
//! Retries are unbounded: a path keeps coming back until its upload reaches
//! end-of-file or the file disappears.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::pending::PendingSet;
use crate::client::state::{Decision, TransferTable};
use crate::client::transfer::Uploader;
use crate::logger::TransferLogger;
use crate::worker::WorkerPool;

// Pause before an in-flight path is looked at again
const REQUEUE_DELAY: Duration = Duration::from_millis(100);

/// What the scheduler did with one path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// File is gone; its state was dropped.
    Forgotten,
    /// Not a regular file, or stat failed for another reason.
    Skipped,
    UpToDate,
    /// A transfer is already running; the path will come back.
    Requeued,
    Dispatched { offset: u64 },
    /// The worker pool was full; the path was put back.
    Saturated,
}

pub struct Scheduler {
    pending: Arc<PendingSet>,
    table: Arc<TransferTable>,
    uploader: Arc<Uploader>,
    workers: WorkerPool,
    submit_backoff: Duration,
    journal: Arc<dyn TransferLogger>,
}

impl Scheduler {
    pub fn new(
        pending: Arc<PendingSet>,
        table: Arc<TransferTable>,
        uploader: Arc<Uploader>,
        workers: WorkerPool,
        submit_backoff: Duration,
        journal: Arc<dyn TransferLogger>,
    ) -> Self {
        Self {
            pending,
            table,
            uploader,
            workers,
            submit_backoff,
            journal,
        }
    }

    /// Take paths until shutdown. Waiting on an empty set is the normal idle state.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(workers = self.workers.capacity(), "upload scheduler started");
        loop {
            let path = tokio::select! {
                _ = shutdown.cancelled() => break,
                path = self.pending.take() => path,
            };
            if self.schedule(path).await == Step::Saturated {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.submit_backoff) => {}
                }
            }
        }
        info!("upload scheduler stopped");
    }

    /// Decide what to do with one path and act on it.
    pub async fn schedule(&self, path: PathBuf) -> Step {
        let size = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return Step::Skipped,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.table.forget(&path) {
                    debug!(path = %path.display(), "file removed, state dropped");
                    self.journal.forget(&path);
                }
                return Step::Forgotten;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "stat failed");
                return Step::Skipped;
            }
        };

        match self.table.reconcile(&path, size) {
            Decision::NoNeedUpload => Step::UpToDate,
            Decision::Uploading => {
                let pending = Arc::clone(&self.pending);
                tokio::spawn(async move {
                    tokio::time::sleep(REQUEUE_DELAY).await;
                    pending.add(path);
                });
                Step::Requeued
            }
            Decision::NeedUpload { resume_from } => {
                let uploader = Arc::clone(&self.uploader);
                let task_path = path.clone();
                let submitted = self.workers.try_submit(async move {
                    uploader.transfer(task_path, resume_from).await;
                });
                match submitted {
                    Ok(_) => {
                        debug!(path = %path.display(), offset = resume_from, "transfer dispatched");
                        Step::Dispatched {
                            offset: resume_from,
                        }
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "transfer not submitted");
                        self.table.finish(&path);
                        self.pending.add(path);
                        Step::Saturated
                    }
                }
            }
        }
    }
}
