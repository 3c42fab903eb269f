//! Per-path upload progress and the reconciliation rule that decides
//! whether a freshly observed file size needs an upload, and from where.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferState {
    /// Size of the local file when last observed
    pub size: u64,
    /// Bytes the server has acknowledged
    pub confirmed: u64,
    pub in_flight: bool,
}

/// Outcome of [`TransferTable::reconcile`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Start a transfer at `resume_from`; the path is now marked in flight.
    NeedUpload { resume_from: u64 },
    /// Another transfer owns the path; re-enqueue and try later.
    Uploading,
    /// The server already holds every byte.
    NoNeedUpload,
}

#[derive(Debug, Default)]
pub struct TransferTable {
    states: Mutex<HashMap<PathBuf, TransferState>>,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the stored state for `path` with its current size.
    ///
    /// | stored                         | decision                 |
    /// |--------------------------------|--------------------------|
    /// | none                           | upload from 0            |
    /// | in flight                      | `Uploading`              |
    /// | same size, confirmed == size   | `NoNeedUpload`           |
    /// | same size, confirmed < size    | upload from confirmed    |
    /// | same size, confirmed > size    | upload from 0 (anomaly)  |
    /// | stored size > reported (shrank)| upload from 0            |
    /// | stored size < reported (grew)  | upload from confirmed    |
    pub fn reconcile(&self, path: &Path, reported: u64) -> Decision {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(path) else {
            states.insert(
                path.to_path_buf(),
                TransferState {
                    size: reported,
                    confirmed: 0,
                    in_flight: true,
                },
            );
            return Decision::NeedUpload { resume_from: 0 };
        };

        if state.in_flight {
            return Decision::Uploading;
        }

        if state.size == reported {
            if state.confirmed == state.size {
                return Decision::NoNeedUpload;
            }
            if state.confirmed > state.size {
                warn!(
                    path = %path.display(),
                    confirmed = state.confirmed,
                    size = state.size,
                    "confirmed offset beyond file size, restarting upload"
                );
                state.confirmed = 0;
            }
        } else if state.size > reported {
            debug!(
                path = %path.display(),
                old_size = state.size,
                new_size = reported,
                "file shrank, restarting upload"
            );
            state.confirmed = 0;
            state.size = reported;
        } else {
            state.size = reported;
        }

        state.in_flight = true;
        Decision::NeedUpload {
            resume_from: state.confirmed,
        }
    }

    /// Record acknowledged progress of an in-flight transfer.
    ///
    /// Does nothing if the path was forgotten meanwhile.
    pub fn record_progress(&self, path: &Path, confirmed: u64, size: u64) {
        if let Some(state) = self.states.lock().get_mut(path) {
            state.confirmed = confirmed;
            state.size = size;
            state.in_flight = true;
        }
    }

    /// Clear the in-flight mark once a transfer attempt ends.
    pub fn finish(&self, path: &Path) {
        if let Some(state) = self.states.lock().get_mut(path) {
            state.in_flight = false;
        }
    }

    /// Drop acknowledged progress so the next attempt starts from zero.
    pub fn restart(&self, path: &Path) {
        if let Some(state) = self.states.lock().get_mut(path) {
            state.confirmed = 0;
        }
    }

    /// Insert or overwrite a known state, e.g. from the startup diff.
    pub fn seed(&self, path: &Path, size: u64, confirmed: u64) {
        self.states.lock().insert(
            path.to_path_buf(),
            TransferState {
                size,
                confirmed,
                in_flight: false,
            },
        );
    }

    pub fn forget(&self, path: &Path) -> bool {
        self.states.lock().remove(path).is_some()
    }

    pub fn get(&self, path: &Path) -> Option<TransferState> {
        self.states.lock().get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(size: u64, confirmed: u64) -> (TransferTable, PathBuf) {
        let table = TransferTable::new();
        let path = PathBuf::from("/w/app.log");
        table.seed(&path, size, confirmed);
        (table, path)
    }

    #[test]
    fn first_observation_uploads_from_zero() {
        let table = TransferTable::new();
        let path = Path::new("/w/new.txt");
        assert_eq!(
            table.reconcile(path, 10),
            Decision::NeedUpload { resume_from: 0 }
        );
        let state = table.get(path).unwrap();
        assert!(state.in_flight);
        assert_eq!(state.size, 10);
    }

    #[test]
    fn in_flight_path_reports_uploading() {
        let table = TransferTable::new();
        let path = Path::new("/w/a");
        table.reconcile(path, 10);
        assert_eq!(table.reconcile(path, 20), Decision::Uploading);
        table.finish(path);
        assert_eq!(
            table.reconcile(path, 20),
            Decision::NeedUpload { resume_from: 0 }
        );
    }

    #[test]
    fn complete_file_needs_nothing() {
        let (table, path) = table_with(100, 100);
        assert_eq!(table.reconcile(&path, 100), Decision::NoNeedUpload);
        assert!(!table.get(&path).unwrap().in_flight);
    }

    #[test]
    fn restart_resets_confirmed_offset() {
        let (table, path) = table_with(100, 40);
        table.restart(&path);
        assert_eq!(
            table.reconcile(&path, 100),
            Decision::NeedUpload { resume_from: 0 }
        );
    }

    #[test]
    fn partial_file_resumes() {
        let (table, path) = table_with(100, 40);
        assert_eq!(
            table.reconcile(&path, 100),
            Decision::NeedUpload { resume_from: 40 }
        );
        assert!(table.get(&path).unwrap().in_flight);
    }

    #[test]
    fn shrunk_file_restarts() {
        let (table, path) = table_with(100, 40);
        assert_eq!(
            table.reconcile(&path, 50),
            Decision::NeedUpload { resume_from: 0 }
        );
        let state = table.get(&path).unwrap();
        assert_eq!(state.confirmed, 0);
        assert_eq!(state.size, 50);
    }

    #[test]
    fn grown_file_resumes_and_extends() {
        let (table, path) = table_with(100, 40);
        assert_eq!(
            table.reconcile(&path, 150),
            Decision::NeedUpload { resume_from: 40 }
        );
        assert_eq!(table.get(&path).unwrap().size, 150);
    }

    #[test]
    fn offset_past_size_is_reset() {
        let (table, path) = table_with(100, 140);
        assert_eq!(
            table.reconcile(&path, 100),
            Decision::NeedUpload { resume_from: 0 }
        );
        assert_eq!(table.get(&path).unwrap().confirmed, 0);
    }

    #[test]
    fn progress_on_forgotten_path_is_dropped() {
        let table = TransferTable::new();
        let path = Path::new("/w/gone");
        table.reconcile(path, 10);
        assert!(table.forget(path));
        table.record_progress(path, 5, 10);
        assert!(table.get(path).is_none());
        assert!(table.is_empty());
    }
}
