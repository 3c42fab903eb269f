//! Transfer journal: one timestamped line per upload event.
//!
//! Separate from `tracing` output so operators can keep an append-only
//! record of what reached the server.

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

pub trait TransferLogger: Send + Sync {
    /// An attempt begins at `offset`.
    fn start(&self, _path: &Path, _offset: u64) {}
    /// The server holds all `size` bytes.
    fn done(&self, _path: &Path, _size: u64) {}
    /// The server asked to resume from `to` instead of `from`.
    fn rewind(&self, _path: &Path, _from: u64, _to: u64) {}
    /// The local file vanished and its state was dropped.
    fn forget(&self, _path: &Path) {}
    fn error(&self, _context: &str, _path: &Path, _msg: &str) {}
}

pub struct NoopLogger;
impl TransferLogger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create journal directory {}", parent.display()))?;
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, event: &str, path: &Path, rest: std::fmt::Arguments<'_>) {
        let mut f = self.file.lock();
        let _ = writeln!(
            f,
            "[{}] {} path={} {}",
            Utc::now().to_rfc3339(),
            event,
            path.display(),
            rest
        );
    }
}

impl TransferLogger for TextLogger {
    fn start(&self, path: &Path, offset: u64) {
        self.line("START", path, format_args!("offset={offset}"));
    }
    fn done(&self, path: &Path, size: u64) {
        self.line("DONE", path, format_args!("size={size}"));
    }
    fn rewind(&self, path: &Path, from: u64, to: u64) {
        self.line("REWIND", path, format_args!("from={from} to={to}"));
    }
    fn forget(&self, path: &Path) {
        self.line("FORGET", path, format_args!(""));
    }
    fn error(&self, context: &str, path: &Path, msg: &str) {
        self.line("ERROR", path, format_args!("ctx={context} msg={msg}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_logger_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("logs/journal.log");
        let logger = TextLogger::new(&journal).unwrap();
        logger.start(Path::new("/w/a.txt"), 0);
        logger.rewind(Path::new("/w/a.txt"), 900, 300);
        logger.done(Path::new("/w/a.txt"), 42);
        logger.error("transfer", Path::new("/w/b.txt"), "file in use");

        let text = std::fs::read_to_string(&journal).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].ends_with("START path=/w/a.txt offset=0"));
        assert!(lines[1].ends_with("REWIND path=/w/a.txt from=900 to=300"));
        assert!(lines[2].ends_with("DONE path=/w/a.txt size=42"));
        assert!(lines[3].contains("ctx=transfer msg=file in use"));
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("j.log");
        TextLogger::new(&journal).unwrap().forget(Path::new("/w/x"));
        TextLogger::new(&journal).unwrap().forget(Path::new("/w/y"));
        let text = std::fs::read_to_string(&journal).unwrap();
        assert_eq!(text.lines().count(), 2);
    }
}
