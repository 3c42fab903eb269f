//! Executes one decoded frame against the destination tree.
//!
//! Everything here is blocking file I/O; the connection handler runs it on
//! the blocking pool.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::{Frame, Response};
use crate::compress::gunzip;
use crate::paths::{ensure_parent_exists, resolve_under_root};
use crate::protocol::Status;
use crate::server::arbiter::{Claim, HandleArbiter, HandleGuard};

enum Written {
    Bytes(u64),
    /// The file is shorter than the requested offset; carries its size.
    Behind(u64),
}

#[derive(Clone)]
pub struct Dispatcher {
    root: PathBuf,
    arbiter: Arc<HandleArbiter>,
}

impl Dispatcher {
    pub fn new(root: PathBuf, arbiter: Arc<HandleArbiter>) -> Self {
        Self { root, arbiter }
    }

    pub fn arbiter(&self) -> &Arc<HandleArbiter> {
        &self.arbiter
    }

    /// Inflate a compressed payload, then dispatch.
    pub fn handle_frame(&self, frame: Frame) -> Response {
        let payload = if frame.compressed {
            match gunzip(&frame.payload) {
                Ok(p) => p,
                Err(e) => {
                    warn!(path = %frame.path, error = %e, "corrupt compressed payload");
                    return Response::new(Status::WriteError, 0);
                }
            }
        } else {
            frame.payload
        };
        self.dispatch(&frame.path, frame.offset, &payload)
    }

    pub fn dispatch(&self, wire_path: &str, offset: u64, payload: &[u8]) -> Response {
        let dest = match resolve_under_root(&self.root, wire_path) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %wire_path, error = %e, "rejected destination path");
                return Response::new(Status::CreateError, 0);
            }
        };
        if offset == 0 {
            self.write_fresh(&dest, payload)
        } else {
            self.write_at(&dest, offset, payload)
        }
    }

    fn write_fresh(&self, dest: &Path, payload: &[u8]) -> Response {
        let guard = match self.arbiter.claim(dest) {
            Claim::InUse => return Response::new(Status::FileInUse, 0),
            Claim::Vacant(g) | Claim::Occupied(g) => g,
        };
        guard.close_handle();

        if fs::symlink_metadata(dest).is_ok() {
            if let Err(e) = fs::remove_file(dest) {
                warn!(path = %dest.display(), error = %e, "remove before rewrite failed");
                guard.evict();
                return Response::new(Status::RemoveError, 0);
            }
        }
        let mut file = match ensure_parent_exists(dest).and_then(|_| {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(dest)
        }) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %dest.display(), error = %e, "create failed");
                guard.evict();
                return Response::new(Status::CreateError, 0);
            }
        };
        if let Err(e) = file.write_all(payload) {
            warn!(path = %dest.display(), error = %e, "write failed");
            guard.evict();
            return Response::new(Status::WriteError, 0);
        }

        guard.install(file);
        guard.release();
        Response::new(Status::Succeed, payload.len() as u64)
    }

    fn write_at(&self, dest: &Path, offset: u64, payload: &[u8]) -> Response {
        if !dest.is_file() {
            return Response::new(Status::FileNotExist, 0);
        }
        let guard = match self.arbiter.claim(dest) {
            Claim::InUse => return Response::new(Status::FileInUse, 0),
            Claim::Vacant(g) | Claim::Occupied(g) => g,
        };
        if guard.handle().is_none() {
            match OpenOptions::new().write(true).create(true).open(dest) {
                Ok(f) => guard.install(f),
                Err(e) => {
                    warn!(path = %dest.display(), error = %e, "open failed");
                    guard.evict();
                    return Response::new(Status::CreateError, 0);
                }
            }
        }

        let result = match guard.handle().as_mut() {
            Some(file) => validate_and_write(file, offset, payload),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "handle vanished")),
        };
        settle(guard, offset, result)
    }
}

fn settle(guard: HandleGuard<'_>, offset: u64, result: io::Result<Written>) -> Response {
    match result {
        Ok(Written::Bytes(n)) => {
            guard.release();
            Response::new(Status::Succeed, n)
        }
        Ok(Written::Behind(size)) => {
            debug!(path = %guard.path().display(), offset, size, "offset past end of file");
            guard.evict();
            Response::new(Status::PositionMismatch, size)
        }
        Err(e) => {
            warn!(path = %guard.path().display(), offset, error = %e, "write failed");
            guard.evict();
            Response::new(Status::WriteError, 0)
        }
    }
}

/// Write `payload` at `offset` if the file is at least that long, cutting
/// off anything beyond `offset` first.
fn validate_and_write(file: &mut File, offset: u64, payload: &[u8]) -> io::Result<Written> {
    let size = file.metadata()?.len();
    if size < offset {
        return Ok(Written::Behind(size));
    }
    if size > offset {
        file.set_len(offset)?;
    }
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(payload)?;
    Ok(Written::Bytes(payload.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::gzip;

    fn dispatcher() -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let d = Dispatcher::new(dir.path().to_path_buf(), Arc::new(HandleArbiter::new()));
        (dir, d)
    }

    fn on_disk(dir: &tempfile::TempDir, rel: &str) -> Vec<u8> {
        fs::read(dir.path().join(rel)).unwrap()
    }

    #[test]
    fn fresh_write_creates_parents() {
        let (dir, d) = dispatcher();
        let r = d.dispatch("/pre/app/a.log", 0, b"hello");
        assert_eq!(r, Response::new(Status::Succeed, 5));
        assert_eq!(on_disk(&dir, "pre/app/a.log"), b"hello");
    }

    #[test]
    fn fresh_write_replaces_existing_file() {
        let (dir, d) = dispatcher();
        fs::write(dir.path().join("a"), b"old contents that are long").unwrap();
        assert_eq!(d.dispatch("/a", 0, b"new").status, Status::Succeed);
        assert_eq!(on_disk(&dir, "a"), b"new");
    }

    #[test]
    fn empty_fresh_write_creates_empty_file() {
        let (dir, d) = dispatcher();
        assert_eq!(d.dispatch("/empty", 0, b""), Response::new(Status::Succeed, 0));
        assert!(on_disk(&dir, "empty").is_empty());
    }

    #[test]
    fn chunks_append_in_order() {
        let (dir, d) = dispatcher();
        assert_eq!(d.dispatch("/a", 0, b"abc").status, Status::Succeed);
        assert_eq!(d.dispatch("/a", 3, b"def").status, Status::Succeed);
        assert_eq!(on_disk(&dir, "a"), b"abcdef");
    }

    #[test]
    fn resume_without_file_is_not_exist() {
        let (_dir, d) = dispatcher();
        assert_eq!(
            d.dispatch("/missing", 10, b"x"),
            Response::new(Status::FileNotExist, 0)
        );
    }

    #[test]
    fn offset_past_end_reports_actual_size() {
        let (dir, d) = dispatcher();
        fs::write(dir.path().join("a"), vec![b'x'; 30]).unwrap();

        assert_eq!(
            d.dispatch("/a", 50, b"late"),
            Response::new(Status::PositionMismatch, 30)
        );
        assert_eq!(on_disk(&dir, "a").len(), 30);

        assert_eq!(d.dispatch("/a", 30, b"yy"), Response::new(Status::Succeed, 2));
        assert_eq!(on_disk(&dir, "a").len(), 32);
    }

    #[test]
    fn longer_file_is_truncated_before_write() {
        let (dir, d) = dispatcher();
        fs::write(dir.path().join("a"), b"0123456789").unwrap();
        assert_eq!(d.dispatch("/a", 4, b"ab").status, Status::Succeed);
        assert_eq!(on_disk(&dir, "a"), b"0123ab");
    }

    #[test]
    fn claimed_path_is_in_use_and_untouched() {
        let (dir, d) = dispatcher();
        fs::write(dir.path().join("a"), b"first").unwrap();
        let dest = resolve_under_root(dir.path(), "/a").unwrap();

        let held = d.arbiter().claim(&dest);
        assert!(matches!(held, Claim::Vacant(_)));
        assert_eq!(d.dispatch("/a", 0, b"second"), Response::new(Status::FileInUse, 0));
        assert_eq!(d.dispatch("/a", 5, b"more"), Response::new(Status::FileInUse, 0));
        assert_eq!(on_disk(&dir, "a"), b"first");
        drop(held);

        assert_eq!(d.dispatch("/a", 0, b"second").status, Status::Succeed);
        assert_eq!(on_disk(&dir, "a"), b"second");
    }

    #[test]
    fn successful_write_leaves_cached_unclaimed_handle() {
        let (dir, d) = dispatcher();
        d.dispatch("/a", 0, b"abc");
        let dest = resolve_under_root(dir.path(), "/a").unwrap();
        assert_eq!(d.arbiter().len(), 1);
        assert!(!d.arbiter().is_claimed(&dest));
    }

    #[test]
    fn traversal_is_a_create_error() {
        let (_dir, d) = dispatcher();
        assert_eq!(
            d.dispatch("/../escape", 0, b"x"),
            Response::new(Status::CreateError, 0)
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_ancestor_cannot_receive_new_dirs() {
        let (dir, d) = dispatcher();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        assert_eq!(
            d.dispatch("/link/newdir/file.txt", 0, b"x"),
            Response::new(Status::CreateError, 0)
        );
        assert!(!outside.path().join("newdir").exists());
        assert!(d.arbiter().is_empty());
    }

    #[test]
    fn compressed_frames_are_inflated() {
        let (dir, d) = dispatcher();
        let body = vec![b'z'; 4096];
        let frame = Frame::new("/z.log", 0, gzip(&body).unwrap(), true);
        assert_eq!(d.handle_frame(frame), Response::new(Status::Succeed, 4096));
        assert_eq!(on_disk(&dir, "z.log"), body);
    }

    #[test]
    fn corrupt_compressed_payload_is_write_error() {
        let (_dir, d) = dispatcher();
        let frame = Frame::new("/z.log", 0, b"not gzip".to_vec(), true);
        assert_eq!(d.handle_frame(frame), Response::new(Status::WriteError, 0));
    }
}
