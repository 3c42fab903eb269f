//! One file's upload: read chunks from a starting offset, send them as
//! frames over a pooled connection and follow the server's answers until
//! end-of-file or the first failure.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::client::mapping::RemoteMapper;
use crate::client::pending::PendingSet;
use crate::client::pool::{ConnPool, Connection};
use crate::client::state::TransferTable;
use crate::codec::Frame;
use crate::compress::{gzip, is_precompressed};
use crate::config::ClientConfig;
use crate::error::TransferError;
use crate::logger::TransferLogger;
use crate::protocol::Status;

/// How chunks are sized and whether they are gzip-compressed.
#[derive(Clone, Debug)]
pub struct ChunkPolicy {
    pub chunk_size: usize,
    pub precompressed_chunk_size: usize,
    pub compress_floor: usize,
    pub precompressed_suffixes: Vec<String>,
}

impl ChunkPolicy {
    pub fn from_config(cfg: &ClientConfig) -> Self {
        Self {
            chunk_size: cfg.chunk_size,
            precompressed_chunk_size: cfg.precompressed_chunk_size,
            compress_floor: cfg.compress_floor,
            precompressed_suffixes: cfg.precompressed_suffixes.clone(),
        }
    }

    fn read_size(&self, precompressed: bool) -> usize {
        if precompressed {
            self.precompressed_chunk_size
        } else {
            self.chunk_size
        }
    }

    fn pack(&self, data: Vec<u8>, precompressed: bool) -> Result<(Vec<u8>, bool), TransferError> {
        if precompressed || data.len() <= self.compress_floor {
            return Ok((data, false));
        }
        let packed = gzip(&data).map_err(TransferError::Compress)?;
        Ok((packed, true))
    }
}

/// Where an attempt stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub offset: u64,
    pub size: u64,
}

impl Progress {
    pub fn at_eof(&self) -> bool {
        self.offset == self.size
    }
}

pub struct Uploader {
    remote_addr: String,
    policy: ChunkPolicy,
    retry_delay: Duration,
    pool: Arc<ConnPool>,
    table: Arc<TransferTable>,
    pending: Arc<PendingSet>,
    mapper: Arc<RemoteMapper>,
    journal: Arc<dyn TransferLogger>,
}

fn file_err(context: &'static str) -> impl Fn(io::Error) -> TransferError {
    move |source| TransferError::File { context, source }
}

impl Uploader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        remote_addr: String,
        policy: ChunkPolicy,
        retry_delay: Duration,
        pool: Arc<ConnPool>,
        table: Arc<TransferTable>,
        pending: Arc<PendingSet>,
        mapper: Arc<RemoteMapper>,
        journal: Arc<dyn TransferLogger>,
    ) -> Self {
        Self {
            remote_addr,
            policy,
            retry_delay,
            pool,
            table,
            pending,
            mapper,
            journal,
        }
    }

    /// Run one transfer attempt for `path` from `offset`.
    ///
    /// Always clears the in-flight mark. Unless the attempt ended exactly at
    /// end-of-file the path is re-enqueued after the retry delay.
    pub async fn transfer(self: Arc<Self>, path: PathBuf, offset: u64) -> Progress {
        self.journal.start(&path, offset);
        let mut progress = Progress {
            offset,
            size: offset,
        };
        let result = self.upload(&path, &mut progress).await;
        self.table.finish(&path);

        match &result {
            Ok(()) if progress.at_eof() => {
                info!(path = %path.display(), size = progress.size, "upload complete");
                self.journal.done(&path, progress.size);
            }
            Ok(()) => {
                debug!(
                    path = %path.display(),
                    offset = progress.offset,
                    size = progress.size,
                    "file changed under upload"
                );
            }
            Err(e) => {
                warn!(path = %path.display(), offset = progress.offset, error = %e, "upload attempt failed");
                self.journal.error("transfer", &path, &e.to_string());
                if matches!(
                    e,
                    TransferError::Remote {
                        status: Status::FileNotExist,
                        ..
                    }
                ) {
                    // Destination vanished server-side; resend the whole file
                    self.table.restart(&path);
                }
            }
        }

        if result.is_err() || !progress.at_eof() {
            self.schedule_retry(path);
        }
        progress
    }

    fn schedule_retry(&self, path: PathBuf) {
        let pending = Arc::clone(&self.pending);
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.add(path);
        });
    }

    async fn upload(&self, path: &Path, progress: &mut Progress) -> Result<(), TransferError> {
        let remote = self
            .mapper
            .remote_path(path)
            .ok_or_else(|| TransferError::Unmapped(path.display().to_string()))?;
        let mut file = File::open(path).await.map_err(file_err("open"))?;
        progress.size = file.metadata().await.map_err(file_err("stat"))?.len();

        let mut conn = self.pool.get(&self.remote_addr).await?;
        let result = self
            .send_chunks(&mut file, path, &remote, &mut conn, progress)
            .await;
        let poisoned = matches!(&result, Err(e) if e.poisons_connection());
        self.pool.put(conn, poisoned);
        result
    }

    async fn send_chunks(
        &self,
        file: &mut File,
        path: &Path,
        remote: &str,
        conn: &mut Connection,
        progress: &mut Progress,
    ) -> Result<(), TransferError> {
        let precompressed = is_precompressed(remote, &self.policy.precompressed_suffixes);
        let read_size = self.policy.read_size(precompressed) as u64;
        // An empty file still needs one frame so the destination exists
        let mut create_empty = progress.offset == 0 && progress.size == 0;

        while progress.offset < progress.size || create_empty {
            create_empty = false;
            let want = read_size.min(progress.size - progress.offset) as usize;
            file.seek(SeekFrom::Start(progress.offset))
                .await
                .map_err(file_err("seek"))?;
            let data = read_up_to(file, want).await.map_err(file_err("read"))?;
            if data.is_empty() && want > 0 {
                // Truncated underneath us; the retry re-reconciles the new size
                progress.size = file.metadata().await.map_err(file_err("stat"))?.len();
                break;
            }
            let sent = data.len() as u64;

            let (payload, compressed) = self.policy.pack(data, precompressed)?;
            let frame = Frame::new(remote, progress.offset, payload, compressed);
            conn.send_frame(&frame).await?;
            let response = conn.read_response().await?;

            match response.status {
                Status::Succeed => {
                    progress.offset += sent;
                }
                Status::PositionMismatch => {
                    debug!(
                        path = %path.display(),
                        sent_at = progress.offset,
                        server_size = response.position,
                        "server asked to rewind"
                    );
                    self.journal.rewind(path, progress.offset, response.position);
                    progress.offset = response.position;
                }
                status => {
                    return Err(TransferError::Remote {
                        status,
                        position: response.position,
                    })
                }
            }

            progress.size = file.metadata().await.map_err(file_err("stat"))?.len();
            self.table
                .record_progress(path, progress.offset, progress.size);
        }
        Ok(())
    }
}

/// Read until `want` bytes or end-of-file.
async fn read_up_to(file: &mut File, want: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; want];
    let mut filled = 0;
    while filled < want {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}
