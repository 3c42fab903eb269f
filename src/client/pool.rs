//! Reusable upload connections, keyed by destination address.
//!
//! Free connections are kept per address in a LIFO list so the most
//! recently used socket (warmest congestion window) is handed out first.
//! Any connection that saw an I/O error is closed instead of pooled.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::codec::{Frame, Response};
use crate::error::{DecodeError, PoolError, TransferError};
use crate::net_async::{read_some_timed, write_all_timed};

// A response line is a status digit, a space and a u64
const MAX_RESPONSE_LINE: usize = 32;

pub struct Connection {
    id: u64,
    addr: String,
    stream: TcpStream,
    io_timeout_ms: u64,
    last_used: Instant,
    read_buf: Vec<u8>,
}

fn conn_err(context: &'static str, e: io::Error) -> TransferError {
    if e.kind() == io::ErrorKind::TimedOut {
        TransferError::Deadline(context)
    } else {
        TransferError::Connection { context, source: e }
    }
}

impl Connection {
    /// Stable identity for the lifetime of the socket.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Write one frame, header then payload, each under the I/O deadline.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransferError> {
        let header = frame.header_bytes();
        let ms = self.io_timeout_ms;
        write_all_timed(&mut self.stream, &header, ms)
            .await
            .map_err(|e| conn_err("write", e))?;
        if !frame.payload.is_empty() {
            write_all_timed(&mut self.stream, &frame.payload, ms)
                .await
                .map_err(|e| conn_err("write", e))?;
        }
        Ok(())
    }

    /// Read exactly one response line.
    pub async fn read_response(&mut self) -> Result<Response, TransferError> {
        let mut chunk = [0u8; 64];
        loop {
            if let Some(nl) = self.read_buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.read_buf.drain(..=nl).collect();
                return Ok(Response::parse(&line[..nl])?);
            }
            if self.read_buf.len() > MAX_RESPONSE_LINE {
                return Err(DecodeError::BadResponse(
                    String::from_utf8_lossy(&self.read_buf).into_owned(),
                )
                .into());
            }
            let n = read_some_timed(&mut self.stream, &mut chunk, self.io_timeout_ms)
                .await
                .map_err(|e| conn_err("read", e))?;
            if n == 0 {
                return Err(TransferError::PeerClosed);
            }
            self.read_buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// A pooled socket is only reusable if the peer has not closed it and
    /// no stray bytes are waiting on it.
    fn is_reusable(&self) -> bool {
        if !self.read_buf.is_empty() {
            return false;
        }
        let mut probe = [0u8; 1];
        match self.stream.try_read(&mut probe) {
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
            Ok(_) => false,
        }
    }
}

pub struct ConnPool {
    dial_timeout: Duration,
    io_timeout_ms: u64,
    max_idle: usize,
    free: Mutex<HashMap<String, Vec<Connection>>>,
    next_id: AtomicU64,
}

impl ConnPool {
    pub fn new(dial_timeout: Duration, io_timeout_ms: u64, max_idle: usize) -> Self {
        Self {
            dial_timeout,
            io_timeout_ms,
            max_idle,
            free: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Check out a connection to `addr`, reusing the most recently returned
    /// one when possible.
    pub async fn get(&self, addr: &str) -> Result<Connection, PoolError> {
        while let Some(mut conn) = self.pop_free(addr) {
            if conn.is_reusable() {
                conn.last_used = Instant::now();
                return Ok(conn);
            }
            debug!(addr, id = conn.id, "dropping stale pooled connection");
        }
        self.dial(addr).await
    }

    fn pop_free(&self, addr: &str) -> Option<Connection> {
        self.free.lock().get_mut(addr)?.pop()
    }

    async fn dial(&self, addr: &str) -> Result<Connection, PoolError> {
        let stream = match timeout(self.dial_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(PoolError::ConnectTimeout {
                    addr: addr.to_string(),
                })
            }
            Ok(Err(e)) => {
                return Err(PoolError::Dial {
                    addr: addr.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                return Err(PoolError::ConnectTimeout {
                    addr: addr.to_string(),
                })
            }
        };
        let _ = stream.set_nodelay(true);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(addr, id, "dialed new connection");
        Ok(Connection {
            id,
            addr: addr.to_string(),
            stream,
            io_timeout_ms: self.io_timeout_ms,
            last_used: Instant::now(),
            read_buf: Vec::new(),
        })
    }

    /// Return a connection. `failed` closes it instead of pooling, as does
    /// a full free list.
    pub fn put(&self, mut conn: Connection, failed: bool) {
        if failed {
            debug!(addr = %conn.addr, id = conn.id, "closing failed connection");
            return;
        }
        let mut free = self.free.lock();
        let list = free.entry(conn.addr.clone()).or_default();
        if list.len() >= self.max_idle {
            return;
        }
        conn.last_used = Instant::now();
        list.push(conn);
    }

    /// Close every pooled connection idle for longer than `max_idle`.
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let mut free = self.free.lock();
        let mut closed = 0;
        for (addr, list) in free.iter_mut() {
            let before = list.len();
            list.retain(|c| c.idle_for() <= max_idle);
            let n = before - list.len();
            if n > 0 {
                info!(addr = %addr, closed = n, "closed idle connections");
            }
            closed += n;
        }
        free.retain(|_, list| !list.is_empty());
        closed
    }

    pub fn idle_count(&self, addr: &str) -> usize {
        self.free.lock().get(addr).map_or(0, Vec::len)
    }

    /// Run [`reap_idle`](Self::reap_idle) every `interval` until shutdown.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        max_idle: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        pool.reap_idle(max_idle);
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }
}
