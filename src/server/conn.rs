//! Per-connection read, decode, dispatch, respond loop.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::codec::{FrameDecoder, Response};
use crate::net_async::{read_some_timed, write_all_timed};
use crate::protocol::Status;
use crate::server::dispatch::Dispatcher;

const READ_BUF_SIZE: usize = 1024 * 1024;

/// Why a connection loop ended.
#[derive(Debug)]
pub enum ConnEnd {
    /// Peer closed its side between frames.
    Closed,
    /// Unparseable header; the stream cannot be resynchronised.
    Malformed(crate::error::DecodeError),
    /// Read or write failed, including deadline expiry.
    Io(io::Error),
}

/// Serve frames from one peer until it disconnects or misbehaves.
///
/// Frames are dispatched strictly in arrival order; when one read carries
/// several frames each is answered before the next read.
pub async fn serve_connection<S>(mut stream: S, dispatcher: Dispatcher, io_timeout_ms: u64) -> ConnEnd
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let n = match read_some_timed(&mut stream, &mut buf, io_timeout_ms).await {
            Ok(0) => {
                if decoder.buffered() > 0 {
                    debug!(pending = decoder.buffered(), "peer closed mid-frame");
                }
                return ConnEnd::Closed;
            }
            Ok(n) => n,
            Err(e) => return ConnEnd::Io(e),
        };
        decoder.feed(&buf[..n]);

        loop {
            let frame = match decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return ConnEnd::Malformed(e),
            };
            let path = frame.path.clone();
            let d = dispatcher.clone();
            let response = match tokio::task::spawn_blocking(move || d.handle_frame(frame)).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %path, error = %e, "dispatch task failed");
                    Response::new(Status::WriteError, 0)
                }
            };
            if response.status != Status::Succeed {
                debug!(path = %path, status = %response.status, position = response.position, "frame rejected");
            }
            if let Err(e) = write_all_timed(&mut stream, &response.to_bytes(), io_timeout_ms).await {
                return ConnEnd::Io(e);
            }
        }
    }
}
