//! Deadline-bounded socket I/O shared by the upload client and the daemon.
//!
//! Every network read and write goes through these helpers so a stalled peer
//! surfaces as an `ErrorKind::TimedOut` error instead of hanging a worker.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

#[inline]
pub async fn write_all_timed<W>(stream: &mut W, buf: &[u8], ms: u64) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match timeout(Duration::from_millis(ms), async {
        stream.write_all(buf).await?;
        stream.flush().await
    })
    .await
    {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("write timeout ({} ms)", ms),
        )),
    }
}

/// Single read; `Ok(0)` means the peer closed the stream.
#[inline]
pub async fn read_some_timed<R>(stream: &mut R, buf: &mut [u8], ms: u64) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match timeout(Duration::from_millis(ms), stream.read(buf)).await {
        Ok(res) => res,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("read timeout ({} ms)", ms),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_times_out_on_silent_peer() {
        let (mut a, _b) = tokio::io::duplex(64);
        let mut buf = [0u8; 8];
        let err = read_some_timed(&mut a, &mut buf, 20).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn write_then_read() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_all_timed(&mut a, b"0 12\n", 100).await.unwrap();
        let mut buf = [0u8; 8];
        let n = read_some_timed(&mut b, &mut buf, 100).await.unwrap();
        assert_eq!(&buf[..n], b"0 12\n");
    }

    #[tokio::test]
    async fn closed_peer_reads_zero() {
        let (mut a, b) = tokio::io::duplex(64);
        drop(b);
        let mut buf = [0u8; 8];
        assert_eq!(read_some_timed(&mut a, &mut buf, 100).await.unwrap(), 0);
    }
}
