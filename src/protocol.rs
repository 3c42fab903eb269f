//! Shared protocol constants for the tidesync line-framed transport

// Maximum frame payload size (256MB) - prevents memory exhaustion from a bad header
// Large enough for a full-size chunk plus gzip framing overhead
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

// Header lines longer than this without a newline are treated as garbage
pub const MAX_HEADER_LEN: usize = 64 * 1024;

/// Result codes carried in the first byte of every response line.
///
/// The numeric values are part of the wire format and must stay stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    Succeed,
    FileNotExist,
    CreateError,
    RemoveError,
    WriteError,
    FileInUse,
    /// Requested offset is past the end of the destination file; the
    /// response position carries the actual size.
    PositionMismatch,
}

impl Status {
    pub const fn digit(self) -> u8 {
        match self {
            Status::Succeed => b'0',
            Status::FileNotExist => b'1',
            Status::CreateError => b'2',
            Status::RemoveError => b'3',
            Status::WriteError => b'4',
            Status::FileInUse => b'5',
            Status::PositionMismatch => b'6',
        }
    }

    /// Digit `7` is reserved and maps to `None` like any other unknown byte.
    pub const fn from_digit(b: u8) -> Option<Status> {
        match b {
            b'0' => Some(Status::Succeed),
            b'1' => Some(Status::FileNotExist),
            b'2' => Some(Status::CreateError),
            b'3' => Some(Status::RemoveError),
            b'4' => Some(Status::WriteError),
            b'5' => Some(Status::FileInUse),
            b'6' => Some(Status::PositionMismatch),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Succeed => "succeed",
            Status::FileNotExist => "file not exist",
            Status::CreateError => "create error",
            Status::RemoveError => "remove error",
            Status::WriteError => "write error",
            Status::FileInUse => "file in use",
            Status::PositionMismatch => "position mismatch",
        };
        f.write_str(name)
    }
}

// Chunking defaults for the upload client
pub mod chunk {
    // Plain files compress well, so read big chunks
    pub const COMMON_READ_SIZE: usize = 200 * 1024 * 1024;

    // Already-compressed formats gain nothing from gzip
    pub const PRECOMPRESSED_READ_SIZE: usize = 20 * 1024 * 1024;

    // Payloads at or below this size are sent raw
    pub const COMPRESS_FLOOR: usize = 200;

    pub const PRECOMPRESSED_SUFFIXES: &[&str] = &[".zip", ".gz", ".pdf", ".jpg", ".png", ".dmg"];
}

// Centralized timeout constants shared by client and server
pub mod timeouts {
    // Deadline for every read or write on a transfer connection (ms)
    pub const IO_MS: u64 = 15_000;

    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 15_000;

    // Idle sweeps run on this fixed interval (ms)
    pub const SWEEP_INTERVAL_MS: u64 = 10_000;

    // Pooled connections idle longer than this are closed (s)
    pub const CONN_IDLE_SECS: u64 = 300;

    // Server file handles idle longer than this are closed (s)
    pub const HANDLE_IDLE_SECS: u64 = 120;

    // Delay before a failed transfer re-enqueues its path (ms)
    pub const RETRY_DELAY_MS: u64 = 5_000;

    // Back-off after a worker pool rejects a submission (ms)
    pub const SUBMIT_BACKOFF_MS: u64 = 2_000;

    // Interval between startup diff attempts while the API is unreachable (ms)
    pub const DIFF_RETRY_MS: u64 = 10_000;

    // HTTP timeout for the startup diff request (ms)
    pub const DIFF_HTTP_MS: u64 = 15_000;
}
