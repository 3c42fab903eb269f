//! Error types for the transfer engine

use std::io;

use thiserror::Error;

use crate::protocol::Status;

/// Fatal framing errors; the connection that produced them is closed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("header is not valid UTF-8")]
    NotUtf8,

    #[error("header has {0} fields, expected 5")]
    FieldCount(usize),

    #[error("header field {field} is not a number: {value:?}")]
    BadNumber { field: &'static str, value: String },

    #[error("header field {field} is negative: {value}")]
    Negative { field: &'static str, value: i64 },

    #[error("bad compressed flag: {0:?}")]
    BadFlag(String),

    #[error("payload of {0} bytes exceeds the frame limit")]
    TooLarge(u64),

    #[error("header line exceeds {0} bytes")]
    HeaderTooLong(usize),

    #[error("malformed response line: {0:?}")]
    BadResponse(String),
}

/// Failures handing out pooled connections.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The dial did not complete within the connect timeout.
    #[error("connect timeout {addr}")]
    ConnectTimeout { addr: String },

    #[error("dial {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Reasons a single transfer attempt stops short of end-of-file.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("local file {context}: {source}")]
    File {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("connection {context}: {source}")]
    Connection {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("connection {0} deadline exceeded")]
    Deadline(&'static str),

    #[error("connection closed by peer")]
    PeerClosed,

    #[error(transparent)]
    Protocol(#[from] DecodeError),

    #[error("server answered {status} at position {position}")]
    Remote { status: Status, position: u64 },

    #[error("no remote mapping for {0}")]
    Unmapped(String),

    #[error("compress payload: {0}")]
    Compress(#[source] io::Error),
}

impl TransferError {
    /// Errors after which the connection state is unknown and it must not be pooled.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            TransferError::Connection { .. }
                | TransferError::Deadline(_)
                | TransferError::PeerClosed
                | TransferError::Protocol(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_poison() {
        let e = TransferError::Deadline("read");
        assert!(e.poisons_connection());
        let e = TransferError::Remote {
            status: Status::FileInUse,
            position: 0,
        };
        assert!(!e.poisons_connection());
    }

    #[test]
    fn connect_timeout_names_addr() {
        let e = PoolError::ConnectTimeout {
            addr: "10.0.0.1:9100".into(),
        };
        assert_eq!(e.to_string(), "connect timeout 10.0.0.1:9100");
    }
}
