//! Gzip payload helpers.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::protocol::MAX_PAYLOAD_SIZE;

pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 4 + 64), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Inflate one payload. Output beyond the frame payload limit is an error.
pub fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len().saturating_mul(4).min(MAX_PAYLOAD_SIZE));
    let limit = MAX_PAYLOAD_SIZE as u64 + 1;
    GzDecoder::new(data).take(limit).read_to_end(&mut out)?;
    if out.len() > MAX_PAYLOAD_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "decompressed payload exceeds the frame limit",
        ));
    }
    Ok(out)
}

/// Whether `name` ends with one of the already-compressed suffixes.
pub fn is_precompressed(name: &str, suffixes: &[String]) -> bool {
    let lower = name.to_ascii_lowercase();
    suffixes
        .iter()
        .any(|s| lower.ends_with(&s.to_ascii_lowercase()))
}
