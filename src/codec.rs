//! Line-framed wire codec.
//!
//! A request frame is an ASCII header line followed by raw payload bytes:
//!
//! ```text
//! <path> <offset> <payload_len> <total_len> <compressed>\n<payload_len bytes>
//! ```
//!
//! A response is a single line: `<status digit> <position>\n`.
//!
//! [`FrameDecoder`] accumulates bytes across reads. Splitting an encoded
//! stream at arbitrary boundaries and feeding the pieces one at a time yields
//! the same frames as feeding it whole.

use crate::error::DecodeError;
use crate::protocol::{Status, MAX_HEADER_LEN, MAX_PAYLOAD_SIZE};

/// One write-chunk request.
///
/// `path` must not contain whitespace; callers filter such paths before
/// they are ever scheduled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub path: String,
    pub offset: u64,
    /// Carried for compatibility, never validated against the payload.
    pub total_len: u64,
    pub compressed: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(path: impl Into<String>, offset: u64, payload: Vec<u8>, compressed: bool) -> Self {
        let total_len = payload.len() as u64;
        Self {
            path: path.into(),
            offset,
            total_len,
            compressed,
            payload,
        }
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// The header line, newline included.
    pub fn header_bytes(&self) -> Vec<u8> {
        format!(
            "{} {} {} {} {}\n",
            self.path,
            self.offset,
            self.payload.len(),
            self.total_len,
            self.compressed
        )
        .into_bytes()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let header = self.header_bytes();
        out.reserve(header.len() + self.payload.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Header {
    path: String,
    offset: u64,
    payload_len: u64,
    total_len: u64,
    compressed: bool,
}

fn parse_number(field: &'static str, raw: &str) -> Result<u64, DecodeError> {
    let value: i64 = raw.parse().map_err(|_| DecodeError::BadNumber {
        field,
        value: raw.to_string(),
    })?;
    if value < 0 {
        return Err(DecodeError::Negative { field, value });
    }
    Ok(value as u64)
}

fn parse_flag(raw: &str) -> Result<bool, DecodeError> {
    match raw {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(DecodeError::BadFlag(other.to_string())),
    }
}

fn parse_header(line: &[u8]) -> Result<Header, DecodeError> {
    let line = std::str::from_utf8(line).map_err(|_| DecodeError::NotUtf8)?;
    let fields: Vec<&str> = line.split_ascii_whitespace().collect();
    if fields.len() != 5 {
        return Err(DecodeError::FieldCount(fields.len()));
    }
    let header = Header {
        path: fields[0].to_string(),
        offset: parse_number("offset", fields[1])?,
        payload_len: parse_number("size", fields[2])?,
        total_len: parse_number("total_size", fields[3])?,
        compressed: parse_flag(fields[4])?,
    };
    if header.payload_len > MAX_PAYLOAD_SIZE as u64 {
        return Err(DecodeError::TooLarge(header.payload_len));
    }
    Ok(header)
}

/// Resumable decoder over an accumulating byte buffer.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame.
    ///
    /// `Ok(None)` means more bytes are needed; nothing is discarded in that
    /// case. An error is fatal for the stream.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        let Some(nl) = self.buf.iter().position(|&b| b == b'\n') else {
            if self.buf.len() > MAX_HEADER_LEN {
                return Err(DecodeError::HeaderTooLong(MAX_HEADER_LEN));
            }
            return Ok(None);
        };

        let header = parse_header(&self.buf[..nl])?;
        let body_start = nl + 1;
        let available = self.buf.len() - body_start;
        let need = header.payload_len as usize;
        if available < need {
            return Ok(None);
        }

        let end = body_start + need;
        let payload = self.buf[body_start..end].to_vec();
        self.buf.drain(..end);

        Ok(Some(Frame {
            path: header.path,
            offset: header.offset,
            total_len: header.total_len,
            compressed: header.compressed,
            payload,
        }))
    }
}

/// Server answer to one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: Status,
    pub position: u64,
}

impl Response {
    pub fn new(status: Status, position: u64) -> Self {
        Self { status, position }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        out.push(self.status.digit());
        out.push(b' ');
        out.extend_from_slice(self.position.to_string().as_bytes());
        out.push(b'\n');
        out
    }

    /// Parse one response line, with or without its trailing newline.
    pub fn parse(line: &[u8]) -> Result<Self, DecodeError> {
        let bad = || DecodeError::BadResponse(String::from_utf8_lossy(line).into_owned());
        let text = std::str::from_utf8(line).map_err(|_| bad())?;
        let mut parts = text.split_ascii_whitespace();
        let (Some(code), Some(pos), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(bad());
        };
        if code.len() != 1 {
            return Err(bad());
        }
        let status = Status::from_digit(code.as_bytes()[0]).ok_or_else(bad)?;
        let position = pos.parse::<u64>().map_err(|_| bad())?;
        Ok(Self { status, position })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frames() -> Vec<Frame> {
        vec![
            Frame::new("/data/a.log", 0, b"hello world".to_vec(), false),
            Frame::new("/data/empty", 0, Vec::new(), false),
            Frame::new("/data/b.bin", 4096, vec![b'\n'; 17], true),
            Frame::new("/x", 7, (0u8..=255).collect(), false),
        ]
    }

    fn decode_all(dec: &mut FrameDecoder) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Some(f) = dec.next_frame().unwrap() {
            out.push(f);
        }
        out
    }

    #[test]
    fn round_trip_single_frames() {
        for frame in sample_frames() {
            let mut dec = FrameDecoder::new();
            dec.feed(&frame.to_bytes());
            assert_eq!(dec.next_frame().unwrap(), Some(frame));
            assert_eq!(dec.buffered(), 0);
        }
    }

    #[test]
    fn header_layout_matches_wire_format() {
        let f = Frame::new("/a/b", 10, b"xyz".to_vec(), true);
        assert_eq!(f.to_bytes(), b"/a/b 10 3 3 true\nxyz".to_vec());
    }

    #[test]
    fn every_split_point_yields_same_frames() {
        let frames = sample_frames();
        let mut stream = Vec::new();
        for f in &frames {
            f.encode_into(&mut stream);
        }

        for cut in 0..=stream.len() {
            let mut dec = FrameDecoder::new();
            let mut got = Vec::new();
            dec.feed(&stream[..cut]);
            got.extend(decode_all(&mut dec));
            dec.feed(&stream[cut..]);
            got.extend(decode_all(&mut dec));
            assert_eq!(got, frames, "split at {cut}");
        }
    }

    #[test]
    fn byte_at_a_time_delivery() {
        let frames = sample_frames();
        let mut stream = Vec::new();
        for f in &frames {
            f.encode_into(&mut stream);
        }
        let mut dec = FrameDecoder::new();
        let mut got = Vec::new();
        for b in &stream {
            dec.feed(std::slice::from_ref(b));
            got.extend(decode_all(&mut dec));
        }
        assert_eq!(got, frames);
    }

    #[test]
    fn incomplete_payload_keeps_header() {
        let bytes = Frame::new("/p", 0, b"abcdef".to_vec(), false).to_bytes();
        let mut dec = FrameDecoder::new();
        dec.feed(&bytes[..bytes.len() - 2]);
        assert_eq!(dec.next_frame().unwrap(), None);
        assert_eq!(dec.buffered(), bytes.len() - 2);
    }

    #[test]
    fn leftover_starts_next_frame() {
        let mut bytes = Frame::new("/p", 0, b"ab".to_vec(), false).to_bytes();
        bytes.extend_from_slice(b"/q 2 5");
        let mut dec = FrameDecoder::new();
        dec.feed(&bytes);
        assert!(dec.next_frame().unwrap().is_some());
        assert_eq!(dec.next_frame().unwrap(), None);
        assert_eq!(dec.buffered(), 6);
    }

    #[test]
    fn negative_fields_are_fatal() {
        for line in [
            "/p -1 0 0 false\n",
            "/p 0 -5 0 false\n",
            "/p 0 0 -2 false\n",
        ] {
            let mut dec = FrameDecoder::new();
            dec.feed(line.as_bytes());
            assert!(matches!(
                dec.next_frame(),
                Err(DecodeError::Negative { .. })
            ));
        }
    }

    #[test]
    fn wrong_field_count_is_fatal() {
        let mut dec = FrameDecoder::new();
        dec.feed(b"/p 0 0 false\n");
        assert_eq!(dec.next_frame(), Err(DecodeError::FieldCount(4)));

        let mut dec = FrameDecoder::new();
        dec.feed(b"/p with space 0 0 0 false\n");
        assert_eq!(dec.next_frame(), Err(DecodeError::FieldCount(7)));
    }

    #[test]
    fn non_numeric_offset_is_fatal() {
        let mut dec = FrameDecoder::new();
        dec.feed(b"/p abc 0 0 false\n");
        assert!(matches!(
            dec.next_frame(),
            Err(DecodeError::BadNumber { field: "offset", .. })
        ));
    }

    #[test]
    fn numeric_flag_is_accepted() {
        let mut dec = FrameDecoder::new();
        dec.feed(b"/p 3 1 1 1\nz");
        let f = dec.next_frame().unwrap().unwrap();
        assert!(f.compressed);
        assert_eq!(f.offset, 3);
        assert_eq!(f.payload, b"z");
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let mut dec = FrameDecoder::new();
        let line = format!("/p 0 {} 0 false\n", MAX_PAYLOAD_SIZE + 1);
        dec.feed(line.as_bytes());
        assert!(matches!(dec.next_frame(), Err(DecodeError::TooLarge(_))));
    }

    #[test]
    fn total_len_is_not_validated() {
        let mut dec = FrameDecoder::new();
        dec.feed(b"/p 0 2 999 false\nok");
        let f = dec.next_frame().unwrap().unwrap();
        assert_eq!(f.total_len, 999);
        assert_eq!(f.payload_len(), 2);
    }

    #[test]
    fn response_round_trip() {
        let r = Response::new(Status::PositionMismatch, 30);
        assert_eq!(r.to_bytes(), b"6 30\n".to_vec());
        assert_eq!(Response::parse(&r.to_bytes()).unwrap(), r);
        assert_eq!(
            Response::parse(b"0 123").unwrap(),
            Response::new(Status::Succeed, 123)
        );
    }

    #[test]
    fn response_rejects_garbage() {
        assert!(Response::parse(b"7 0\n").is_err());
        assert!(Response::parse(b"0\n").is_err());
        assert!(Response::parse(b"0 1 2\n").is_err());
        assert!(Response::parse(b"00 1\n").is_err());
        assert!(Response::parse(b"0 -1\n").is_err());
    }
}
