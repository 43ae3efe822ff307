//! Length-delimited framing for the upstream streaming body.
//!
//! The upstream interleaves two things on the wire:
//! - records: a decimal byte count on its own line, then exactly that many
//!   payload bytes (the payload may itself contain newlines), and
//! - keep-alives: blank lines sent while the stream is quiet.
//!
//! [`FrameDecoder`] yields [`Frame::Payload`] for records and
//! [`Frame::KeepAlive`] for blank lines. Keep-alives are surfaced (rather
//! than swallowed) so the read loop can tell a live-but-quiet upstream from a
//! dead connection; they carry no data and are discarded before fan-out.
//!
//! A non-empty line that is not all decimal digits is a protocol error, as is
//! EOF in the middle of a payload. EOF on a line boundary is a clean end of
//! stream.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

/// Upper bound on a single record. A length line beyond this is treated as a
/// protocol error rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One record payload, exactly as sent (typically a JSON document).
    Payload(Bytes),
    /// A blank keep-alive line.
    KeepAlive,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid length line {0:?}")]
    InvalidLength(String),
    #[error("frame length {0} exceeds maximum {MAX_FRAME_LEN}")]
    Oversized(usize),
    #[error("stream ended mid-frame")]
    Truncated,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Decoder state: the byte count still owed for the current record, or zero
/// while waiting for the next length line.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        loop {
            if self.pending > 0 {
                if src.len() < self.pending {
                    src.reserve(self.pending - src.len());
                    return Ok(None);
                }
                let payload = src.split_to(self.pending).freeze();
                self.pending = 0;
                return Ok(Some(Frame::Payload(payload)));
            }

            let Some(newline) = src.iter().position(|&b| b == b'\n') else {
                return Ok(None);
            };
            let line = src.split_to(newline + 1);
            let line = trim_line(&line[..newline]);
            if line.is_empty() {
                return Ok(Some(Frame::KeepAlive));
            }
            let length = parse_length(line)?;
            if length > MAX_FRAME_LEN {
                return Err(FrameError::Oversized(length));
            }
            if length == 0 {
                return Ok(Some(Frame::Payload(Bytes::new())));
            }
            self.pending = length;
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.pending > 0 || !src.is_empty() {
            return Err(FrameError::Truncated);
        }
        Ok(None)
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    match line {
        [rest @ .., b'\r'] => rest,
        _ => line,
    }
}

fn parse_length(line: &[u8]) -> Result<usize, FrameError> {
    if !line.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::InvalidLength(
            String::from_utf8_lossy(line).into_owned(),
        ));
    }
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FrameError::InvalidLength(String::from_utf8_lossy(line).into_owned()))
}
