use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::stream::Stream;

/// Frame header: one 32-bit big-endian word.
pub const HEADER_SIZE: usize = 4;

/// Largest length the header's low 31 bits can carry.
pub const MAX_LENGTH: usize = 0x7FFF_FFFF;

const TAG_SHIFT: u32 = 31;
const LENGTH_MASK: u32 = 0x7FFF_FFFF;

/// One chunk of child output with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Which descriptor the chunk was written to.
    pub stream: Stream,
    /// The bytes exactly as the child wrote them.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(stream: Stream, payload: impl Into<Bytes>) -> Self {
        Self {
            stream,
            payload: payload.into(),
        }
    }
}

/// Build the header word for a payload of `len` bytes.
///
/// Wire format:
/// ```text
/// ┌───┬───────────────────────────────┬──────────────────┐
/// │ S │ Length (31 bits)              │ Payload          │
/// │   │ big-endian word, S = top bit  │ (Length bytes)   │
/// └───┴───────────────────────────────┴──────────────────┘
///  S = 0 stdout, S = 1 stderr
/// ```
pub fn encode_header(stream: Stream, len: usize) -> Result<[u8; HEADER_SIZE]> {
    if len > MAX_LENGTH {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: MAX_LENGTH,
        });
    }
    let word = (stream.tag() << TAG_SHIFT) | len as u32;
    Ok(word.to_be_bytes())
}

/// Split a header word into its stream tag and payload length.
pub fn decode_header(header: [u8; HEADER_SIZE]) -> (Stream, usize) {
    let word = u32::from_be_bytes(header);
    let stream = Stream::from_tag(word >> TAG_SHIFT);
    (stream, (word & LENGTH_MASK) as usize)
}

/// Encode a frame into the wire format.
pub fn encode_frame(stream: Stream, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    let header = encode_header(stream, payload.len())?;
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&header);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let (stream, payload_len) = decode_header(header);

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { stream, payload }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: the wire maximum.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_LENGTH,
        }
    }
}
