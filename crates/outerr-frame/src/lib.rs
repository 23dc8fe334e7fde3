//! Framing for the combined stdout/stderr stream.
//!
//! Every record on the combined stream is one datagram the child sent:
//! - A 4-byte big-endian word: stream tag in the top bit, length in the low 31
//! - Exactly `length` payload bytes, as the child wrote them
//!
//! Frame boundaries are authoritative; a frame never spans two datagrams.

pub mod codec;
pub mod error;
pub mod reader;
pub mod stream;
pub mod writer;

pub use codec::{
    decode_frame, decode_header, encode_frame, encode_header, Frame, FrameConfig, HEADER_SIZE,
    MAX_LENGTH,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use stream::Stream;
pub use writer::FrameWriter;
