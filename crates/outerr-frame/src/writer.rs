use std::io::{ErrorKind, IoSlice, Write};

use crate::codec::{encode_header, Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::stream::Stream;

/// Writes complete frames to any `Write` stream.
///
/// Header and payload go out as one vectored write; short writes are resumed
/// until every byte is flushed, and `EINTR` is retried transparently. Any
/// other write error is returned to the caller.
pub struct FrameWriter<T> {
    inner: T,
    config: FrameConfig,
    frames_written: u64,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            config,
            frames_written: 0,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_chunk(frame.stream, frame.payload.as_ref())
    }

    /// Frame one chunk of output from `stream` and write it out.
    pub fn write_chunk(&mut self, stream: Stream, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        let header = encode_header(stream, payload.len())?;
        let mut slices = [IoSlice::new(&header), IoSlice::new(payload)];
        let mut pending: &mut [IoSlice<'_>] = &mut slices;
        let mut remaining = header.len() + payload.len();

        while remaining > 0 {
            match self.inner.write_vectored(pending) {
                Ok(0) => {
                    return Err(FrameError::Io(std::io::Error::new(
                        ErrorKind::WriteZero,
                        "combined output accepted no bytes",
                    )))
                }
                Ok(n) => {
                    remaining -= n;
                    IoSlice::advance_slices(&mut pending, n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.frames_written += 1;
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Number of frames fully written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
