//! Chunked retry engine.
//!
//! A datagram socket rejects any single send larger than its buffer with
//! `EMSGSIZE`. These routines re-issue such a write as a run of smaller
//! sends, each one delivered as its own datagram, in order, until the whole
//! logical write has gone out or the transport reports a real failure.
//!
//! Nothing here allocates: vectored windows are built in a fixed-size array
//! on the stack, so the engine is safe to run from any thread of the host.

use std::io;

use libc::iovec;

use crate::budget::MIN_CHUNK;

/// Most segments handed to one vectored send.
pub const IOV_WINDOW: usize = 32;

/// The write primitives the engine drives.
pub trait Primitive {
    /// One scalar send.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// One vectored send. Every `iovec` with a non-zero length points at
    /// readable memory.
    fn writev(&self, iov: &[iovec]) -> io::Result<usize>;
}

/// True for the one failure the engine exists to recover from.
pub fn is_too_large(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EMSGSIZE)
}

/// Current per-send ceiling, halved each time the kernel still refuses.
#[derive(Debug, Clone, Copy)]
struct Chunk {
    size: usize,
}

impl Chunk {
    fn new(limit: usize) -> Self {
        Self { size: limit.max(1) }
    }

    /// Halve the chunk. Returns false once the floor has been reached.
    fn shrink(&mut self) -> bool {
        let next = self.size / 2;
        if next < MIN_CHUNK {
            return false;
        }
        self.size = next;
        true
    }
}

/// Resolve the outcome of a retry run: bytes already sent win over the
/// error that stopped the run.
fn settle(sent: usize, err: io::Error) -> io::Result<usize> {
    if sent > 0 {
        Ok(sent)
    } else {
        Err(err)
    }
}

/// Send `buf` in pieces of at most `limit` bytes.
///
/// Returns the number of bytes delivered. An error is returned only when
/// nothing at all could be sent.
pub fn write_chunked<P: Primitive + ?Sized>(
    primitive: &P,
    buf: &[u8],
    limit: usize,
) -> io::Result<usize> {
    let mut chunk = Chunk::new(limit);
    let mut sent = 0;
    while sent < buf.len() {
        let len = chunk.size.min(buf.len() - sent);
        match primitive.write(&buf[sent..sent + len]) {
            Ok(0) => break,
            Ok(n) => sent += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if is_too_large(&err) && chunk.shrink() => continue,
            Err(err) => return settle(sent, err),
        }
    }
    Ok(sent)
}

/// Position inside a segment list: segment index plus offset into it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub segment: usize,
    pub offset: usize,
}

impl Cursor {
    /// Move forward by `n` delivered bytes.
    pub fn advance(&mut self, iov: &[iovec], mut n: usize) {
        while n > 0 && self.segment < iov.len() {
            let rest = iov[self.segment].iov_len - self.offset;
            if n >= rest {
                n -= rest;
                self.segment += 1;
                self.offset = 0;
            } else {
                self.offset += n;
                n = 0;
            }
        }
    }

    /// Bytes from the cursor to the end of the list.
    pub fn remaining(&self, iov: &[iovec]) -> usize {
        iov.iter()
            .skip(self.segment)
            .map(|v| v.iov_len)
            .sum::<usize>()
            .saturating_sub(self.offset)
    }

    /// Fill `window` with at most `IOV_WINDOW` segments starting at the
    /// cursor, trimming the last one so the total stays within `limit`.
    /// Returns the number of entries used.
    pub fn window(&self, iov: &[iovec], limit: usize, window: &mut [iovec; IOV_WINDOW]) -> usize {
        let mut used = 0;
        let mut budget = limit;
        let mut offset = self.offset;
        for seg in iov.iter().skip(self.segment) {
            if used == IOV_WINDOW || budget == 0 {
                break;
            }
            let avail = seg.iov_len - offset;
            if avail > 0 {
                let take = avail.min(budget);
                window[used] = iovec {
                    // SAFETY: `offset < iov_len`, so the result stays inside the segment.
                    iov_base: unsafe { seg.iov_base.cast::<u8>().add(offset) }.cast(),
                    iov_len: take,
                };
                used += 1;
                budget -= take;
            }
            offset = 0;
        }
        used
    }
}

fn empty_iovec() -> iovec {
    iovec {
        iov_base: std::ptr::null_mut(),
        iov_len: 0,
    }
}

/// Send the segments from `start` onwards in windows of at most `limit`
/// bytes. Returns the bytes delivered plus the error that stopped the run,
/// if any.
pub fn send_from<P: Primitive + ?Sized>(
    primitive: &P,
    iov: &[iovec],
    start: Cursor,
    limit: usize,
) -> (usize, Option<io::Error>) {
    let mut cursor = start;
    let mut chunk = Chunk::new(limit);
    let mut window = [empty_iovec(); IOV_WINDOW];
    let mut sent = 0;

    while cursor.remaining(iov) > 0 {
        let used = cursor.window(iov, chunk.size, &mut window);
        match primitive.writev(&window[..used]) {
            Ok(0) => break,
            Ok(n) => {
                sent += n;
                cursor.advance(iov, n);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if is_too_large(&err) && chunk.shrink() => continue,
            Err(err) => return (sent, Some(err)),
        }
    }
    (sent, None)
}

/// Send every segment of `iov` in windows of at most `limit` bytes.
///
/// Same accounting as [`write_chunked`].
pub fn writev_chunked<P: Primitive + ?Sized>(
    primitive: &P,
    iov: &[iovec],
    limit: usize,
) -> io::Result<usize> {
    match send_from(primitive, iov, Cursor::default(), limit) {
        (sent, None) => Ok(sent),
        (sent, Some(err)) => settle(sent, err),
    }
}
