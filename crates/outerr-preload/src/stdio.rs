//! C stdio adjustments.
//!
//! Standard output is switched to line buffering so output shows up line by
//! line instead of in block-sized bursts. On musl, stdio flushes with a raw
//! `writev` system call that no symbol interposition can see, so the flush
//! callback of `stdout`/`stderr` is replaced with one that runs through the
//! retry engine.

use libc::iovec;

use crate::retry::{send_from, Cursor, Primitive};

extern "C" {
    static stdout: *mut libc::FILE;
    #[cfg(target_env = "musl")]
    static stderr: *mut libc::FILE;
}

/// Make C `stdout` line buffered.
///
/// # Safety
/// Must run before anything has been written through `stdout`.
pub unsafe fn line_buffer_stdout() {
    libc::setvbuf(stdout, std::ptr::null_mut(), libc::_IOLBF, 0);
}

/// Result of flushing a stream buffer plus new data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// Everything went out.
    Complete,
    /// The transport failed; `consumed` bytes of the new data were written.
    Failed { consumed: usize },
}

/// Write a stream's pending buffer followed by `data`, the way a stdio
/// flush does, chunking on `EMSGSIZE`.
pub fn flush_pending<P: Primitive + ?Sized>(
    primitive: &P,
    buffered: &[u8],
    data: &[u8],
    limit: usize,
) -> Flush {
    let iov = [as_iovec(buffered), as_iovec(data)];
    let total = buffered.len() + data.len();

    let first = match primitive.writev(&iov) {
        Ok(n) => n,
        Err(err) if crate::retry::is_too_large(&err) => 0,
        Err(err) if err.kind() == std::io::ErrorKind::Interrupted => 0,
        Err(_) => return Flush::Failed { consumed: 0 },
    };
    if first == total {
        return Flush::Complete;
    }

    let mut cursor = Cursor::default();
    cursor.advance(&iov, first);
    let (rest, err) = send_from(primitive, &iov, cursor, limit);
    let sent = first + rest;
    match err {
        None if sent == total => Flush::Complete,
        // A zero-length send stops the run without an error; treat it as one.
        _ => Flush::Failed {
            // Only bytes past the end of the stream buffer belong to `data`.
            consumed: sent.saturating_sub(buffered.len()).min(data.len()),
        },
    }
}

fn as_iovec(buf: &[u8]) -> iovec {
    iovec {
        iov_base: buf.as_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    }
}

#[cfg(target_env = "musl")]
mod musl {
    //! Layout of the leading fields of musl's `FILE`.

    use libc::{c_int, c_uchar, off_t, size_t};

    use super::{flush_pending, Flush};
    use crate::sys::Original;

    const F_ERR: libc::c_uint = 32;

    type WriteHook = unsafe extern "C" fn(*mut MuslFile, *const c_uchar, size_t) -> size_t;

    #[repr(C)]
    pub struct MuslFile {
        flags: libc::c_uint,
        rpos: *mut c_uchar,
        rend: *mut c_uchar,
        close: Option<unsafe extern "C" fn(*mut MuslFile) -> c_int>,
        wend: *mut c_uchar,
        wpos: *mut c_uchar,
        mustbezero_1: *mut c_uchar,
        wbase: *mut c_uchar,
        read: Option<unsafe extern "C" fn(*mut MuslFile, *mut c_uchar, size_t) -> size_t>,
        write: Option<WriteHook>,
        seek: Option<unsafe extern "C" fn(*mut MuslFile, off_t, c_int) -> off_t>,
        buf: *mut c_uchar,
        buf_size: size_t,
        prev: *mut MuslFile,
        next: *mut MuslFile,
        fd: c_int,
    }

    unsafe extern "C" fn stdio_write(f: *mut MuslFile, data: *const c_uchar, len: size_t) -> size_t {
        crate::ffi_boundary(0, || {
            let file = &mut *f;
            let pending = file.wpos as usize - file.wbase as usize;
            let buffered: &[u8] = if pending == 0 {
                &[]
            } else {
                std::slice::from_raw_parts(file.wbase, pending)
            };
            let data: &[u8] = if len == 0 {
                &[]
            } else {
                std::slice::from_raw_parts(data, len)
            };
            let limit = crate::budget::chunk_limit(crate::budget::send_buffer());
            match flush_pending(&Original::new(file.fd), buffered, data, limit) {
                Flush::Complete => {
                    file.wend = file.buf.add(file.buf_size);
                    file.wpos = file.buf;
                    file.wbase = file.buf;
                    len
                }
                Flush::Failed { consumed } => {
                    file.wpos = std::ptr::null_mut();
                    file.wbase = std::ptr::null_mut();
                    file.wend = std::ptr::null_mut();
                    file.flags |= F_ERR;
                    consumed
                }
            }
        })
    }

    /// Route a stream's flushes through [`stdio_write`].
    pub unsafe fn patch(file: *mut libc::FILE) {
        if let Some(file) = file.cast::<MuslFile>().as_mut() {
            file.write = Some(stdio_write);
        }
    }
}

/// Install the chunking flush callback on `stdout` and `stderr`.
///
/// # Safety
/// Must run before other threads use either stream.
#[cfg(target_env = "musl")]
pub unsafe fn patch_flush() {
    musl::patch(stdout);
    musl::patch(stderr);
}

/// Only musl exposes a replaceable flush callback.
///
/// # Safety
/// Trivially safe; `unsafe` to match the musl variant.
#[cfg(not(target_env = "musl"))]
pub unsafe fn patch_flush() {}
