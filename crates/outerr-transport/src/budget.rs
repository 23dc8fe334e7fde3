//! Send-size budget discovery.
//!
//! A datagram larger than the sending socket's buffer is rejected with
//! `EMSGSIZE`. The multiplexer sizes its receive buffer from the system-wide
//! ceiling; the preload library sizes its retry chunks from the default
//! buffer a fresh socket gets.

use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::path::Path;

use tracing::debug;

use crate::error::{Result, TransportError};

/// Kernel knob holding the largest send buffer a socket may request.
pub const WMEM_MAX_PATH: &str = "/proc/sys/net/core/wmem_max";

/// Send-buffer size assumed when the kernel cannot be asked.
pub const FALLBACK_SEND_BUFFER: usize = 32 * 1024;

/// Read the system-wide maximum socket send-buffer size.
///
/// This bounds the largest datagram any local sender can deliver, so it is
/// the receive buffer size the multiplexer needs.
pub fn max_send_buffer() -> Result<usize> {
    read_size_file(Path::new(WMEM_MAX_PATH))
}

pub(crate) fn read_size_file(path: &Path) -> Result<usize> {
    let text = std::fs::read_to_string(path).map_err(|source| TransportError::MaxSendBuffer {
        path: path.to_path_buf(),
        source,
    })?;
    let size = parse_size(&text).ok_or_else(|| TransportError::MaxSendBuffer {
        path: path.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, "not a positive integer"),
    })?;
    debug!(?path, size, "read send buffer ceiling");
    Ok(size)
}

fn parse_size(text: &str) -> Option<usize> {
    text.split_whitespace()
        .next()?
        .parse::<usize>()
        .ok()
        .filter(|size| *size > 0)
}

/// Send-buffer size a freshly created local datagram socket receives.
pub fn default_send_buffer() -> Result<usize> {
    // SAFETY: plain socket(2) call with constant arguments.
    let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if raw == -1 {
        return Err(TransportError::SendBuffer(io::Error::last_os_error()));
    }
    // SAFETY: `raw` was just returned by socket(2) and is owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    send_buffer_of(fd.as_fd()).map_err(TransportError::SendBuffer)
}

/// Send-buffer size currently configured on `fd`.
pub fn send_buffer_of(fd: BorrowedFd<'_>) -> io::Result<usize> {
    let mut size: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `size` and `len` are valid writable pointers for the provided sizes.
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            (&mut size as *mut libc::c_int).cast::<libc::c_void>(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    if size <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "kernel reported a non-positive send buffer",
        ));
    }
    Ok(size as usize)
}
