use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use tracing::debug;

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};

/// An `AF_UNIX` datagram socket bound to a kernel-chosen abstract address.
///
/// Descriptors are created close-on-exec; callers that hand one to a child
/// duplicate it onto the target descriptor number, which clears the flag.
pub struct DatagramSocket {
    fd: OwnedFd,
    local: Endpoint,
}

impl DatagramSocket {
    /// Create a socket and autobind it to a fresh anonymous address.
    pub fn bind_anonymous() -> Result<Self> {
        // SAFETY: plain socket(2) call with constant arguments.
        let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
        if raw == -1 {
            return Err(TransportError::Socket(io::Error::last_os_error()));
        }
        // SAFETY: `raw` was just returned by socket(2) and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: `sockaddr_un` is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_un = unsafe { mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        // An address holding only the family requests autobind.
        let family_len = mem::size_of::<libc::sa_family_t>() as libc::socklen_t;
        // SAFETY: `addr` is a valid `sockaddr_un` and `family_len` does not exceed its size.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_un).cast(),
                family_len,
            )
        };
        if rc != 0 {
            return Err(TransportError::Bind(io::Error::last_os_error()));
        }

        let local = Endpoint::local_of(fd.as_fd()).map_err(TransportError::GetSockName)?;
        debug!(fd = fd.as_raw_fd(), endpoint = ?local, "bound anonymous datagram socket");

        Ok(Self { fd, local })
    }

    /// Connect so that every `send` lands in `peer`'s receive queue.
    pub fn connect(&self, peer: &Endpoint) -> Result<()> {
        // SAFETY: `peer` points at a valid address of the stated length.
        let rc = unsafe {
            libc::connect(
                self.fd.as_raw_fd(),
                peer.as_ptr(),
                peer.len() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(TransportError::Connect(io::Error::last_os_error()));
        }
        debug!(fd = self.fd.as_raw_fd(), peer = ?peer, "connected datagram socket");
        Ok(())
    }

    /// Receive one datagram, returning its size and the sender's address.
    ///
    /// The size of the next datagram is peeked first and `buf` grows to hold
    /// it, so the payload lands in `buf[..size]` whole.
    pub fn recv_from(&self, buf: &mut Vec<u8>) -> io::Result<(usize, Endpoint)> {
        let pending = self.peek_size()?;
        if pending > buf.len() {
            debug!(pending, capacity = buf.len(), "growing receive buffer");
            buf.resize(pending, 0);
        }

        let mut from = Endpoint::zeroed();
        let addr = from.as_mut_ptr();
        // SAFETY: `buf` is writable for `buf.len()` bytes; `addr`/len are valid out-parameters.
        let rc = unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr().cast(),
                buf.len(),
                libc::MSG_TRUNC,
                addr,
                from.len_mut(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        let size = rc as usize;
        if size > buf.len() {
            // Only one reader drains the queue; a size change means it did not.
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("datagram of {size} bytes exceeds the {} byte buffer", buf.len()),
            ));
        }
        Ok((size, from))
    }

    /// Size of the datagram at the head of the queue, without consuming it.
    fn peek_size(&self) -> io::Result<usize> {
        let mut empty = [0u8; 0];
        // SAFETY: a zero-length read never writes through the pointer; the
        // sender address is not requested.
        let rc = unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                empty.as_mut_ptr().cast(),
                0,
                libc::MSG_PEEK | libc::MSG_TRUNC,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc as usize)
    }

    /// Send one datagram on a connected socket.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: `buf` is readable for `buf.len()` bytes.
        let rc = unsafe { libc::send(self.fd.as_raw_fd(), buf.as_ptr().cast(), buf.len(), 0) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc as usize)
    }

    /// Switch the socket between blocking and non-blocking mode.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        update_status_flags(self.fd.as_raw_fd(), nonblocking)
    }

    /// The address this socket is bound to.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }
}

impl AsFd for DatagramSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for DatagramSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl std::fmt::Debug for DatagramSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramSocket")
            .field("fd", &self.fd.as_raw_fd())
            .field("local", &self.local)
            .finish()
    }
}

/// Put a raw descriptor into non-blocking mode.
///
/// Async-signal-safe: only `fcntl(2)` is called and nothing is allocated, so
/// this may run from a signal handler.
pub fn set_fd_nonblocking(fd: RawFd) -> io::Result<()> {
    update_status_flags(fd, true)
}

fn update_status_flags(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    // SAFETY: F_GETFL takes no pointer argument.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    let updated = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if updated == flags {
        return Ok(());
    }
    // SAFETY: F_SETFL takes an integer flag argument.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, updated) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
