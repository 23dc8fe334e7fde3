use std::fmt;
use std::mem;
use std::os::fd::{AsRawFd, BorrowedFd};

/// An anonymous local datagram socket address.
///
/// Endpoints are opaque: the only supported operation is equality, which
/// compares the address length and the raw address bytes. The abstract name
/// chosen by the kernel is never parsed.
#[derive(Clone, Copy)]
pub struct Endpoint {
    addr: libc::sockaddr_un,
    len: libc::socklen_t,
}

impl Endpoint {
    /// An all-zero address with room for the largest `sockaddr_un`.
    ///
    /// Used as the out-parameter for `recvfrom`/`getsockname`.
    pub(crate) fn zeroed() -> Self {
        Self {
            // SAFETY: `sockaddr_un` is plain old data; all-zero is a valid value.
            addr: unsafe { mem::zeroed() },
            len: mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        }
    }

    /// Read the local address a socket is bound to.
    pub(crate) fn local_of(fd: BorrowedFd<'_>) -> std::io::Result<Self> {
        let mut endpoint = Self::zeroed();
        // SAFETY: `addr`/`len` are valid writable out-parameters sized for `sockaddr_un`.
        let rc = unsafe {
            libc::getsockname(
                fd.as_raw_fd(),
                endpoint.as_mut_ptr(),
                &mut endpoint.len,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(endpoint)
    }

    pub(crate) fn as_ptr(&self) -> *const libc::sockaddr {
        (&self.addr as *const libc::sockaddr_un).cast()
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut libc::sockaddr {
        (&mut self.addr as *mut libc::sockaddr_un).cast()
    }

    pub(crate) fn len_mut(&mut self) -> &mut libc::socklen_t {
        &mut self.len
    }

    /// Length of the address as reported by the kernel.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// True for an address carrying nothing beyond the family field.
    pub fn is_empty(&self) -> bool {
        self.len() <= mem::size_of::<libc::sa_family_t>()
    }

    /// Raw address bytes, exactly `len()` long (clamped to the struct size).
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.len().min(mem::size_of::<libc::sockaddr_un>());
        // SAFETY: `addr` is a live, initialized `sockaddr_un`; `len` never exceeds its size.
        unsafe { std::slice::from_raw_parts((&self.addr as *const libc::sockaddr_un).cast(), len) }
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Endpoint {}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let family = mem::size_of::<libc::sa_family_t>();
        let name: String = self
            .as_bytes()
            .iter()
            .skip(family)
            .map(|b| format!("{b:02x}"))
            .collect();
        f.debug_struct("Endpoint")
            .field("len", &self.len)
            .field("name", &name)
            .finish()
    }
}
