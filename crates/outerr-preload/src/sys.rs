//! Access to the real `write`/`writev`.
//!
//! This library exports its own `write` and `writev`, so calling them by
//! name from in here would re-enter the interceptors. The next definitions
//! in lookup order are resolved once through `dlsym(RTLD_NEXT, ..)`; if that
//! fails the raw system call is used instead.

use std::ffi::CStr;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::{c_int, c_void, iovec, size_t, ssize_t};

use crate::retry::Primitive;

type WriteFn = unsafe extern "C" fn(c_int, *const c_void, size_t) -> ssize_t;
type WritevFn = unsafe extern "C" fn(c_int, *const iovec, c_int) -> ssize_t;

const UNRESOLVED: usize = 0;
const UNAVAILABLE: usize = 1;

static REAL_WRITE: AtomicUsize = AtomicUsize::new(UNRESOLVED);
static REAL_WRITEV: AtomicUsize = AtomicUsize::new(UNRESOLVED);

fn resolve(cache: &AtomicUsize, name: &CStr) -> Option<usize> {
    let cached = cache.load(Ordering::Acquire);
    let addr = if cached == UNRESOLVED {
        // SAFETY: `name` is NUL-terminated; RTLD_NEXT is a valid pseudo-handle.
        let sym = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) } as usize;
        let addr = if sym == 0 { UNAVAILABLE } else { sym };
        cache.store(addr, Ordering::Release);
        addr
    } else {
        cached
    };
    (addr != UNAVAILABLE).then_some(addr)
}

/// Call the original `write`.
///
/// # Safety
/// `buf` must be readable for `count` bytes.
pub unsafe fn real_write(fd: c_int, buf: *const c_void, count: size_t) -> ssize_t {
    match resolve(&REAL_WRITE, c"write") {
        Some(addr) => {
            let f: WriteFn = std::mem::transmute::<usize, WriteFn>(addr);
            f(fd, buf, count)
        }
        None => libc::syscall(libc::SYS_write, fd, buf, count) as ssize_t,
    }
}

/// Call the original `writev`.
///
/// # Safety
/// `iov` must point at `iovcnt` valid `iovec`s.
pub unsafe fn real_writev(fd: c_int, iov: *const iovec, iovcnt: c_int) -> ssize_t {
    match resolve(&REAL_WRITEV, c"writev") {
        Some(addr) => {
            let f: WritevFn = std::mem::transmute::<usize, WritevFn>(addr);
            f(fd, iov, iovcnt)
        }
        None => libc::syscall(libc::SYS_writev, fd, iov, iovcnt) as ssize_t,
    }
}

/// Current thread's `errno`.
pub fn errno() -> c_int {
    // SAFETY: __errno_location always returns this thread's errno slot.
    unsafe { *libc::__errno_location() }
}

/// Overwrite the current thread's `errno`.
pub fn set_errno(value: c_int) {
    // SAFETY: as above.
    unsafe { *libc::__errno_location() = value };
}

/// A descriptor written through the original primitives.
#[derive(Debug, Clone, Copy)]
pub struct Original {
    fd: RawFd,
}

impl Original {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl Primitive for Original {
    fn write(&self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: `buf` is a live slice.
        let rc = unsafe { real_write(self.fd, buf.as_ptr().cast(), buf.len()) };
        if rc < 0 {
            return Err(io::Error::from_raw_os_error(errno()));
        }
        Ok(rc as usize)
    }

    fn writev(&self, iov: &[iovec]) -> io::Result<usize> {
        // SAFETY: `iov` is a live slice of iovecs whose buffers the caller keeps alive.
        let rc = unsafe { real_writev(self.fd, iov.as_ptr(), iov.len() as c_int) };
        if rc < 0 {
            return Err(io::Error::from_raw_os_error(errno()));
        }
        Ok(rc as usize)
    }
}

extern "C" {
    static program_invocation_name: *const libc::c_char;
}

/// `argv[0]` of the host process, as the C library recorded it.
pub fn program_name() -> String {
    // SAFETY: the C library initializes this before any constructor runs;
    // it is either null or a NUL-terminated string that lives for the
    // whole process.
    unsafe {
        if program_invocation_name.is_null() {
            return "out-err-preload".to_string();
        }
        CStr::from_ptr(program_invocation_name)
            .to_string_lossy()
            .into_owned()
    }
}

/// Write a diagnostic line straight to descriptor 2.
pub fn diagnostic(line: &str) {
    let stderr = Original::new(libc::STDERR_FILENO);
    let _ = crate::retry::write_chunked(&stderr, line.as_bytes(), usize::MAX);
}
