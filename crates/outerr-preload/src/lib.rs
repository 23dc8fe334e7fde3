//! outerr-preload: keeps a child's writes whole on datagram stdout/stderr.
//!
//! Loaded into the child with `LD_PRELOAD`. The library interposes `write`
//! and `writev`; a call the kernel rejects with `EMSGSIZE` is re-sent as a
//! run of smaller datagrams, so an arbitrarily large write still arrives
//! complete and in order. At load time it also sizes the chunk budget and
//! line-buffers C `stdout`.
//!
//! Nothing in here installs a logging subscriber: this code runs inside
//! somebody else's process. The one diagnostic (budget fallback) is a plain
//! line on the child's stderr.

pub mod budget;
pub mod hooks;
pub mod retry;
pub mod stdio;
pub mod sys;

use std::panic::AssertUnwindSafe;

/// Run `f`, turning a panic into `on_panic` with `errno` set to `EIO`.
///
/// Panics must never unwind into the C caller.
pub(crate) fn ffi_boundary<T>(on_panic: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            sys::set_errno(libc::EIO);
            on_panic
        }
    }
}

#[cfg(not(test))]
#[ctor::ctor]
fn init() {
    ffi_boundary((), || {
        let (size, source) = budget::discover();
        budget::set(size);
        if let budget::Source::Fallback(reason) = source {
            sys::diagnostic(&format!(
                "{}: get socket send buffer size: {reason}\n",
                sys::program_name()
            ));
        }
        // SAFETY: runs from the loader, before the host program's main.
        unsafe {
            stdio::line_buffer_stdout();
            stdio::patch_flush();
        }
    })
}
