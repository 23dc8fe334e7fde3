//! Child-termination watch.
//!
//! The `SIGCHLD` handler shares a small context with the receive loop: an
//! atomic status cell, the child's pid and the master socket descriptor. On
//! exit of that child the handler records the status and flips the master
//! socket to non-blocking, which turns the next empty receive into the
//! end-of-stream signal. Other children of the process are left alone, so
//! several sessions can run side by side.
//!
//! Everything reachable from the handler is async-signal-safe: atomic loads
//! and stores, `waitpid`, `fcntl`. Nothing allocates or locks.

use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use signal_hook::SigId;
use tracing::debug;

use crate::disposition::Disposition;
use crate::error::{MuxError, Result};

const NO_FD: RawFd = -1;
const NO_PID: libc::pid_t = 0;

/// Shared state between the receive loop and the `SIGCHLD` handler.
#[derive(Debug)]
pub struct ChildWatch {
    status: AtomicI32,
    terminated: AtomicBool,
    master_fd: AtomicI32,
    pid: AtomicI32,
}

impl ChildWatch {
    /// Create an unarmed watch.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            status: AtomicI32::new(0),
            terminated: AtomicBool::new(false),
            master_fd: AtomicI32::new(NO_FD),
            pid: AtomicI32::new(NO_PID),
        })
    }

    /// Remember the descriptor to make non-blocking once the child exits.
    pub fn arm(&self, master_fd: RawFd) {
        self.master_fd.store(master_fd, Ordering::Release);
    }

    /// Start watching `pid`, then collect it at once in case it exited
    /// before the pid was known to the handler.
    pub fn track(&self, pid: libc::pid_t) {
        self.pid.store(pid, Ordering::Release);
        self.reap();
    }

    /// Install the `SIGCHLD` handler. Must happen before the fork so that an
    /// immediately exiting child is not missed.
    pub fn install(self: &Arc<Self>) -> Result<SigId> {
        let watch = Arc::clone(self);
        // SAFETY: the closure only performs async-signal-safe operations
        // (waitpid, atomic stores, fcntl) and never allocates or locks.
        let id = unsafe {
            signal_hook::low_level::register(signal_hook::consts::SIGCHLD, move || {
                watch.reap();
            })
        }
        .map_err(MuxError::Signal)?;
        debug!("installed child termination watch");
        Ok(id)
    }

    /// Reap the tracked child if it has terminated and record its status.
    ///
    /// Runs in signal context. A no-op until [`ChildWatch::track`] and once
    /// the status has been recorded.
    pub fn reap(&self) {
        let pid = self.pid.load(Ordering::Acquire);
        if pid <= NO_PID || self.is_terminated() {
            return;
        }
        let saved = errno();
        let mut status: libc::c_int = 0;
        // SAFETY: `status` is a valid out-parameter; WNOHANG never blocks.
        let reaped = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if reaped == pid && (libc::WIFEXITED(status) || libc::WIFSIGNALED(status)) {
            self.record(status);
        }
        set_errno(saved);
    }

    /// Store a terminal wait status and make the master socket non-blocking.
    ///
    /// Async-signal-safe. The status is published before the socket flag
    /// changes, so a receive that sees `EAGAIN` always finds it.
    pub fn record(&self, status: libc::c_int) {
        self.status.store(status, Ordering::Release);
        self.terminated.store(true, Ordering::Release);
        let fd = self.master_fd.load(Ordering::Acquire);
        if fd != NO_FD {
            let _ = outerr_transport::set_fd_nonblocking(fd);
        }
    }

    /// Whether a terminal status has been recorded.
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// The recorded disposition, if the child has terminated.
    pub fn disposition(&self) -> Option<Disposition> {
        if !self.is_terminated() {
            return None;
        }
        Disposition::from_wait_status(self.status.load(Ordering::Acquire))
    }

    /// Remove a previously installed handler.
    pub fn uninstall(id: SigId) {
        signal_hook::low_level::unregister(id);
    }
}

fn errno() -> libc::c_int {
    io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn set_errno(value: libc::c_int) {
    // SAFETY: __errno_location returns this thread's errno slot.
    unsafe { *libc::__errno_location() = value };
}
