use std::fmt;

/// Terminal outcome of the child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Normal exit with the given code.
    Exited(i32),
    /// Killed by the given signal number.
    Signaled(i32),
}

impl Disposition {
    /// Decode a raw `waitpid` status word.
    ///
    /// Returns `None` for stop/continue notifications, which are not
    /// terminal.
    pub fn from_wait_status(status: libc::c_int) -> Option<Self> {
        if libc::WIFEXITED(status) {
            Some(Disposition::Exited(libc::WEXITSTATUS(status)))
        } else if libc::WIFSIGNALED(status) {
            Some(Disposition::Signaled(libc::WTERMSIG(status)))
        } else {
            None
        }
    }

    /// Shell-style exit code: the exit code itself, or `128 + signal`.
    pub fn exit_code(self) -> i32 {
        match self {
            Disposition::Exited(code) => code,
            Disposition::Signaled(signal) => 128 + signal,
        }
    }

    /// Terminate this process the same way the child terminated.
    ///
    /// A signaled child is mirrored by re-raising its signal on ourselves
    /// with the default action restored and the signal unblocked. Should the
    /// process survive that, it exits with `128 + signal`.
    pub fn mirror(self) -> ! {
        if let Disposition::Signaled(signal) = self {
            raise_default(signal);
        }
        std::process::exit(self.exit_code())
    }
}

fn raise_default(signal: libc::c_int) {
    // SAFETY: resetting a disposition and adjusting this thread's mask only
    // touch process signal state; `set` is a local, initialized sigset.
    unsafe {
        libc::signal(signal, libc::SIG_DFL);
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, signal);
        libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut());
        libc::kill(libc::getpid(), signal);
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Exited(code) => write!(f, "exited with code {code}"),
            Disposition::Signaled(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}
