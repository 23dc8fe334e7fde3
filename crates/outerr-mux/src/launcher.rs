use std::ffi::{CString, OsStr, OsString};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use outerr_frame::FrameWriter;
use outerr_transport::DatagramSocket;
use signal_hook::SigId;
use tracing::{debug, info};

use crate::disposition::Disposition;
use crate::error::{MuxError, Result};
use crate::multiplexer::{Endpoints, Multiplexer};
use crate::watch::ChildWatch;

/// Environment variable the dynamic loader reads for preloaded libraries.
pub const PRELOAD_ENV: &str = "LD_PRELOAD";

/// Prefix for messages the child branch prints.
const PROGRAM: &str = "out-err";

/// Value for [`PRELOAD_ENV`] that loads `library` ahead of anything the
/// environment already preloads.
pub fn preload_value(library: &Path, existing: Option<&OsStr>) -> OsString {
    let mut value = library.as_os_str().to_os_string();
    if let Some(existing) = existing.filter(|v| !v.is_empty()) {
        value.push(":");
        value.push(existing);
    }
    value
}

/// Builder for a child process whose stdout/stderr are datagram sockets.
#[derive(Debug, Clone)]
pub struct Launcher {
    command: Vec<OsString>,
    preload: Option<PathBuf>,
}

impl Launcher {
    /// Prepare to run `command` (program followed by its arguments).
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            preload: None,
        }
    }

    /// Arm the interception library in the child, or run it unmodified.
    pub fn with_preload(mut self, library: Option<PathBuf>) -> Self {
        self.preload = library;
        self
    }

    /// Create the sockets, fork, and exec the command in the child.
    ///
    /// The returned session owns the master socket and the installed child
    /// watch; call [`Session::multiplex`] to collect the output.
    pub fn spawn(self) -> Result<Session> {
        let exec = ExecPlan::prepare(&self)?;

        let master = DatagramSocket::bind_anonymous()?;
        let output = DatagramSocket::bind_anonymous()?;
        let error = DatagramSocket::bind_anonymous()?;
        output.connect(master.local_endpoint())?;
        error.connect(master.local_endpoint())?;
        let endpoints = Endpoints {
            output: *output.local_endpoint(),
            error: *error.local_endpoint(),
        };

        let watch = ChildWatch::new();
        watch.arm(master.as_raw_fd());
        let sig = watch.install()?;

        // SAFETY: the child branch only calls async-signal-safe functions on
        // data prepared before the fork, then execs or `_exit`s.
        let pid = unsafe { libc::fork() };
        if pid == -1 {
            let err = io::Error::last_os_error();
            ChildWatch::uninstall(sig);
            return Err(MuxError::Fork(err));
        }
        if pid == 0 {
            exec.run_child(output.as_raw_fd(), error.as_raw_fd());
        }

        drop(output);
        drop(error);
        watch.track(pid);
        info!(pid, program = ?self.command[0], "started child");

        Ok(Session {
            master,
            endpoints,
            watch,
            sig: Some(sig),
            pid,
        })
    }
}

/// A running child and the sockets that collect its output.
#[derive(Debug)]
pub struct Session {
    master: DatagramSocket,
    endpoints: Endpoints,
    watch: Arc<ChildWatch>,
    sig: Option<SigId>,
    pid: libc::pid_t,
}

impl Session {
    /// Addresses of the child's stdout and stderr sockets.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Frame everything the child writes into `writer` until it terminates,
    /// then return how it terminated.
    ///
    /// `capacity` sizes the initial receive buffer; it grows on demand for
    /// larger datagrams.
    pub fn multiplex<W: Write>(
        mut self,
        writer: FrameWriter<W>,
        capacity: usize,
    ) -> Result<Disposition> {
        debug!(pid = self.pid, capacity, "multiplexing child output");
        let disposition = Multiplexer::new(
            &self.master,
            self.endpoints,
            Arc::clone(&self.watch),
            writer,
            capacity,
        )
        .run()?;
        if let Some(sig) = self.sig.take() {
            ChildWatch::uninstall(sig);
        }
        debug!(pid = self.pid, %disposition, "child finished");
        Ok(disposition)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(sig) = self.sig.take() {
            ChildWatch::uninstall(sig);
        }
    }
}

/// Everything the child branch needs, allocated before the fork.
struct ExecPlan {
    program: CString,
    _args: Vec<CString>,
    argv: Vec<*const libc::c_char>,
    _env: Vec<CString>,
    envp: Vec<*const libc::c_char>,
    failure_prefix: Vec<u8>,
}

impl ExecPlan {
    fn prepare(launcher: &Launcher) -> Result<Self> {
        let program = launcher.command.first().ok_or(MuxError::EmptyCommand)?;
        let args = launcher
            .command
            .iter()
            .map(|arg| to_cstring(arg.as_bytes().to_vec()))
            .collect::<Result<Vec<_>>>()?;
        let program = to_cstring(program.as_bytes().to_vec())?;

        let env = child_environment(launcher.preload.as_deref())
            .into_iter()
            .map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                to_cstring(entry)
            })
            .collect::<Result<Vec<_>>>()?;

        let argv = null_terminated(&args);
        let envp = null_terminated(&env);
        let failure_prefix = format!(
            "{PROGRAM}: Failed to run '{}': ",
            program.to_string_lossy()
        )
        .into_bytes();

        Ok(Self {
            program,
            _args: args,
            argv,
            _env: env,
            envp,
            failure_prefix,
        })
    }

    /// Child branch after `fork`. Never returns.
    fn run_child(&self, output: RawFd, error: RawFd) -> ! {
        // SAFETY: only async-signal-safe calls on memory prepared before fork.
        unsafe {
            // The parent ignores SIGPIPE; an ignored disposition survives exec.
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
            if redirect(output, libc::STDOUT_FILENO) && redirect(error, libc::STDERR_FILENO) {
                libc::execvpe(self.program.as_ptr(), self.argv.as_ptr(), self.envp.as_ptr());
            }
            let errno = *libc::__errno_location();
            self.report_failure(errno);
            libc::_exit(1)
        }
    }

    unsafe fn report_failure(&self, errno: libc::c_int) {
        let mut reason = [0u8; 256];
        let text: &[u8] =
            if libc::strerror_r(errno, reason.as_mut_ptr().cast(), reason.len()) == 0 {
                let end = reason.iter().position(|b| *b == 0).unwrap_or(reason.len());
                &reason[..end]
            } else {
                b"unknown error"
            };
        for part in [&self.failure_prefix[..], text, &b"\n"[..]] {
            libc::write(libc::STDERR_FILENO, part.as_ptr().cast(), part.len());
        }
    }
}

/// Duplicate `fd` onto `target`, clearing close-on-exec either way.
unsafe fn redirect(fd: RawFd, target: RawFd) -> bool {
    if fd == target {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        return flags != -1 && libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) != -1;
    }
    libc::dup2(fd, target) != -1
}

fn child_environment(preload: Option<&Path>) -> Vec<(OsString, OsString)> {
    let mut env: Vec<(OsString, OsString)> = std::env::vars_os().collect();
    if let Some(library) = preload {
        let existing = env
            .iter()
            .position(|(key, _)| key == PRELOAD_ENV)
            .map(|idx| env.remove(idx).1);
        let value = preload_value(library, existing.as_deref());
        debug!(library = ?library, value = ?value, "arming interception library");
        env.push((OsString::from(PRELOAD_ENV), value));
    }
    env
}

fn to_cstring(bytes: Vec<u8>) -> Result<CString> {
    CString::new(bytes).map_err(|err| {
        MuxError::InteriorNul(String::from_utf8_lossy(&err.into_vec()).into_owned())
    })
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preload_value_without_existing_list() {
        let value = preload_value(Path::new("/opt/lib/libouterr_preload.so"), None);
        assert_eq!(value, OsString::from("/opt/lib/libouterr_preload.so"));

        let value = preload_value(Path::new("/x.so"), Some(OsStr::new("")));
        assert_eq!(value, OsString::from("/x.so"));
    }

    #[test]
    fn preload_value_goes_first() {
        let value = preload_value(Path::new("/x.so"), Some(OsStr::new("/a.so:/b.so")));
        assert_eq!(value, OsString::from("/x.so:/a.so:/b.so"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = Launcher::new(Vec::<OsString>::new()).spawn().unwrap_err();
        assert!(matches!(err, MuxError::EmptyCommand));
    }

    #[test]
    fn interior_nul_is_rejected_before_fork() {
        let err = Launcher::new(["echo", "a\0b"]).spawn().unwrap_err();
        assert!(matches!(err, MuxError::InteriorNul(ref arg) if arg.contains('a')));
    }

    #[test]
    fn argv_is_null_terminated() {
        let plan = ExecPlan::prepare(&Launcher::new(["printf", "%s", "x"])).unwrap();
        assert_eq!(plan.argv.len(), 4);
        assert!(plan.argv[3].is_null());
        assert!(plan.envp.last().unwrap().is_null());
        assert_eq!(
            plan.failure_prefix,
            b"out-err: Failed to run 'printf': ".to_vec()
        );
    }

    #[test]
    fn environment_carries_preload_only_when_armed() {
        let plain = child_environment(None);
        let armed = child_environment(Some(Path::new("/tmp/libouterr_preload.so")));

        let preload_of = |env: &[(OsString, OsString)]| {
            env.iter()
                .filter(|(k, _)| k == PRELOAD_ENV)
                .map(|(_, v)| v.clone())
                .collect::<Vec<_>>()
        };
        let armed_values = preload_of(&armed);
        assert_eq!(armed_values.len(), 1);
        assert!(armed_values[0]
            .to_string_lossy()
            .starts_with("/tmp/libouterr_preload.so"));
        assert_eq!(plain.len() + usize::from(preload_of(&plain).is_empty()), armed.len());
    }
}
