/// Errors that can occur while launching or multiplexing a command.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Socket setup failed; the message names the failing call.
    #[error(transparent)]
    Transport(#[from] outerr_transport::TransportError),

    /// Writing to the combined output failed.
    #[error("write combined output: {0}")]
    Output(#[from] outerr_frame::FrameError),

    /// Receiving from the master socket failed.
    #[error("recvfrom: {0}")]
    Receive(std::io::Error),

    /// Installing the child-termination watcher failed.
    #[error("sigaction: {0}")]
    Signal(std::io::Error),

    /// `fork(2)` failed.
    #[error("fork: {0}")]
    Fork(std::io::Error),

    /// No command was given.
    #[error("no command to run")]
    EmptyCommand,

    /// A command argument or environment entry cannot be passed to exec.
    #[error("argument contains an interior NUL byte: {0:?}")]
    InteriorNul(String),

    /// The receive loop ended without a recorded child disposition.
    #[error("child terminated without a recorded status")]
    MissingDisposition,
}

pub type Result<T> = std::result::Result<T, MuxError>;
