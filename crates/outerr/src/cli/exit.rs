use std::fmt;
use std::io;

use outerr_frame::FrameError;
use outerr_mux::MuxError;
use outerr_transport::TransportError;

// Exit codes for failures of the tools themselves. A successful `out-err`
// run exits the way its child did instead.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::new(FAILURE, format!("{context}: {err}"))
}

/// Transport errors already name the failing call.
pub fn transport_error(err: TransportError) -> CliError {
    CliError::new(FAILURE, err.to_string())
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Truncated { .. } | FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn mux_error(err: MuxError) -> CliError {
    match err {
        MuxError::Transport(err) => transport_error(err),
        MuxError::EmptyCommand | MuxError::InteriorNul(_) => CliError::new(USAGE, err.to_string()),
        MuxError::MissingDisposition => CliError::new(INTERNAL, err.to_string()),
        other => CliError::new(FAILURE, other.to_string()),
    }
}
