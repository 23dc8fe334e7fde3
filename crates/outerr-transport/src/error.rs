use std::path::PathBuf;

/// Errors that can occur while setting up or using datagram endpoints.
///
/// Every setup variant names the system call that failed so the operator can
/// tell which step broke.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// `socket(2)` failed.
    #[error("socket: {0}")]
    Socket(std::io::Error),

    /// `bind(2)` to an anonymous address failed.
    #[error("bind: {0}")]
    Bind(std::io::Error),

    /// Reading back the autobound address failed.
    #[error("getsockname: {0}")]
    GetSockName(std::io::Error),

    /// Connecting a child-side socket to the master failed.
    #[error("connect: {0}")]
    Connect(std::io::Error),

    /// The system-wide send-buffer ceiling could not be read or parsed.
    #[error("{path}: {source}")]
    MaxSendBuffer {
        path: PathBuf,
        source: std::io::Error,
    },

    /// `getsockopt(SO_SNDBUF)` failed.
    #[error("get socket send buffer size: {0}")]
    SendBuffer(std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
