//! Local datagram transport for out+err.
//!
//! Provides the socket plumbing both halves of the system share:
//! - Anonymous (autobound) `AF_UNIX` datagram sockets
//! - Sender address capture on receive, compared as opaque bytes
//! - Discovery of the kernel's send-buffer limits
//!
//! This is the lowest layer. The multiplexer and the preload library both
//! build on it. Linux only: autobind and `/proc/sys/net` are Linux features.

pub mod budget;
pub mod datagram;
pub mod endpoint;
pub mod error;

pub use budget::{default_send_buffer, max_send_buffer, FALLBACK_SEND_BUFFER, WMEM_MAX_PATH};
pub use datagram::{set_fd_nonblocking, DatagramSocket};
pub use endpoint::Endpoint;
pub use error::{Result, TransportError};
