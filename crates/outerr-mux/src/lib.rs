//! Launch a command and merge its stdout/stderr into one ordered stream.
//!
//! The child's descriptors 1 and 2 are datagram sockets connected to a single
//! master socket. Each send the child performs becomes one datagram, and the
//! kernel queues datagrams from both sockets at the master in send order.
//! The multiplexer tags each datagram by its sender address and writes it out
//! as one frame.

pub mod disposition;
pub mod error;
pub mod launcher;
pub mod multiplexer;
pub mod watch;

pub use disposition::Disposition;
pub use error::{MuxError, Result};
pub use launcher::{preload_value, Launcher, Session, PRELOAD_ENV};
pub use multiplexer::{Endpoints, MuxStats, Multiplexer};
pub use watch::ChildWatch;
