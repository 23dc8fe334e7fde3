//! Merge a command's stdout and stderr into one ordered stream.
//!
//! The child's standard output and standard error are datagram sockets
//! connected to a single receiver, so the kernel keeps the two in the order
//! they were written. Each datagram becomes one frame of the combined
//! stream, tagged with the descriptor it came from.
//!
//! # Crate Structure
//!
//! - [`transport`]: anonymous datagram endpoints and send-buffer discovery
//! - [`frame`]: the 4-byte header codec, frame reader and writer
//! - [`mux`]: launching the child and multiplexing its output
//!
//! The `out-err` and `out-err-dump` binaries live behind the `cli` feature.
//! The companion `outerr-preload` library is loaded into the child to keep
//! oversized writes intact.

/// Re-export transport types.
pub mod transport {
    pub use outerr_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use outerr_frame::*;
}

/// Re-export launcher and multiplexer types.
pub mod mux {
    pub use outerr_mux::*;
}

/// Shared plumbing for the command-line tools (requires `cli` feature).
#[cfg(feature = "cli")]
pub mod cli;
