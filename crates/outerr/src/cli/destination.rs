//! Where the combined stream goes.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::debug;

/// Permissions for a newly created output file.
pub const OUTPUT_MODE: u32 = 0o600;

/// Open the combined-stream destination: `path` (created or truncated,
/// owner-only) or a duplicate of this process's stdout.
///
/// The stdout duplicate bypasses Rust's line-buffered `Stdout` so every
/// frame leaves in a single `writev`.
pub fn open(path: Option<&Path>) -> io::Result<File> {
    match path {
        Some(path) => {
            debug!(?path, "writing combined stream to file");
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(OUTPUT_MODE)
                .open(path)
        }
        None => {
            let fd = io::stdout().as_fd().try_clone_to_owned()?;
            Ok(File::from(fd))
        }
    }
}
