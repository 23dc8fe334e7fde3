//! Locating the interception library.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// File name cargo gives the `outerr-preload` cdylib.
pub const PRELOAD_LIBRARY: &str = "libouterr_preload.so";

/// Decide which library, if any, the child gets preloaded.
///
/// `--no-preload` wins. An explicit path must exist. Otherwise the library
/// is looked up next to the running executable; when it is not there the
/// child runs unmodified.
pub fn resolve(explicit: Option<PathBuf>, disabled: bool) -> Option<PathBuf> {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    resolve_in(exe_dir.as_deref(), explicit, disabled)
}

fn resolve_in(exe_dir: Option<&Path>, explicit: Option<PathBuf>, disabled: bool) -> Option<PathBuf> {
    if disabled {
        debug!("interception library disabled");
        return None;
    }
    if let Some(path) = explicit {
        if path.is_file() {
            return Some(absolute(path));
        }
        warn!(?path, "interception library not found; running child unmodified");
        return None;
    }
    let candidate = exe_dir?.join(PRELOAD_LIBRARY);
    if candidate.is_file() {
        debug!(path = ?candidate, "found interception library");
        Some(candidate)
    } else {
        debug!(path = ?candidate, "no interception library; running child unmodified");
        None
    }
}

// The child may change directory before the loader reads LD_PRELOAD.
fn absolute(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}
