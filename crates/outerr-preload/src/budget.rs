//! The send-size budget shared by every intercepted call.
//!
//! Written once from the library constructor, before the host program's
//! own code runs, and only read afterwards.

use std::sync::atomic::{AtomicUsize, Ordering};

use outerr_transport::FALLBACK_SEND_BUFFER;

/// Environment override for the send-buffer size, in bytes.
pub const SEND_BUFFER_ENV: &str = "OUT_ERR_SEND_BUFFER";

/// Smallest chunk the retry engine will shrink to.
pub const MIN_CHUNK: usize = 512;

// 0 means "not initialized yet".
static SEND_BUFFER: AtomicUsize = AtomicUsize::new(0);

/// Where the budget came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Override,
    Kernel,
    Fallback(String),
}

/// Determine the send-buffer size for this process.
pub fn discover() -> (usize, Source) {
    if let Some(size) = std::env::var(SEND_BUFFER_ENV)
        .ok()
        .as_deref()
        .and_then(parse_override)
    {
        return (size, Source::Override);
    }
    match outerr_transport::default_send_buffer() {
        Ok(size) => (size, Source::Kernel),
        Err(err) => (FALLBACK_SEND_BUFFER, Source::Fallback(err.to_string())),
    }
}

fn parse_override(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|size| *size > 0)
}

/// Publish the budget.
pub fn set(send_buffer: usize) {
    SEND_BUFFER.store(send_buffer, Ordering::Release);
}

/// The send-buffer size in effect.
pub fn send_buffer() -> usize {
    match SEND_BUFFER.load(Ordering::Acquire) {
        0 => FALLBACK_SEND_BUFFER,
        size => size,
    }
}

/// Largest payload attempted per call once a write has been rejected as too
/// large: half the send buffer, never below [`MIN_CHUNK`].
pub fn chunk_limit(send_buffer: usize) -> usize {
    (send_buffer / 2).max(MIN_CHUNK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_limit_is_half_the_buffer() {
        assert_eq!(chunk_limit(212_992), 106_496);
        assert_eq!(chunk_limit(FALLBACK_SEND_BUFFER), 16 * 1024);
    }

    #[test]
    fn chunk_limit_has_a_floor() {
        assert_eq!(chunk_limit(100), MIN_CHUNK);
        assert_eq!(chunk_limit(0), MIN_CHUNK);
    }

    #[test]
    fn override_must_be_a_positive_integer() {
        assert_eq!(parse_override("65536"), Some(65536));
        assert_eq!(parse_override(" 4096\n"), Some(4096));
        assert_eq!(parse_override("0"), None);
        assert_eq!(parse_override("-1"), None);
        assert_eq!(parse_override("lots"), None);
    }

    #[test]
    fn unset_budget_reads_as_fallback() {
        // The constructor does not run under the test harness.
        assert_eq!(send_buffer(), FALLBACK_SEND_BUFFER);
    }
}
