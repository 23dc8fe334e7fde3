//! Origin tags for framed chunks.

use std::fmt;

/// Which of the child's output descriptors a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    /// Standard output (tag bit 0).
    Out,
    /// Standard error (tag bit 1).
    Err,
}

impl Stream {
    /// The single tag bit carried in the top bit of the header word.
    pub fn tag(self) -> u32 {
        match self {
            Stream::Out => 0,
            Stream::Err => 1,
        }
    }

    /// Inverse of [`Stream::tag`]; any non-zero bit means stderr.
    pub fn from_tag(tag: u32) -> Self {
        if tag == 0 {
            Stream::Out
        } else {
            Stream::Err
        }
    }

    /// Conventional short name.
    pub fn name(self) -> &'static str {
        match self {
            Stream::Out => "stdout",
            Stream::Err => "stderr",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
