//! Output governor.
//!
//! Accumulates captured output chunk by chunk and refuses to grow past the
//! configured ceiling. The chunk that crosses the ceiling is truncated at the
//! ceiling, so the buffer never holds more than `ceiling` bytes.

/// Default output ceiling (1 MiB)
pub const DEFAULT_OUTPUT_CEILING: usize = 1024 * 1024;

/// Verdict for a pushed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Chunk fully captured
    Accepted,
    /// Ceiling crossed; the execution must be aborted
    Exceeded,
}

/// Byte-capped output accumulator
#[derive(Debug, Clone)]
pub struct OutputGovernor {
    /// Captured bytes
    buffer: Vec<u8>,
    /// Maximum bytes
    ceiling: usize,
    /// Ceiling has been crossed
    exceeded: bool,
    /// Bytes offered, including dropped ones
    offered: u64,
}

impl OutputGovernor {
    /// Create a governor with a ceiling
    #[must_use]
    pub fn new(ceiling: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(ceiling.min(64 * 1024)),
            ceiling,
            exceeded: false,
            offered: 0,
        }
    }

    /// Offer a chunk.
    ///
    /// Once exceeded, every later chunk is dropped and `Exceeded` returned.
    pub fn push(&mut self, chunk: &[u8]) -> Admission {
        self.offered += chunk.len() as u64;
        if self.exceeded {
            return Admission::Exceeded;
        }

        let room = self.ceiling - self.buffer.len();
        if chunk.len() > room {
            self.buffer.extend_from_slice(&chunk[..room]);
            self.exceeded = true;
            return Admission::Exceeded;
        }

        self.buffer.extend_from_slice(chunk);
        Admission::Accepted
    }

    /// Captured byte count
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Nothing captured yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Ceiling in bytes
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Bytes left before the ceiling
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.ceiling - self.buffer.len()
    }

    /// Whether the ceiling was crossed
    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        self.exceeded
    }

    /// Total bytes offered, captured or not
    #[must_use]
    pub fn offered(&self) -> u64 {
        self.offered
    }

    /// Captured bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume into text; invalid UTF-8 is replaced
    #[must_use]
    pub fn into_text(self) -> String {
        match String::from_utf8(self.buffer) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        }
    }
}

impl Default for OutputGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_CEILING)
    }
}
