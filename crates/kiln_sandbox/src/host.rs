//! Host functions exposed to guests.
//!
//! The only capability a guest gets is `env.print(ptr, len)`, which copies
//! a slice of its linear memory into the output governor. There is no
//! file, network, clock or process access.

use kiln_core::{Admission, ChunkSink, OutputGovernor};
use wasmtime::{Caller, Extern, Linker};

use crate::memory::GuestLimits;

/// Import module name
pub const HOST_MODULE: &str = "env";

/// Output primitive name
pub const PRINT_FN: &str = "print";

/// Traps raised by host functions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostTrap {
    /// Captured output crossed the ceiling
    #[error("output limit of {ceiling} bytes exceeded")]
    OutputLimitExceeded {
        /// Ceiling in bytes
        ceiling: usize,
    },

    /// Pointer or length outside guest memory
    #[error("print out of bounds: ptr {ptr}, len {len}")]
    OutOfBounds {
        /// Guest pointer
        ptr: u32,
        /// Requested length
        len: u32,
    },

    /// The guest does not export a memory named `memory`
    #[error("guest module does not export `memory`")]
    NoMemory,
}

/// Store data for one invocation
#[derive(Debug)]
pub struct GuestState {
    /// Captured output
    output: OutputGovernor,
    /// Live output forwarding
    chunks: ChunkSink,
    /// Memory and table limits
    pub(crate) limits: GuestLimits,
}

impl GuestState {
    /// Create state for one invocation
    #[must_use]
    pub fn new(max_output_bytes: usize, chunks: ChunkSink, limits: GuestLimits) -> Self {
        Self {
            output: OutputGovernor::new(max_output_bytes),
            chunks,
            limits,
        }
    }

    /// Capture a chunk of guest output.
    ///
    /// # Errors
    ///
    /// Returns [`HostTrap::OutputLimitExceeded`] once the ceiling is crossed;
    /// the bytes under the ceiling are kept.
    pub fn capture(&mut self, bytes: &[u8]) -> Result<(), HostTrap> {
        let before = self.output.len();
        let admission = self.output.push(bytes);
        self.chunks.emit(&self.output.as_bytes()[before..]);
        match admission {
            Admission::Accepted => Ok(()),
            Admission::Exceeded => Err(HostTrap::OutputLimitExceeded {
                ceiling: self.output.ceiling(),
            }),
        }
    }

    /// Peak linear memory granted to the guest
    #[must_use]
    pub fn peak_memory_bytes(&self) -> u64 {
        self.limits.peak_memory_bytes()
    }

    /// Consume into the captured output
    #[must_use]
    pub fn into_output(self) -> OutputGovernor {
        self.output
    }
}

/// Register the output primitive on a linker
///
/// # Errors
///
/// Returns error if the name is already defined
pub fn link_output(linker: &mut Linker<GuestState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        HOST_MODULE,
        PRINT_FN,
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> wasmtime::Result<()> {
            let Some(Extern::Memory(memory)) = caller.get_export("memory") else {
                return Err(HostTrap::NoMemory.into());
            };
            let (ptr, len) = (ptr as u32, len as u32);
            let (data, state) = memory.data_and_store_mut(&mut caller);
            let start = ptr as usize;
            let bytes = start
                .checked_add(len as usize)
                .and_then(|end| data.get(start..end))
                .ok_or(HostTrap::OutOfBounds { ptr, len })?;
            state.capture(bytes)?;
            Ok(())
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DEFAULT_MAX_TABLE_ELEMENTS, WASM_PAGE_SIZE};
    use std::sync::{Arc, Mutex};

    fn state(ceiling: usize, chunks: ChunkSink) -> GuestState {
        GuestState::new(
            ceiling,
            chunks,
            GuestLimits::new(WASM_PAGE_SIZE, DEFAULT_MAX_TABLE_ELEMENTS),
        )
    }

    #[test]
    fn test_capture_under_ceiling() {
        let mut state = state(16, ChunkSink::discard());
        assert!(state.capture(b"Hello\n").is_ok());
        assert_eq!(state.into_output().into_text(), "Hello\n");
    }

    #[test]
    fn test_capture_over_ceiling_traps_and_keeps_prefix() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let mut state = state(4, ChunkSink::new(move |c| captured.lock().unwrap().extend_from_slice(&c)));

        let err = state.capture(b"abcdef").unwrap_err();
        assert_eq!(err, HostTrap::OutputLimitExceeded { ceiling: 4 });
        assert_eq!(seen.lock().unwrap().as_slice(), b"abcd");
        assert_eq!(state.into_output().as_bytes(), b"abcd");
    }
}
