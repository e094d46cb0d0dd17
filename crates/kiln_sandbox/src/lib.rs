//! KILN In-Process Sandbox
//!
//! WebAssembly backend for languages that run inside the host process.
//! Guests get a single capability, an output primitive, and run under a
//! wall-clock budget, a linear-memory ceiling and an output ceiling.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod compile;
pub mod fuel;
pub mod host;
pub mod memory;
pub mod sandbox;

// Re-exports
pub use compile::{admit_source, build_engine, compile, CompileError};
pub use fuel::FuelBudget;
pub use host::{link_output, GuestState, HostTrap, HOST_MODULE, PRINT_FN};
pub use memory::{bytes_to_pages, GuestLimits, MemoryExhausted, WASM_PAGE_SIZE};
pub use sandbox::{InProcessBackend, SandboxConfig, START_EXPORT};
