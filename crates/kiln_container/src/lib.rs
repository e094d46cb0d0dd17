//! KILN Container Backend
//!
//! Runs compiled and interpreted languages inside ephemeral, locked-down
//! containers: read-only workspace, size-capped `/tmp`, no network, no
//! capabilities, memory/CPU/pid ceilings, and forced teardown.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod config;
pub mod docker;
pub mod error;
pub mod runtime;
pub mod workspace;

// Re-exports
pub use backend::ContainerBackend;
pub use config::ContainerConfig;
pub use docker::DockerRuntime;
pub use error::ContainerError;
pub use runtime::{Channel, OutputChunk, OutputStream, UnitRuntime, UnitSpec};
pub use workspace::{Workspace, STDIN_FILE};
