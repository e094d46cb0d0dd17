//! KILN Runtime
//!
//! The execution orchestrator and its collaborators:
//! - fail-fast concurrency governor
//! - lock-protected execution registry
//! - lifecycle event bus
//! - engine telemetry

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod events;
pub mod governor;
pub mod monitor;
pub mod orchestrator;
pub mod registry;

// Re-exports
pub use config::EngineConfig;
pub use events::{EventBus, EventSubscription, ExecutionEvent};
pub use governor::{ConcurrencyGovernor, Permit};
pub use monitor::EngineStats;
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use registry::{Finalize, Registry};
