//! KILN Core Types
//!
//! Pure types shared by the orchestrator and the isolation backends:
//! execution records, the language catalog, the output governor and the
//! backend contract. No I/O happens in this crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod execution;
pub mod id;
pub mod language;
pub mod output;
pub mod time;

// Re-exports
pub use backend::{BackendOutcome, BackendRequest, ChunkSink, SandboxBackend};
pub use error::{BackendError, FailureKind, SubmitError, SubmitResult};
pub use execution::{Execution, ExecutionMetrics, ExecutionOptions, ExecutionStatus};
pub use id::ExecutionId;
pub use language::{
    Catalog, FileNaming, IsolationBackend, IsolationKind, Language, LanguageProfile,
    SourceTransform,
};
pub use output::{Admission, OutputGovernor, DEFAULT_OUTPUT_CEILING};
pub use time::Timestamp;
