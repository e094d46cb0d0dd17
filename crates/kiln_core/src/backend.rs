//! Contract between the orchestrator and the isolation backends.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, FailureKind};
use crate::execution::{ExecutionOptions, ExecutionStatus};
use crate::id::ExecutionId;
use crate::language::{IsolationKind, LanguageProfile};

/// Receiver of live output chunks
#[derive(Clone, Default)]
pub struct ChunkSink {
    emit: Option<Arc<dyn Fn(Bytes) + Send + Sync>>,
}

impl ChunkSink {
    /// Sink forwarding every chunk to `emit`
    #[must_use]
    pub fn new(emit: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        Self {
            emit: Some(Arc::new(emit)),
        }
    }

    /// Sink dropping every chunk
    #[must_use]
    pub fn discard() -> Self {
        Self::default()
    }

    /// Forward a captured chunk
    pub fn emit(&self, chunk: &[u8]) {
        if let Some(emit) = &self.emit {
            if !chunk.is_empty() {
                emit(Bytes::copy_from_slice(chunk));
            }
        }
    }
}

impl std::fmt::Debug for ChunkSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSink")
            .field("attached", &self.emit.is_some())
            .finish()
    }
}

/// Everything a backend needs to run one execution
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Execution being run
    pub execution_id: ExecutionId,
    /// Submitted options
    pub options: Arc<ExecutionOptions>,
    /// Resolved profile
    pub profile: &'static LanguageProfile,
    /// Effective wall-clock budget
    pub timeout: Duration,
    /// Effective memory ceiling in bytes
    pub memory_limit_bytes: u64,
    /// Output ceiling in bytes
    pub max_output_bytes: usize,
    /// Cancelled when the caller cancels the execution
    pub cancel: CancellationToken,
    /// Live output
    pub chunks: ChunkSink,
}

impl BackendRequest {
    /// Source code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.options.code
    }

    /// Standard input, if any
    #[must_use]
    pub fn input(&self) -> Option<&str> {
        self.options.input.as_deref()
    }
}

/// Terminal result of one backend invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutcome {
    /// Terminal status
    pub status: ExecutionStatus,
    /// Failure classification, `None` when completed
    pub failure: Option<FailureKind>,
    /// Error message
    pub error: Option<String>,
    /// Captured output, best effort on failure
    pub output: String,
    /// Exit code, when the code ran to an exit
    pub exit_code: Option<i64>,
    /// Memory used (peak or ceiling approximation)
    pub memory_used_bytes: u64,
}

impl BackendOutcome {
    /// Normal completion.
    ///
    /// A non-zero exit code is reported as a `RuntimeError`.
    #[must_use]
    pub fn completed(output: String, exit_code: i64, memory_used_bytes: u64) -> Self {
        if exit_code != 0 {
            return Self {
                exit_code: Some(exit_code),
                memory_used_bytes,
                ..Self::failed(
                    FailureKind::RuntimeError,
                    format!("process exited with code {exit_code}"),
                    output,
                )
            };
        }
        Self {
            status: ExecutionStatus::Completed,
            failure: None,
            error: None,
            output,
            exit_code: Some(0),
            memory_used_bytes,
        }
    }

    /// Failure with best-effort partial output
    #[must_use]
    pub fn failed(kind: FailureKind, message: impl Into<String>, output: String) -> Self {
        Self {
            status: ExecutionStatus::for_failure(kind),
            failure: Some(kind),
            error: Some(message.into()),
            output,
            exit_code: None,
            memory_used_bytes: 0,
        }
    }

    /// Attach memory usage
    #[must_use]
    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory_used_bytes = bytes;
        self
    }

    /// Outcome for a backend that could not run at all
    #[must_use]
    pub fn from_error(err: &BackendError) -> Self {
        Self::failed(err.kind(), err.to_string(), String::new())
    }
}

/// An isolation backend
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Which profiles this backend runs
    fn isolation(&self) -> IsolationKind;

    /// Run one execution to a terminal outcome.
    ///
    /// Resources acquired for the execution must be released before this
    /// returns, on every path.
    ///
    /// # Errors
    ///
    /// Returns error when no outcome can be produced (unsupported transform,
    /// missing environment, internal failure)
    async fn execute(&self, request: BackendRequest) -> Result<BackendOutcome, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_completed_zero_exit() {
        let outcome = BackendOutcome::completed("ok".to_string(), 0, 10);
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert_eq!(outcome.failure, None);
        assert_eq!(outcome.exit_code, Some(0));
    }

    #[test]
    fn test_completed_nonzero_exit_is_error() {
        let outcome = BackendOutcome::completed("main.c:1: error".to_string(), 1, 10);
        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert_eq!(outcome.failure, Some(FailureKind::RuntimeError));
        assert_eq!(outcome.exit_code, Some(1));
        assert_eq!(outcome.memory_used_bytes, 10);
        assert_eq!(outcome.output, "main.c:1: error");
    }

    #[test]
    fn test_failed_status_mapping() {
        let outcome = BackendOutcome::failed(FailureKind::Timeout, "too slow", String::new());
        assert_eq!(outcome.status, ExecutionStatus::Timeout);
        let outcome = BackendOutcome::from_error(&BackendError::EnvironmentUnavailable {
            reason: "no daemon".to_string(),
        });
        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert_eq!(outcome.failure, Some(FailureKind::EnvironmentUnavailable));
    }

    #[test]
    fn test_chunk_sink_forwards() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let sink = ChunkSink::new(move |chunk| captured.lock().unwrap().push(chunk));
        sink.emit(b"abc");
        sink.emit(b"");
        assert_eq!(seen.lock().unwrap().len(), 1);

        ChunkSink::discard().emit(b"dropped");
    }
}
