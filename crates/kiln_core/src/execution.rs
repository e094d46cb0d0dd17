//! Execution records and submission options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backend::BackendOutcome;
use crate::error::FailureKind;
use crate::id::ExecutionId;
use crate::language::Language;
use crate::time::Timestamp;

/// Lifecycle status of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Dispatched to a backend
    Running,
    /// Finished with exit code zero
    Completed,
    /// Failed (runtime error, environment gap, output ceiling, ...)
    Error,
    /// Wall-clock budget exhausted
    Timeout,
    /// Cancelled by the caller
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal statuses never change again
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Whether `self -> next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        matches!(self, Self::Running) && next.is_terminal()
    }

    /// Status a failure kind terminates in
    #[must_use]
    pub const fn for_failure(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Timeout => Self::Timeout,
            FailureKind::Cancelled => Self::Cancelled,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "Running",
            Self::Completed => "Completed",
            Self::Error => "Error",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// What the caller submits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    /// Source code
    pub code: String,
    /// Language tag
    pub language: Language,
    /// Wall-clock budget, in milliseconds on the wire
    #[serde(default, with = "millis", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Memory ceiling in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
    /// Standard input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

impl ExecutionOptions {
    /// Create options with defaults for everything but code and language
    #[must_use]
    pub fn new(language: Language, code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language,
            timeout: None,
            memory_limit_mb: None,
            input: None,
        }
    }

    /// Set timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set memory limit in MiB
    #[must_use]
    pub fn with_memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit_mb = Some(mb);
        self
    }

    /// Set stdin
    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Companion metrics for an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    /// Dispatch time
    pub started_at: Timestamp,
    /// Finalization time
    pub ended_at: Option<Timestamp>,
    /// Peak (or ceiling-approximated) memory
    pub peak_memory_bytes: u64,
    /// Captured output size
    pub output_bytes: u64,
}

impl ExecutionMetrics {
    /// Metrics for a freshly started execution
    #[must_use]
    pub fn started(at: Timestamp) -> Self {
        Self {
            started_at: at,
            ended_at: None,
            peak_memory_bytes: 0,
            output_bytes: 0,
        }
    }
}

/// One execution request and its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    /// Identifier
    pub id: ExecutionId,
    /// Lifecycle status
    pub status: ExecutionStatus,
    /// Language
    pub language: Language,
    /// Captured output (byte-capped)
    pub output: String,
    /// Error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Failure classification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    /// Exit code, when the code ran to an exit
    pub exit_code: Option<i64>,
    /// Wall-clock runtime in milliseconds
    pub runtime_ms: u64,
    /// Memory used in bytes
    pub memory_used_bytes: u64,
    /// Creation time
    pub timestamp: Timestamp,
    /// Companion metrics
    pub metrics: ExecutionMetrics,
}

impl Execution {
    /// A new Running record
    #[must_use]
    pub fn running(id: ExecutionId, language: Language, at: Timestamp) -> Self {
        Self {
            id,
            status: ExecutionStatus::Running,
            language,
            output: String::new(),
            error: None,
            error_kind: None,
            exit_code: None,
            runtime_ms: 0,
            memory_used_bytes: 0,
            timestamp: at,
            metrics: ExecutionMetrics::started(at),
        }
    }

    /// Whether the record is terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Age of the record
    #[must_use]
    pub fn age(&self, now: Timestamp) -> Duration {
        now.duration_since(&self.timestamp)
    }

    /// Apply a backend outcome.
    ///
    /// Returns `false` and leaves the record untouched if it is already
    /// terminal.
    pub fn finish(&mut self, outcome: BackendOutcome, ended_at: Timestamp) -> bool {
        if !self.status.can_transition_to(outcome.status) {
            return false;
        }
        self.status = outcome.status;
        self.metrics.output_bytes = outcome.output.len() as u64;
        self.output = outcome.output;
        self.error = outcome.error;
        self.error_kind = outcome.failure;
        self.exit_code = outcome.exit_code;
        self.memory_used_bytes = outcome.memory_used_bytes;
        self.metrics.peak_memory_bytes = outcome.memory_used_bytes;
        self.stamp_end(ended_at);
        true
    }

    /// Mark the record Cancelled.
    ///
    /// Returns `false` if the record is already terminal.
    pub fn cancel(&mut self, at: Timestamp) -> bool {
        if !self.status.can_transition_to(ExecutionStatus::Cancelled) {
            return false;
        }
        self.status = ExecutionStatus::Cancelled;
        self.error = Some("execution cancelled".to_string());
        self.error_kind = Some(FailureKind::Cancelled);
        self.stamp_end(at);
        true
    }

    fn stamp_end(&mut self, at: Timestamp) {
        self.metrics.ended_at = Some(at);
        self.runtime_ms = at.duration_since(&self.metrics.started_at).as_millis() as u64;
    }
}
