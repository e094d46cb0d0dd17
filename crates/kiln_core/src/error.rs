//! Error types for KILN.
//!
//! Two families: [`SubmitError`] rejects a request before any record exists,
//! [`FailureKind`] classifies why an accepted execution ended badly.

use serde::{Deserialize, Serialize};

/// Core result type
pub type SubmitResult<T> = Result<T, SubmitError>;

/// Errors returned synchronously by the orchestrator facade
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Concurrency bound reached; retryable
    #[error("Capacity exceeded: {limit} executions already running")]
    CapacityExceeded {
        /// Configured bound
        limit: usize,
    },

    /// Language tag not in the catalog
    #[error("Unsupported language: {language}")]
    UnsupportedLanguage {
        /// Offending tag
        language: String,
    },

    /// Options failed validation
    #[error("Invalid options for {field}: {reason}")]
    InvalidOptions {
        /// Field that failed
        field: String,
        /// Why it failed
        reason: String,
    },

    /// No such execution
    #[error("Execution not found: {id}")]
    NotFound {
        /// Requested id
        id: String,
    },
}

impl SubmitError {
    /// Whether the caller may retry the same request later
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }

    /// Build an `InvalidOptions` error
    #[must_use]
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOptions {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Why a terminal execution did not complete normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// The language needs a transform the backend does not implement
    UnsupportedLanguage,
    /// Runtime or image could not be provisioned
    EnvironmentUnavailable,
    /// Wall-clock budget exhausted
    Timeout,
    /// Output ceiling crossed
    OutputLimitExceeded,
    /// The submitted code failed
    RuntimeError,
    /// Guest heap ceiling crossed
    MemoryExhausted,
    /// Cancelled by the caller
    Cancelled,
}

impl FailureKind {
    /// Infrastructure gaps, as opposed to defects in the submitted code
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::UnsupportedLanguage | Self::EnvironmentUnavailable)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::UnsupportedLanguage => "UnsupportedLanguage",
            Self::EnvironmentUnavailable => "EnvironmentUnavailable",
            Self::Timeout => "Timeout",
            Self::OutputLimitExceeded => "OutputLimitExceeded",
            Self::RuntimeError => "RuntimeError",
            Self::MemoryExhausted => "MemoryExhausted",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// A backend could not produce an outcome at all
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Language needs an unimplemented transform
    #[error("Unsupported language: {language} requires a source transform that is not available")]
    UnsupportedLanguage {
        /// Language tag
        language: String,
    },

    /// Runtime or image could not be provisioned
    #[error("Environment unavailable: {reason}")]
    EnvironmentUnavailable {
        /// Reason
        reason: String,
    },

    /// The backend itself failed
    #[error("Internal backend error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl BackendError {
    /// Failure classification recorded on the execution
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnsupportedLanguage { .. } => FailureKind::UnsupportedLanguage,
            Self::EnvironmentUnavailable { .. } => FailureKind::EnvironmentUnavailable,
            Self::Internal { .. } => FailureKind::RuntimeError,
        }
    }

    /// Build an `Internal` error
    #[must_use]
    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::Internal {
            message: message.to_string(),
        }
    }
}
