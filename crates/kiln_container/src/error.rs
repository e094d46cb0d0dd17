//! Container backend errors.

use kiln_core::BackendError;

/// Errors raised while driving a unit
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The container runtime cannot be reached
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// The image is missing and could not be pulled
    #[error("image {image} unavailable: {reason}")]
    ImageUnavailable {
        /// Image reference
        image: String,
        /// Reason
        reason: String,
    },

    /// The unit does not exist (already removed)
    #[error("unit {0} not found")]
    NotFound(String),

    /// Any other runtime API failure
    #[error("container runtime error: {0}")]
    Runtime(String),

    /// Workspace could not be prepared
    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),
}

impl ContainerError {
    /// Whether the failure means the environment cannot host the execution
    #[must_use]
    pub fn is_environment(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::ImageUnavailable { .. })
    }

    /// Map onto the backend contract
    #[must_use]
    pub fn into_backend(self) -> BackendError {
        if self.is_environment() {
            BackendError::EnvironmentUnavailable {
                reason: self.to_string(),
            }
        } else {
            BackendError::internal(self)
        }
    }
}
