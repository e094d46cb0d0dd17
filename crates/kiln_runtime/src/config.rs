//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orchestrator limits and defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum concurrently running executions
    pub max_concurrent: usize,
    /// Timeout applied when the caller sets none
    pub default_timeout_ms: u64,
    /// Largest timeout a caller may ask for
    pub max_timeout_ms: u64,
    /// Memory ceiling applied when the caller sets none
    pub default_memory_limit_mb: u64,
    /// Largest memory ceiling a caller may ask for
    pub max_memory_limit_mb: u64,
    /// Output ceiling per execution
    pub max_output_bytes: usize,
    /// Lifecycle event buffer per subscriber
    pub event_capacity: usize,
}

impl EngineConfig {
    /// Create a new engine config
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_concurrent: 8,
            default_timeout_ms: 10_000,
            max_timeout_ms: 60_000,
            default_memory_limit_mb: 256,
            max_memory_limit_mb: 4096,
            max_output_bytes: kiln_core::DEFAULT_OUTPUT_CEILING,
            event_capacity: 1024,
        }
    }

    /// Set the concurrency bound
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the default timeout
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the maximum timeout
    #[must_use]
    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the largest memory ceiling in MiB
    #[must_use]
    pub fn with_max_memory_limit_mb(mut self, mb: u64) -> Self {
        self.max_memory_limit_mb = mb;
        self
    }

    /// Set the output ceiling
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Default timeout
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Maximum timeout
    #[must_use]
    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
