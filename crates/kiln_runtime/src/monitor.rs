//! Engine telemetry.

use kiln_core::{Execution, ExecutionStatus, FailureKind};
use serde::{Deserialize, Serialize};

/// Counters over the engine's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Submissions accepted
    pub submitted: u64,
    /// Submissions rejected (capacity or validation)
    pub rejected: u64,
    /// Executions completed with exit code zero
    pub completed: u64,
    /// Executions finalized as `Error`
    pub errored: u64,
    /// Executions finalized as `Timeout`
    pub timed_out: u64,
    /// Executions cancelled
    pub cancelled: u64,
    /// Executions stopped by the output ceiling
    pub output_limited: u64,
    /// Records evicted
    pub evicted: u64,
    /// Executions holding a slot right now
    pub running: u64,
}

impl EngineStats {
    /// Create new stats
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted submission
    pub fn record_submit(&mut self) {
        self.submitted += 1;
    }

    /// Record a rejected submission
    pub fn record_rejection(&mut self) {
        self.rejected += 1;
    }

    /// Record a terminal record
    pub fn record_terminal(&mut self, execution: &Execution) {
        match execution.status {
            ExecutionStatus::Completed => self.completed += 1,
            ExecutionStatus::Error => {
                self.errored += 1;
                if execution.error_kind == Some(FailureKind::OutputLimitExceeded) {
                    self.output_limited += 1;
                }
            }
            ExecutionStatus::Timeout => self.timed_out += 1,
            ExecutionStatus::Cancelled => self.cancelled += 1,
            ExecutionStatus::Running => {}
        }
    }

    /// Record evicted records
    pub fn record_eviction(&mut self, count: usize) {
        self.evicted += count as u64;
    }

    /// Executions that reached a terminal status
    #[must_use]
    pub fn finished(&self) -> u64 {
        self.completed + self.errored + self.timed_out + self.cancelled
    }

    /// Get success rate (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let finished = self.finished();
        if finished == 0 {
            return 1.0;
        }
        self.completed as f64 / finished as f64
    }
}
