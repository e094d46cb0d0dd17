//! Concurrency governor.
//!
//! Bounds the number of running executions. Acquisition never waits: a
//! saturated governor rejects immediately and the caller sees
//! `CapacityExceeded`. Slots are returned when the [`Permit`] drops, so every
//! exit path of an execution releases its slot.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Fail-fast bound on concurrent executions
#[derive(Debug, Clone)]
pub struct ConcurrencyGovernor {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One execution slot, released on drop
#[derive(Debug)]
pub struct Permit {
    _slot: OwnedSemaphorePermit,
}

impl ConcurrencyGovernor {
    /// Create a governor with `capacity` slots
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a slot if one is free
    #[must_use]
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|slot| Permit { _slot: slot })
    }

    /// Total slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots in use
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    /// Whether no slot is free
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.available() == 0
    }
}
