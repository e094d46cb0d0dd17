//! Fuel budget.
//!
//! Fuel bounds the number of instructions a guest may retire, on top of
//! the wall-clock budget enforced through epoch interruption. It is off by
//! default; a deployment that wants deterministic cut-offs sets
//! `max_fuel`.

use wasmtime::Store;

/// Optional instruction budget for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FuelBudget {
    /// Fuel granted, `None` disables metering
    limit: Option<u64>,
}

impl FuelBudget {
    /// Create a budget
    #[must_use]
    pub fn new(limit: Option<u64>) -> Self {
        Self { limit }
    }

    /// Metering disabled
    #[must_use]
    pub fn unmetered() -> Self {
        Self::default()
    }

    /// Whether the engine must be built with fuel consumption on
    #[must_use]
    pub fn is_metered(&self) -> bool {
        self.limit.is_some()
    }

    /// Fuel granted
    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    /// Fill the store's tank
    ///
    /// # Errors
    ///
    /// Returns error if the engine was not built with fuel consumption on
    pub fn install<T>(&self, store: &mut Store<T>) -> wasmtime::Result<()> {
        if let Some(limit) = self.limit {
            store.set_fuel(limit)?;
        }
        Ok(())
    }

    /// Fuel burnt so far, `None` when unmetered
    #[must_use]
    pub fn consumed<T>(&self, store: &Store<T>) -> Option<u64> {
        let limit = self.limit?;
        let remaining = store.get_fuel().ok()?;
        Some(limit.saturating_sub(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::{Config, Engine};

    #[test]
    fn test_unmetered_is_noop() {
        let budget = FuelBudget::unmetered();
        assert!(!budget.is_metered());
        let mut store = Store::new(&Engine::default(), ());
        assert!(budget.install(&mut store).is_ok());
        assert_eq!(budget.consumed(&store), None);
    }

    #[test]
    fn test_metered_store_starts_full() {
        let budget = FuelBudget::new(Some(1_000));
        let mut config = Config::new();
        config.consume_fuel(true);
        let engine = Engine::new(&config).unwrap();
        let mut store = Store::new(&engine, ());
        budget.install(&mut store).unwrap();
        assert_eq!(budget.consumed(&store), Some(0));
    }
}
