//! Guest memory ceiling.
//!
//! [`GuestLimits`] is installed as the store's resource limiter. Every
//! linear-memory growth, including the initial allocation at instantiation,
//! passes through it; growth past the ceiling traps the guest with
//! [`MemoryExhausted`].

use wasmtime::ResourceLimiter;

/// WebAssembly page size in bytes
pub const WASM_PAGE_SIZE: u64 = 64 * 1024;

/// Default table ceiling, in elements
pub const DEFAULT_MAX_TABLE_ELEMENTS: usize = 10_000;

/// Round a byte count up to whole pages
#[must_use]
pub const fn bytes_to_pages(bytes: u64) -> u64 {
    bytes.div_ceil(WASM_PAGE_SIZE)
}

/// Trap raised when the guest asks for more memory than it may have
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("memory limit of {limit} bytes exceeded: guest requested {requested} bytes")]
pub struct MemoryExhausted {
    /// Ceiling in bytes
    pub limit: u64,
    /// Requested linear memory size in bytes
    pub requested: u64,
}

/// Per-store limits and peak tracking
#[derive(Debug, Clone)]
pub struct GuestLimits {
    /// Linear memory ceiling in bytes
    max_memory_bytes: u64,
    /// Table ceiling in elements
    max_table_elements: usize,
    /// Largest linear memory size granted so far
    peak_memory_bytes: u64,
}

impl GuestLimits {
    /// Create limits for one invocation
    #[must_use]
    pub fn new(max_memory_bytes: u64, max_table_elements: usize) -> Self {
        Self {
            max_memory_bytes,
            max_table_elements,
            peak_memory_bytes: 0,
        }
    }

    /// Memory ceiling in bytes
    #[must_use]
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_bytes
    }

    /// Memory ceiling in whole pages, rounded down
    #[must_use]
    pub fn max_pages(&self) -> u64 {
        self.max_memory_bytes / WASM_PAGE_SIZE
    }

    /// Largest linear memory granted
    #[must_use]
    pub fn peak_memory_bytes(&self) -> u64 {
        self.peak_memory_bytes
    }

    /// Whether a linear memory of `bytes` fits under the ceiling
    #[must_use]
    pub fn within_limit(&self, bytes: u64) -> bool {
        bytes <= self.max_memory_bytes
    }
}

impl ResourceLimiter for GuestLimits {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        let desired = desired as u64;
        if !self.within_limit(desired) {
            return Err(MemoryExhausted {
                limit: self.max_memory_bytes,
                requested: desired,
            }
            .into());
        }
        self.peak_memory_bytes = self.peak_memory_bytes.max(desired);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        Ok(desired <= self.max_table_elements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_bytes_to_pages() {
        assert_eq!(bytes_to_pages(0), 0);
        assert_eq!(bytes_to_pages(WASM_PAGE_SIZE), 1);
        assert_eq!(bytes_to_pages(WASM_PAGE_SIZE + 1), 2);
    }

    #[test]
    fn test_growth_within_limit_tracks_peak() {
        let mut limits = GuestLimits::new(4 * WASM_PAGE_SIZE, DEFAULT_MAX_TABLE_ELEMENTS);
        assert_eq!(limits.max_pages(), 4);
        assert!(limits.memory_growing(0, 65_536, None).unwrap());
        assert!(limits.memory_growing(65_536, 3 * 65_536, None).unwrap());
        assert_eq!(limits.peak_memory_bytes(), 3 * WASM_PAGE_SIZE);
    }

    #[test]
    fn test_growth_past_limit_traps() {
        let mut limits = GuestLimits::new(WASM_PAGE_SIZE, DEFAULT_MAX_TABLE_ELEMENTS);
        let err = limits.memory_growing(0, 2 * 65_536, None).unwrap_err();
        let trap = err.downcast_ref::<MemoryExhausted>().unwrap();
        assert_eq!(trap.limit, WASM_PAGE_SIZE);
        assert_eq!(trap.requested, 2 * WASM_PAGE_SIZE);
        assert_eq!(limits.peak_memory_bytes(), 0);
    }

    #[test]
    fn test_table_growth_refused_past_limit() {
        let mut limits = GuestLimits::new(WASM_PAGE_SIZE, 10);
        assert!(limits.table_growing(0, 10, None).unwrap());
        assert!(!limits.table_growing(10, 11, None).unwrap());
    }

    proptest! {
        #[test]
        fn prop_peak_never_exceeds_ceiling(
            ceiling_pages in 0u64..64,
            requests in proptest::collection::vec(0usize..128, 0..16),
        ) {
            let mut limits = GuestLimits::new(ceiling_pages * WASM_PAGE_SIZE, DEFAULT_MAX_TABLE_ELEMENTS);
            for pages in requests {
                let granted = limits.memory_growing(0, pages * 65_536, None).is_ok();
                prop_assert_eq!(granted, pages as u64 <= ceiling_pages);
                prop_assert!(limits.peak_memory_bytes() <= limits.max_memory_bytes());
            }
        }
    }
}
