//! Per-pass memoisation of derived facts
//!
//! A cache lives exactly as long as its scope. Values are computed on first
//! use and never invalidated; the scope snapshot they derive from does not
//! change within a pass.

use std::sync::OnceLock;

/// Facts derived once per cluster scope
#[derive(Debug, Default)]
pub struct ClusterCache {
    is_vnet_managed: OnceLock<bool>,
}

impl ClusterCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached "is the VNet managed by this cluster", computing it on first call
    pub fn is_vnet_managed(&self, compute: impl FnOnce() -> bool) -> bool {
        *self.is_vnet_managed.get_or_init(compute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_is_vnet_managed_computed_once() {
        let cache = ClusterCache::new();
        let calls = Cell::new(0);

        let first = cache.is_vnet_managed(|| {
            calls.set(calls.get() + 1);
            true
        });
        let second = cache.is_vnet_managed(|| {
            calls.set(calls.get() + 1);
            false
        });

        assert!(first);
        assert!(second);
        assert_eq!(calls.get(), 1);
    }
}
