//! Host configuration.

use amxkit_common::limits::{
    DEFAULT_MAX_HANDLES, DEFAULT_MAX_VARS, MAX_NAME_LENGTH, MAX_POOL_SLOTS,
};

/// Tunables for a [`Natives`](crate::Natives) set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Capacity of the variable reference pool.
    pub max_vars: usize,
    /// Capacity of the handle pool.
    pub max_handles: usize,
    /// Longest string read from script memory (names, formats).
    pub max_name_length: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_vars: DEFAULT_MAX_VARS,
            max_handles: DEFAULT_MAX_HANDLES,
            max_name_length: MAX_NAME_LENGTH,
        }
    }
}

impl HostConfig {
    /// Set the variable pool capacity, clamped to what ids can address.
    pub fn with_max_vars(mut self, max: usize) -> Self {
        self.max_vars = max.min(MAX_POOL_SLOTS);
        self
    }

    /// Set the handle pool capacity, clamped to what ids can address.
    pub fn with_max_handles(mut self, max: usize) -> Self {
        self.max_handles = max.min(MAX_POOL_SLOTS);
        self
    }

    pub fn with_max_name_length(mut self, max: usize) -> Self {
        self.max_name_length = max;
        self
    }
}
