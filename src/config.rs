//! Construction-time configuration for a [`crate::Fib`].

use std::time::Duration;

use crate::key::AddressFamily;
use crate::table::DEFAULT_HASH_ORDER;

const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(30);

/// Parameters fixed for the lifetime of a `Fib`.
#[derive(Debug, Clone)]
pub struct FibConfig {
    /// Address family stored in this table. Purely descriptive: it doesn't
    /// change behavior, but shows up in diagnostics and lets callers keep
    /// several `Fib`s straight.
    pub family: AddressFamily,
    /// log2 of the initial bucket count. `0` means "use the default".
    pub hash_order: u32,
    /// How often the background reclaimer sweeps the retired list.
    pub reclaim_interval: Duration,
}

impl FibConfig {
    /// A config for `family` with the default bucket count and reclaim
    /// interval.
    pub fn new(family: AddressFamily) -> Self {
        FibConfig {
            family,
            hash_order: 0,
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
        }
    }

    /// Overrides the initial bucket count (`0` restores the default).
    pub fn with_hash_order(mut self, hash_order: u32) -> Self {
        self.hash_order = hash_order;
        self
    }

    /// Overrides how often the background reclaimer sweeps the retired
    /// list.
    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    pub(crate) fn resolved_hash_order(&self) -> u32 {
        if self.hash_order == 0 {
            DEFAULT_HASH_ORDER
        } else {
            self.hash_order
        }
    }
}
