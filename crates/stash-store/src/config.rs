//! Store configuration.

use std::time::Duration;

/// Limits and maintenance knobs for an in-memory store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of live entries
    pub max_entries: usize,
    /// Whether the expiry sweep removes entries whose TTL elapsed
    pub expiration_enabled: bool,
    /// How often the owning service should run the expiry sweep
    pub sweep_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000_000,
            expiration_enabled: true,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl StoreConfig {
    /// Creates a configuration with a custom entry cap.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries,
            ..Default::default()
        }
    }
}
