use serde::Deserialize;

/// Order manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrderManagerConfig {
    /// TTL in seconds of cached order query pages
    pub order_cache_ttl: u64,
}

impl Default for OrderManagerConfig {
    fn default() -> Self {
        Self {
            order_cache_ttl: 3600,
        }
    }
}
