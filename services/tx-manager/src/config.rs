use serde::Deserialize;

/// Transaction manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TxManagerConfig {
    /// Seconds a fill-owner marker is retained
    pub fill_owner_ttl: u64,
    /// TTL in seconds of cached transaction-view query pages
    pub view_cache_ttl: u64,
    /// TTL in seconds of cached fill query pages
    pub fill_cache_ttl: u64,
}

impl Default for TxManagerConfig {
    fn default() -> Self {
        Self {
            fill_owner_ttl: 864_000,
            view_cache_ttl: 3600,
            fill_cache_ttl: 3600,
        }
    }
}
