//! Key-value cache interface
//!
//! A Redis-shaped surface: plain values with TTL, unordered string sets,
//! and prefix key listing for bulk invalidation. Entries are advisory and
//! may vanish at any time.

use async_trait::async_trait;
use types::errors::CacheError;

pub type CacheResult<T> = Result<T, CacheError>;

/// TTL value meaning "no expiry"
pub const NO_EXPIRY: u64 = 0;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Add members to the set at `key`. A non-zero `ttl_secs` (re)arms the
    /// key's expiry.
    async fn sadd(&self, key: &str, ttl_secs: u64, members: &[String]) -> CacheResult<()>;

    async fn srem(&self, key: &str, member: &str) -> CacheResult<()>;

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool>;

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> CacheResult<()>;

    /// Keys matching `pattern`; a trailing `*` matches any suffix
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Returns the number of keys removed
    async fn dels(&self, keys: &[String]) -> CacheResult<u64>;
}
