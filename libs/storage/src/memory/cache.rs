use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;
use types::errors::CacheError;

use crate::cache::{Cache, CacheResult, NO_EXPIRY};

/// Configuration for the in-memory cache
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryCacheConfig {
    /// Live keys allowed before new keys are refused
    pub max_keys: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self { max_keys: 100_000 }
    }
}

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

fn expiry(ttl_secs: u64) -> Option<Instant> {
    (ttl_secs != NO_EXPIRY).then(|| Instant::now() + Duration::from_secs(ttl_secs))
}

/// Cache backed by a concurrent map
///
/// Expiry uses tokio's clock, so paused-time tests can advance past TTLs.
/// Expired entries are dropped lazily on access.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    unavailable: AtomicBool,
    config: MemoryCacheConfig,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            unavailable: AtomicBool::new(false),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MemoryCacheConfig::default())
    }

    /// Make every subsequent call fail with `CacheError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory cache switched off".into()));
        }
        Ok(())
    }

    fn purge_if_expired(&self, key: &str) {
        let now = Instant::now();
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
    }

    fn ensure_capacity(&self, key: &str) -> CacheResult<()> {
        if self.entries.contains_key(key) || self.entries.len() < self.config.max_keys {
            return Ok(());
        }
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
        if self.entries.len() < self.config.max_keys {
            Ok(())
        } else {
            Err(CacheError::Unavailable(format!(
                "memory cache full ({} keys)",
                self.config.max_keys
            )))
        }
    }

    fn malformed(key: &str, reason: &str) -> CacheError {
        CacheError::Malformed {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn matches_pattern(key: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn sadd(&self, key: &str, ttl_secs: u64, members: &[String]) -> CacheResult<()> {
        self.check()?;
        self.purge_if_expired(key);
        self.ensure_capacity(key)?;

        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Set(BTreeSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Set(set) => set.extend(members.iter().cloned()),
            Value::Bytes(_) => return Err(Self::malformed(key, "not a set")),
        }
        if ttl_secs != NO_EXPIRY {
            entry.expires_at = expiry(ttl_secs);
        }
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> CacheResult<()> {
        self.check()?;
        self.purge_if_expired(key);

        let emptied = match self.entries.get_mut(key) {
            Some(mut entry) => match &mut entry.value {
                Value::Set(set) => {
                    set.remove(member);
                    set.is_empty()
                }
                Value::Bytes(_) => return Err(Self::malformed(key, "not a set")),
            },
            None => false,
        };
        if emptied {
            self.entries.remove(key);
            debug!(key, "Removed empty cache set");
        }
        Ok(())
    }

    async fn sismember(&self, key: &str, member: &str) -> CacheResult<bool> {
        self.check()?;
        self.purge_if_expired(key);

        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.contains(member)),
                Value::Bytes(_) => Err(Self::malformed(key, "not a set")),
            },
            None => Ok(false),
        }
    }

    async fn smembers(&self, key: &str) -> CacheResult<Vec<String>> {
        self.check()?;
        self.purge_if_expired(key);

        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                Value::Bytes(_) => Err(Self::malformed(key, "not a set")),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.check()?;
        self.purge_if_expired(key);
        Ok(self.entries.contains_key(key))
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check()?;
        self.purge_if_expired(key);

        match self.entries.get(key) {
            Some(entry) => match &entry.value {
                Value::Bytes(bytes) => Ok(Some(bytes.clone())),
                Value::Set(_) => Err(Self::malformed(key, "not a plain value")),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> CacheResult<()> {
        self.check()?;
        self.purge_if_expired(key);
        self.ensure_capacity(key)?;

        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value),
                expires_at: expiry(ttl_secs),
            },
        );
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.check()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_live(now) && matches_pattern(e.key(), pattern))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn dels(&self, keys: &[String]) -> CacheResult<u64> {
        self.check()?;
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(key) {
                if entry.is_live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }
}
