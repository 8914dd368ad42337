//! Order-side cache state
//!
//! `PendingOrderCache` tracks, per sender, the orders that still have an
//! outstanding transaction. It carries no TTL: an expired entry would send
//! every unrelated mined transaction of that sender to the repository.
//! `OrderQueryCache` memoizes order query pages and is invalidated per owner.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use storage::keys::{self, ORDER_QUERY_PREFIX};
use storage::{Cache, NO_EXPIRY};
use tracing::debug;
use types::errors::{CacheError, RelayError, RelayResult};
use types::ids::{Address, OrderHash};

#[derive(Clone)]
pub struct PendingOrderCache {
    cache: Arc<dyn Cache>,
}

impl PendingOrderCache {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    pub async fn exists(&self, owner: &Address, order_hash: &OrderHash) -> RelayResult<bool> {
        let key = keys::pending_order_set(owner);
        Ok(self.cache.sismember(&key, &order_hash.to_hex()).await?)
    }

    pub async fn add(&self, owner: &Address, order_hash: &OrderHash) -> RelayResult<()> {
        let key = keys::pending_order_set(owner);
        self.cache
            .sadd(&key, NO_EXPIRY, &[order_hash.to_hex()])
            .await?;
        Ok(())
    }

    pub async fn remove(&self, owner: &Address, order_hash: &OrderHash) -> RelayResult<()> {
        let key = keys::pending_order_set(owner);
        self.cache.srem(&key, &order_hash.to_hex()).await?;
        Ok(())
    }

    /// Orders with outstanding transactions sent by `owner`
    pub async fn members(&self, owner: &Address) -> RelayResult<Vec<OrderHash>> {
        let key = keys::pending_order_set(owner);
        if !self.cache.exists(&key).await? {
            return Ok(Vec::new());
        }

        let members = self.cache.smembers(&key).await?;
        members
            .iter()
            .map(|member| {
                member.parse::<OrderHash>().map_err(|err| {
                    RelayError::from(CacheError::Malformed {
                        key: key.clone(),
                        reason: err.to_string(),
                    })
                })
            })
            .collect()
    }
}

/// Memoized order query pages under the `ORDER_` prefix
#[derive(Clone)]
pub struct OrderQueryCache {
    cache: Arc<dyn Cache>,
    ttl_secs: u64,
}

impl OrderQueryCache {
    pub fn new(cache: Arc<dyn Cache>, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    /// Cached page for `key`, if any
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> RelayResult<Option<T>> {
        let full_key = keys::query(ORDER_QUERY_PREFIX, key);
        let Some(bytes) = self.cache.get(&full_key).await? else {
            return Ok(None);
        };
        let page = serde_json::from_slice(&bytes).map_err(|err| CacheError::Malformed {
            key: full_key.clone(),
            reason: err.to_string(),
        })?;
        debug!(key = %full_key, "Order query served from cache");
        Ok(Some(page))
    }

    pub async fn save<T: Serialize>(&self, key: &str, page: &T) -> RelayResult<()> {
        let full_key = keys::query(ORDER_QUERY_PREFIX, key);
        let bytes = serde_json::to_vec(page).map_err(|err| CacheError::Malformed {
            key: full_key.clone(),
            reason: err.to_string(),
        })?;
        self.cache.set(&full_key, bytes, self.ttl_secs).await?;
        debug!(key = %full_key, ttl = self.ttl_secs, "Order query cached");
        Ok(())
    }

    /// Drop every cached page of the given owners
    pub async fn del_by_owners(&self, owners: &[Address]) -> RelayResult<u64> {
        let mut stale = Vec::new();
        for owner in owners {
            let pattern = keys::owner_query_pattern(ORDER_QUERY_PREFIX, owner);
            stale.extend(self.cache.keys(&pattern).await?);
        }
        if stale.is_empty() {
            return Ok(0);
        }
        for key in &stale {
            debug!(key = %key, "Clearing order query cache");
        }
        Ok(self.cache.dels(&stale).await?)
    }
}
