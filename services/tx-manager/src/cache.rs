//! Transaction-side cache state
//!
//! - Fill-owner markers: which order owners took part in a ring
//!   settlement, so the ring's token transfers do not show up twice
//! - Nonce watermarks: highest nonce seen per owner, for any status and for
//!   mined transactions only
//! - Query caches for transaction views (`TXVIEW_`) and fills (`FILL_`)

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use storage::keys;
use storage::{Cache, NO_EXPIRY};
use tokio::sync::Mutex;
use tracing::debug;
use types::errors::{CacheError, RelayResult};
use types::ids::{Address, TxHash};
use types::transaction::NonceClass;

#[derive(Clone)]
pub struct FillOwnerCache {
    cache: Arc<dyn Cache>,
    ttl_secs: u64,
}

impl FillOwnerCache {
    pub fn new(cache: Arc<dyn Cache>, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    pub async fn mark(&self, tx_hash: &TxHash, owner: &Address) -> RelayResult<()> {
        let key = keys::fill_owner_set(tx_hash);
        self.cache
            .sadd(&key, self.ttl_secs, &[owner.to_hex()])
            .await?;
        Ok(())
    }

    pub async fn is_marked(&self, tx_hash: &TxHash, owner: &Address) -> RelayResult<bool> {
        let key = keys::fill_owner_set(tx_hash);
        Ok(self.cache.sismember(&key, &owner.to_hex()).await?)
    }
}

/// Per-owner nonce watermarks
///
/// Advances are serialized so concurrent handlers cannot lower a mark.
pub struct NonceWatermarks {
    cache: Arc<dyn Cache>,
    advance_lock: Mutex<()>,
}

impl NonceWatermarks {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            advance_lock: Mutex::new(()),
        }
    }

    pub async fn get(&self, owner: &Address, class: NonceClass) -> RelayResult<Option<u64>> {
        let key = keys::nonce_watermark(owner, class);
        let Some(bytes) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&bytes);
        let nonce = text.parse::<u64>().map_err(|err| CacheError::Malformed {
            key: key.clone(),
            reason: err.to_string(),
        })?;
        Ok(Some(nonce))
    }

    /// Raise the mark to `nonce` if it is strictly greater
    ///
    /// Returns true when the mark moved.
    pub async fn advance(&self, owner: &Address, class: NonceClass, nonce: u64) -> RelayResult<bool> {
        let _guard = self.advance_lock.lock().await;
        if let Some(current) = self.get(owner, class).await? {
            if nonce <= current {
                return Ok(false);
            }
        }
        let key = keys::nonce_watermark(owner, class);
        self.cache
            .set(&key, nonce.to_string().into_bytes(), NO_EXPIRY)
            .await?;
        debug!(owner = %owner, class = ?class, nonce, "Nonce watermark advanced");
        Ok(true)
    }

    /// Force the mark to `nonce`, lowering it if needed; `None` clears it
    pub async fn reset(&self, owner: &Address, class: NonceClass, nonce: Option<u64>) -> RelayResult<()> {
        let _guard = self.advance_lock.lock().await;
        let key = keys::nonce_watermark(owner, class);
        match nonce {
            Some(nonce) => {
                self.cache
                    .set(&key, nonce.to_string().into_bytes(), NO_EXPIRY)
                    .await?;
            }
            None => {
                self.cache.dels(&[key]).await?;
            }
        }
        debug!(owner = %owner, class = ?class, nonce = ?nonce, "Nonce watermark reset");
        Ok(())
    }
}

/// Memoized query pages under one prefix, invalidated per owner
#[derive(Clone)]
pub struct QueryCache {
    cache: Arc<dyn Cache>,
    prefix: &'static str,
    ttl_secs: u64,
}

impl QueryCache {
    pub fn new(cache: Arc<dyn Cache>, prefix: &'static str, ttl_secs: u64) -> Self {
        Self {
            cache,
            prefix,
            ttl_secs,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> RelayResult<Option<T>> {
        let full_key = keys::query(self.prefix, key);
        let Some(bytes) = self.cache.get(&full_key).await? else {
            return Ok(None);
        };
        let page = serde_json::from_slice(&bytes).map_err(|err| CacheError::Malformed {
            key: full_key.clone(),
            reason: err.to_string(),
        })?;
        debug!(key = %full_key, "Query served from cache");
        Ok(Some(page))
    }

    pub async fn save<T: Serialize>(&self, key: &str, page: &T) -> RelayResult<()> {
        let full_key = keys::query(self.prefix, key);
        let bytes = serde_json::to_vec(page).map_err(|err| CacheError::Malformed {
            key: full_key.clone(),
            reason: err.to_string(),
        })?;
        self.cache.set(&full_key, bytes, self.ttl_secs).await?;
        debug!(key = %full_key, ttl = self.ttl_secs, "Query cached");
        Ok(())
    }

    pub async fn del_by_owners(&self, owners: &[Address]) -> RelayResult<u64> {
        let mut stale = Vec::new();
        for owner in owners {
            let pattern = keys::owner_query_pattern(self.prefix, owner);
            stale.extend(self.cache.keys(&pattern).await?);
        }
        if stale.is_empty() {
            return Ok(0);
        }
        debug!(prefix = self.prefix, keys = stale.len(), "Clearing query cache");
        Ok(self.cache.dels(&stale).await?)
    }
}
