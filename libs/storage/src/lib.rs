//! Storage collaborators for the relay core
//!
//! The relational repository and the key-value cache are external systems;
//! this crate defines the interfaces both engines consume, the cache key
//! layout they share, and in-memory implementations used in tests.
//!
//! # Modules
//! - `repository`: Order, pending order-tx and transaction tables
//! - `cache`: Redis-shaped key-value interface
//! - `keys`: Cache key layout
//! - `policy`: Unlock policy and view notification sink
//! - `memory`: In-memory repository and cache

pub mod cache;
pub mod keys;
pub mod memory;
pub mod policy;
pub mod repository;

pub use cache::{Cache, CacheResult, NO_EXPIRY};
pub use memory::{MemoryCache, MemoryCacheConfig, MemoryRepository};
pub use policy::{BroadcastNotifier, NotificationSink, StaticUnlockPolicy, UnlockPolicy};
pub use repository::{OrderRepository, OrderTxRepository, RepoResult, TxRepository};
