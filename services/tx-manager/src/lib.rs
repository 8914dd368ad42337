//! Transaction Manager Service
//!
//! Persists every chain transaction as one canonical entity plus per-owner
//! views, keeps pending and mined records consistent for the same sender
//! nonce, and rolls state back when the chain forks.
//!
//! # Modules
//! - `convert`: Event to entity/view conversion
//! - `cache`: Fill-owner markers, nonce watermarks and query caches
//! - `manager`: Subscriptions, save paths and fork handling

pub mod cache;
pub mod config;
pub mod convert;
pub mod manager;

pub use config::TxManagerConfig;
pub use convert::{pack_fill_log_index, Converted};
pub use manager::{ForkReport, SaveOutcome, TxManager, TxManagerDeps};
