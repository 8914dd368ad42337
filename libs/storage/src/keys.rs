//! Cache key layout
//!
//! Bookkeeping keys use lower-case prefixes and the `0x` hex form of the
//! owner or hash. Query-result keys are upper-cased so that per-owner
//! invalidation can match them with a single prefix pattern.

use types::ids::{Address, TxHash};
use types::transaction::NonceClass;

pub const PENDING_ORDER_PREFIX: &str = "om_pending_ordertx_";
pub const FILL_OWNER_PREFIX: &str = "txm_fill_owner_";
pub const NONCE_ANY_PREFIX: &str = "txm_nonce_any_";
pub const NONCE_MINED_PREFIX: &str = "txm_nonce_mined_";

pub const ORDER_QUERY_PREFIX: &str = "ORDER_";
pub const TXVIEW_QUERY_PREFIX: &str = "TXVIEW_";
pub const FILL_QUERY_PREFIX: &str = "FILL_";

/// Set of order hashes with outstanding transactions sent by `owner`
pub fn pending_order_set(owner: &Address) -> String {
    format!("{}{}", PENDING_ORDER_PREFIX, owner)
}

/// Set of order owners that took part in the fills of `tx_hash`
pub fn fill_owner_set(tx_hash: &TxHash) -> String {
    format!("{}{}", FILL_OWNER_PREFIX, tx_hash)
}

pub fn nonce_watermark(owner: &Address, class: NonceClass) -> String {
    let prefix = match class {
        NonceClass::Any => NONCE_ANY_PREFIX,
        NonceClass::Mined => NONCE_MINED_PREFIX,
    };
    format!("{}{}", prefix, owner)
}

/// Cached query result under `prefix`
pub fn query(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key).to_uppercase()
}

/// Query key scoped to one owner; `rest` distinguishes pages and filters
pub fn owner_query(prefix: &str, owner: &Address, rest: &str) -> String {
    query(prefix, &format!("OWNER:{}{}", owner, rest))
}

/// Pattern matching every query result cached for `owner`
pub fn owner_query_pattern(prefix: &str, owner: &Address) -> String {
    format!("{}*", owner_query(prefix, owner, ""))
}
