//! Types library for the order/transaction relay
//!
//! Shared data model for the correlation engine and the transaction
//! manager: chain identifiers, orders and their pending transactions,
//! transaction entities and views, chain events, and the error taxonomy.
//!
//! # Modules
//! - `ids`: Addresses and hashes
//! - `order`: Order status and pending-transaction rows
//! - `transaction`: Transaction entities and per-owner views
//! - `events`: Chain event union and bus topics
//! - `errors`: Error taxonomy

pub mod ids;
pub mod order;
pub mod transaction;
pub mod events;
pub mod errors;
