//! Order Manager Service
//!
//! Keeps order status consistent with the transactions that touch it:
//! outstanding cancels, cutoffs and ring settlements are tracked per sender
//! and the order's status is derived from the lowest-nonce one. Also hosts
//! the off-chain flex cancel and the order query cache.

pub mod cache;
pub mod config;
pub mod correlation;
pub mod status;
pub mod writer;

pub use config::OrderManagerConfig;
pub use correlation::{CorrelationEngine, CorrelationOutcome, OrderTx, OrderTxCorrelator, SweepOutcome};
pub use writer::OrderWriter;
