//! Order-transaction correlation engine
//!
//! Tracks the outstanding transactions of each order per sender and
//! rewrites the order's status as they are broadcast and mined. Two entry
//! points:
//! - `handle_order_related`: the transaction names an order (cancel, fill)
//! - `handle_correlated`: any other mined transaction of a sender, which may
//!   supersede that sender's outstanding order transactions by nonce
//!
//! Cutoffs name no order; `handle_cutoff` selects the owner's affected
//! orders and runs each through `handle_order_related`.
//!
//! There is no lock across calls. Each step is a keyed read or write, and
//! replaying the same transaction converges on the same rows and status.

use std::sync::Arc;

use async_trait::async_trait;
use storage::{Cache, OrderRepository, OrderTxRepository};
use tracing::{debug, info, warn};
use types::errors::{RelayError, RelayResult, RepositoryError};
use types::ids::{Address, OrderHash, TxHash};
use types::order::{FlexCancelKind, OrderPendingTransaction, OrderStatus};
use types::transaction::{TxInfo, TxStatus};

use crate::cache::{OrderQueryCache, PendingOrderCache};
use crate::config::OrderManagerConfig;
use crate::status;

/// A transaction as seen by the correlation engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTx {
    /// Transaction sender
    pub owner: Address,
    pub order_hash: OrderHash,
    pub tx_hash: TxHash,
    pub nonce: u64,
    pub tx_status: TxStatus,
    /// Status the order takes through this transaction; `None` when the
    /// transaction does not name an order
    pub order_status: Option<OrderStatus>,
}

impl OrderTx {
    /// Transaction naming `order_hash`
    pub fn related(info: &TxInfo, order_hash: OrderHash, order_status: OrderStatus) -> Self {
        Self {
            owner: info.from,
            order_hash,
            tx_hash: info.tx_hash,
            nonce: info.nonce,
            tx_status: info.status,
            order_status: Some(order_status),
        }
    }

    fn correlated(info: &TxInfo, order_hash: OrderHash) -> Self {
        Self {
            owner: info.from,
            order_hash,
            tx_hash: info.tx_hash,
            nonce: info.nonce,
            tx_status: info.status,
            order_status: None,
        }
    }
}

/// Result of handling one order transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// Persisted status changed
    StatusChanged(OrderStatus),
    /// Nothing to change
    Unchanged,
    /// The pending row already existed; status re-checked only
    Duplicate,
}

/// Result of sweeping a sender's pending orders after a mined transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Transaction not mined yet
    Ignored,
    Swept {
        orders: usize,
        changed: usize,
        failed: usize,
    },
}

/// Orders a pending cutoff moves to `CutoffIng`
const CUTOFF_OPEN: &[OrderStatus] = &[
    OrderStatus::New,
    OrderStatus::PartiallyFilled,
    OrderStatus::Pending,
];

/// Orders a mined cutoff settles
const CUTOFF_OUTSTANDING: &[OrderStatus] = &[
    OrderStatus::New,
    OrderStatus::PartiallyFilled,
    OrderStatus::Pending,
    OrderStatus::Cancelling,
    OrderStatus::CutoffIng,
];

/// Seam between the transaction manager and order bookkeeping
#[async_trait]
pub trait OrderTxCorrelator: Send + Sync {
    async fn handle_order_related(&self, tx: &OrderTx) -> RelayResult<CorrelationOutcome>;

    async fn handle_correlated(&self, info: &TxInfo) -> RelayResult<SweepOutcome>;

    /// Apply a cutoff sent in `info` to the orders of `owner` it selects
    async fn handle_cutoff(
        &self,
        info: &TxInfo,
        owner: &Address,
        selection: &FlexCancelKind,
    ) -> RelayResult<SweepOutcome>;
}

pub struct CorrelationEngine {
    orders: Arc<dyn OrderRepository>,
    order_txs: Arc<dyn OrderTxRepository>,
    pending: PendingOrderCache,
    queries: OrderQueryCache,
}

impl CorrelationEngine {
    pub fn new(
        config: OrderManagerConfig,
        orders: Arc<dyn OrderRepository>,
        order_txs: Arc<dyn OrderTxRepository>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        info!(
            order_cache_ttl = config.order_cache_ttl,
            "CorrelationEngine initialized"
        );
        Self {
            orders,
            order_txs,
            pending: PendingOrderCache::new(cache.clone()),
            queries: OrderQueryCache::new(cache, config.order_cache_ttl),
        }
    }

    pub fn with_defaults(
        orders: Arc<dyn OrderRepository>,
        order_txs: Arc<dyn OrderTxRepository>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self::new(OrderManagerConfig::default(), orders, order_txs, cache)
    }

    pub fn pending_orders(&self) -> &PendingOrderCache {
        &self.pending
    }

    pub fn order_queries(&self) -> &OrderQueryCache {
        &self.queries
    }

    /// Record an outstanding transaction and re-derive the order status
    async fn add_order(&self, tx: &OrderTx) -> RelayResult<CorrelationOutcome> {
        let Some(order_status) = tx.order_status else {
            return Err(RelayError::invalid(format!(
                "pending tx {} carries no order status",
                tx.tx_hash
            )));
        };

        let duplicate = self.add_pending_row(tx, order_status).await?;
        if !self.pending.exists(&tx.owner, &tx.order_hash).await? {
            self.pending.add(&tx.owner, &tx.order_hash).await?;
        }

        let rows = self
            .order_txs
            .pending_order_txs(&tx.owner, &tx.order_hash)
            .await?;
        let outcome = self.set_order_status(tx, rows).await?;

        Ok(match outcome {
            CorrelationOutcome::Unchanged if duplicate => CorrelationOutcome::Duplicate,
            other => other,
        })
    }

    /// Insert the pending row; returns true when it was already present
    async fn add_pending_row(&self, tx: &OrderTx, order_status: OrderStatus) -> RelayResult<bool> {
        if self
            .order_txs
            .find_pending_order_tx(&tx.tx_hash, &tx.order_hash)
            .await?
            .is_some()
        {
            debug!(
                tx_hash = %tx.tx_hash,
                order_hash = %tx.order_hash,
                "Pending order tx already exists"
            );
            return Ok(true);
        }

        let row = OrderPendingTransaction {
            owner: tx.owner,
            order_hash: tx.order_hash,
            tx_hash: tx.tx_hash,
            nonce: tx.nonce,
            order_status,
        };
        match self.order_txs.add_pending_order_tx(row).await {
            Ok(()) => Ok(false),
            // Lost a race with a redelivery of the same transaction
            Err(RepositoryError::AlreadyExists(_)) => Ok(true),
            Err(err) => Err(err.into()),
        }
    }

    /// Drop the rows superseded by a mined transaction and re-derive the status
    async fn update_order(&self, tx: &OrderTx) -> RelayResult<CorrelationOutcome> {
        let rows = self
            .order_txs
            .pending_order_txs(&tx.owner, &tx.order_hash)
            .await?;

        let (superseded, remaining): (Vec<_>, Vec<_>) = rows
            .into_iter()
            .partition(|row| row.tx_hash == tx.tx_hash || row.nonce <= tx.nonce);

        if !superseded.is_empty() {
            let hashes: Vec<TxHash> = superseded.iter().map(|row| row.tx_hash).collect();
            let deleted = self
                .order_txs
                .del_pending_order_txs(&tx.owner, &tx.order_hash, &hashes)
                .await?;
            debug!(
                order_hash = %tx.order_hash,
                owner = %tx.owner,
                deleted,
                "Removed superseded pending order txs"
            );
        }
        if remaining.is_empty() {
            self.pending.remove(&tx.owner, &tx.order_hash).await?;
        }

        self.set_order_status(tx, remaining).await
    }

    async fn set_order_status(
        &self,
        tx: &OrderTx,
        mut rows: Vec<OrderPendingTransaction>,
    ) -> RelayResult<CorrelationOutcome> {
        let order = self
            .orders
            .find_order(&tx.order_hash)
            .await?
            .ok_or_else(|| RelayError::OrderNotFound {
                order_hash: tx.order_hash.to_hex(),
            })?;

        status::sort_pending(&mut rows);
        let Some(next) =
            status::derive_status(&order, &tx.owner, &rows, tx.tx_status, tx.order_status)
        else {
            return Ok(CorrelationOutcome::Unchanged);
        };

        let changed = self.orders.update_order_status(&order.hash, next).await?;
        if changed == 0 {
            return Ok(CorrelationOutcome::Unchanged);
        }

        info!(
            order_hash = %order.hash,
            tx_hash = %tx.tx_hash,
            from = %order.status,
            to = %next,
            "Order status updated"
        );
        self.queries.del_by_owners(&[order.owner]).await?;
        Ok(CorrelationOutcome::StatusChanged(next))
    }
}

#[async_trait]
impl OrderTxCorrelator for CorrelationEngine {
    async fn handle_order_related(&self, tx: &OrderTx) -> RelayResult<CorrelationOutcome> {
        if tx.order_hash.is_zero() {
            return Err(RelayError::invalid(format!(
                "tx {} from {}: order hash should not be zero",
                tx.tx_hash, tx.owner
            )));
        }

        if tx.tx_status == TxStatus::Pending {
            self.add_order(tx).await
        } else {
            self.update_order(tx).await
        }
    }

    async fn handle_correlated(&self, info: &TxInfo) -> RelayResult<SweepOutcome> {
        if !info.status.is_mined() {
            return Ok(SweepOutcome::Ignored);
        }

        let order_hashes = self.pending.members(&info.from).await?;
        let mut changed = 0;
        let mut failed = 0;
        for order_hash in &order_hashes {
            let tx = OrderTx::correlated(info, *order_hash);
            match self.update_order(&tx).await {
                Ok(CorrelationOutcome::StatusChanged(_)) => changed += 1,
                Ok(_) => {}
                Err(err) => {
                    failed += 1;
                    warn!(
                        tx_hash = %info.tx_hash,
                        owner = %info.from,
                        order_hash = %order_hash,
                        error = %err,
                        "Correlated order update failed"
                    );
                }
            }
        }

        Ok(SweepOutcome::Swept {
            orders: order_hashes.len(),
            changed,
            failed,
        })
    }

    async fn handle_cutoff(
        &self,
        info: &TxInfo,
        owner: &Address,
        selection: &FlexCancelKind,
    ) -> RelayResult<SweepOutcome> {
        let (order_status, statuses) = if info.status == TxStatus::Pending {
            (OrderStatus::CutoffIng, CUTOFF_OPEN)
        } else {
            (OrderStatus::Cutoff, CUTOFF_OUTSTANDING)
        };

        let orders = self.orders.find_orders(owner, selection, statuses).await?;
        let mut changed = 0;
        let mut failed = 0;
        for order in &orders {
            let tx = OrderTx::related(info, order.hash, order_status);
            match self.handle_order_related(&tx).await {
                Ok(CorrelationOutcome::StatusChanged(_)) => changed += 1,
                Ok(_) => {}
                Err(err) => {
                    failed += 1;
                    warn!(
                        tx_hash = %info.tx_hash,
                        owner = %owner,
                        order_hash = %order.hash,
                        error = %err,
                        "Cutoff order update failed"
                    );
                }
            }
        }

        // Open orders with nothing outstanding are cut off directly
        if info.status == TxStatus::Success {
            let settled = self
                .orders
                .flex_cancel_orders(
                    owner,
                    selection,
                    &[OrderStatus::New, OrderStatus::PartiallyFilled],
                    OrderStatus::Cutoff,
                )
                .await?;
            if settled > 0 {
                info!(tx_hash = %info.tx_hash, owner = %owner, settled, "Open orders cut off");
                self.queries.del_by_owners(&[*owner]).await?;
                changed += settled as usize;
            }
        }

        Ok(SweepOutcome::Swept {
            orders: orders.len(),
            changed,
            failed,
        })
    }
}
