//! Relational store interfaces
//!
//! The repository is the source of truth for orders, pending order
//! transactions, transaction entities and views. Every method is a single
//! keyed read or write; there is no cross-call transaction.

use async_trait::async_trait;
use types::errors::RepositoryError;
use types::ids::{Address, OrderHash, TxHash};
use types::order::{FlexCancelKind, Order, OrderPendingTransaction, OrderStatus};
use types::transaction::{NonceClass, TransactionEntity, TransactionView};

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Order table
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_order(&self, order_hash: &OrderHash) -> RepoResult<Option<Order>>;

    /// The owner's orders selected by `kind` whose status is in `statuses`
    async fn find_orders(
        &self,
        owner: &Address,
        kind: &FlexCancelKind,
        statuses: &[OrderStatus],
    ) -> RepoResult<Vec<Order>>;

    /// Returns the number of rows whose status actually changed
    async fn update_order_status(&self, order_hash: &OrderHash, status: OrderStatus)
        -> RepoResult<u64>;

    /// Sets `status` on the owner's orders selected by `kind` whose current
    /// status is in `valid_statuses`. Returns the number of rows changed.
    async fn flex_cancel_orders(
        &self,
        owner: &Address,
        kind: &FlexCancelKind,
        valid_statuses: &[OrderStatus],
        status: OrderStatus,
    ) -> RepoResult<u64>;
}

/// Order pending-transaction table
#[async_trait]
pub trait OrderTxRepository: Send + Sync {
    async fn find_pending_order_tx(
        &self,
        tx_hash: &TxHash,
        order_hash: &OrderHash,
    ) -> RepoResult<Option<OrderPendingTransaction>>;

    /// Fails with `AlreadyExists` when (tx hash, order hash) is present
    async fn add_pending_order_tx(&self, row: OrderPendingTransaction) -> RepoResult<()>;

    /// Rows sent by `owner` for `order_hash`, in storage order
    async fn pending_order_txs(
        &self,
        owner: &Address,
        order_hash: &OrderHash,
    ) -> RepoResult<Vec<OrderPendingTransaction>>;

    async fn del_pending_order_txs(
        &self,
        owner: &Address,
        order_hash: &OrderHash,
        tx_hashes: &[TxHash],
    ) -> RepoResult<u64>;
}

/// Transaction entity and view tables
#[async_trait]
pub trait TxRepository: Send + Sync {
    async fn find_pending_tx_entity(&self, hash: &TxHash) -> RepoResult<Option<TransactionEntity>>;

    /// Any non-pending entity of `hash`, whatever its log index
    async fn find_mined_tx_entity(&self, hash: &TxHash) -> RepoResult<Option<TransactionEntity>>;

    async fn find_tx_entity(
        &self,
        hash: &TxHash,
        log_index: u64,
    ) -> RepoResult<Option<TransactionEntity>>;

    /// Pending entities sent by `from` with `nonce`
    async fn pending_tx_entities(&self, from: &Address, nonce: u64)
        -> RepoResult<Vec<TransactionEntity>>;

    async fn add_tx_entity(&self, entity: TransactionEntity) -> RepoResult<()>;

    async fn add_tx_view(&self, view: TransactionView) -> RepoResult<()>;

    /// Removes the entity at (hash, log index) with `nonce` and its views.
    /// Returns the owners whose views were removed.
    async fn del_duplicate_tx_entity(
        &self,
        hash: &TxHash,
        log_index: u64,
        nonce: u64,
    ) -> RepoResult<Vec<Address>>;

    async fn set_pending_tx_entities_failed(&self, hashes: &[TxHash]) -> RepoResult<u64>;

    /// Returns the owners whose views changed
    async fn set_pending_tx_views_failed(&self, hashes: &[TxHash]) -> RepoResult<Vec<Address>>;

    async fn del_pending_tx_entity(&self, hash: &TxHash) -> RepoResult<u64>;

    /// Returns the owners whose views were removed
    async fn del_pending_tx_views(&self, hash: &TxHash) -> RepoResult<Vec<Address>>;

    /// Removes mined entities with `from_block <= block_number <= to_block`.
    /// Returns the senders of the removed entities.
    async fn rollback_tx_entities(&self, from_block: u64, to_block: u64)
        -> RepoResult<Vec<Address>>;

    /// Removes mined views in the block range. Returns their owners.
    async fn rollback_tx_views(&self, from_block: u64, to_block: u64) -> RepoResult<Vec<Address>>;

    /// Highest nonce among the owner's entities of the given class
    async fn max_nonce(&self, owner: &Address, class: NonceClass) -> RepoResult<Option<u64>>;

    async fn tx_views(&self, hash: &TxHash) -> RepoResult<Vec<TransactionView>>;
}
