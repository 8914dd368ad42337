use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use types::errors::RepositoryError;
use types::ids::{Address, OrderHash, TxHash};
use types::order::{FlexCancelKind, Order, OrderPendingTransaction, OrderStatus};
use types::transaction::{NonceClass, TransactionEntity, TransactionView, TxStatus};

use crate::repository::{OrderRepository, OrderTxRepository, RepoResult, TxRepository};

#[derive(Debug, Default)]
struct Tables {
    orders: BTreeMap<OrderHash, Order>,
    order_txs: Vec<OrderPendingTransaction>,
    entities: Vec<TransactionEntity>,
    views: Vec<TransactionView>,
}

fn distinct(owners: impl IntoIterator<Item = Address>) -> Vec<Address> {
    owners
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Repository holding every table in process memory
///
/// Rows keep insertion order, like an auto-increment primary key would.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `RepositoryError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Seed an order; orders are created outside the relay core
    pub async fn insert_order(&self, order: Order) {
        self.tables.write().await.orders.insert(order.hash, order);
    }

    pub async fn order(&self, hash: &OrderHash) -> Option<Order> {
        self.tables.read().await.orders.get(hash).cloned()
    }

    pub async fn all_pending_order_txs(&self) -> Vec<OrderPendingTransaction> {
        self.tables.read().await.order_txs.clone()
    }

    pub async fn all_tx_entities(&self) -> Vec<TransactionEntity> {
        self.tables.read().await.entities.clone()
    }

    pub async fn all_tx_views(&self) -> Vec<TransactionView> {
        self.tables.read().await.views.clone()
    }

    fn check(&self) -> RepoResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "memory repository switched off".into(),
            ));
        }
        Ok(())
    }
}

fn flex_selects(order: &Order, owner: &Address, kind: &FlexCancelKind) -> bool {
    if order.owner != *owner {
        return false;
    }
    match kind {
        FlexCancelKind::ByHash { order_hash } => order.hash == *order_hash,
        FlexCancelKind::ByOwner => true,
        FlexCancelKind::ByTime { cutoff } => order.valid_since <= *cutoff,
        FlexCancelKind::ByMarket {
            token_s,
            token_b,
            cutoff,
        } => order.in_market(*token_s, *token_b) && order.valid_since <= *cutoff,
    }
}

#[async_trait]
impl OrderRepository for MemoryRepository {
    async fn find_order(&self, order_hash: &OrderHash) -> RepoResult<Option<Order>> {
        self.check()?;
        Ok(self.tables.read().await.orders.get(order_hash).cloned())
    }

    async fn find_orders(
        &self,
        owner: &Address,
        kind: &FlexCancelKind,
        statuses: &[OrderStatus],
    ) -> RepoResult<Vec<Order>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .filter(|order| flex_selects(order, owner, kind) && statuses.contains(&order.status))
            .cloned()
            .collect())
    }

    async fn update_order_status(
        &self,
        order_hash: &OrderHash,
        status: OrderStatus,
    ) -> RepoResult<u64> {
        self.check()?;
        let mut tables = self.tables.write().await;
        match tables.orders.get_mut(order_hash) {
            Some(order) if order.status != status => {
                order.status = status;
                order.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn flex_cancel_orders(
        &self,
        owner: &Address,
        kind: &FlexCancelKind,
        valid_statuses: &[OrderStatus],
        status: OrderStatus,
    ) -> RepoResult<u64> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let mut changed = 0;
        for order in tables.orders.values_mut() {
            if flex_selects(order, owner, kind) && valid_statuses.contains(&order.status) {
                order.status = status;
                order.updated_at = now;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl OrderTxRepository for MemoryRepository {
    async fn find_pending_order_tx(
        &self,
        tx_hash: &TxHash,
        order_hash: &OrderHash,
    ) -> RepoResult<Option<OrderPendingTransaction>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .order_txs
            .iter()
            .find(|row| row.tx_hash == *tx_hash && row.order_hash == *order_hash)
            .cloned())
    }

    async fn add_pending_order_tx(&self, row: OrderPendingTransaction) -> RepoResult<()> {
        self.check()?;
        let mut tables = self.tables.write().await;
        if tables
            .order_txs
            .iter()
            .any(|r| r.tx_hash == row.tx_hash && r.order_hash == row.order_hash)
        {
            return Err(RepositoryError::AlreadyExists(format!(
                "order tx {} for order {}",
                row.tx_hash, row.order_hash
            )));
        }
        tables.order_txs.push(row);
        Ok(())
    }

    async fn pending_order_txs(
        &self,
        owner: &Address,
        order_hash: &OrderHash,
    ) -> RepoResult<Vec<OrderPendingTransaction>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .order_txs
            .iter()
            .filter(|row| row.owner == *owner && row.order_hash == *order_hash)
            .cloned()
            .collect())
    }

    async fn del_pending_order_txs(
        &self,
        owner: &Address,
        order_hash: &OrderHash,
        tx_hashes: &[TxHash],
    ) -> RepoResult<u64> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let before = tables.order_txs.len();
        tables.order_txs.retain(|row| {
            !(row.owner == *owner
                && row.order_hash == *order_hash
                && tx_hashes.contains(&row.tx_hash))
        });
        Ok((before - tables.order_txs.len()) as u64)
    }
}

#[async_trait]
impl TxRepository for MemoryRepository {
    async fn find_pending_tx_entity(&self, hash: &TxHash) -> RepoResult<Option<TransactionEntity>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .entities
            .iter()
            .find(|e| e.hash == *hash && e.is_pending())
            .cloned())
    }

    async fn find_mined_tx_entity(&self, hash: &TxHash) -> RepoResult<Option<TransactionEntity>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .entities
            .iter()
            .find(|e| e.hash == *hash && !e.is_pending())
            .cloned())
    }

    async fn find_tx_entity(
        &self,
        hash: &TxHash,
        log_index: u64,
    ) -> RepoResult<Option<TransactionEntity>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .entities
            .iter()
            .find(|e| e.hash == *hash && e.log_index == log_index)
            .cloned())
    }

    async fn pending_tx_entities(
        &self,
        from: &Address,
        nonce: u64,
    ) -> RepoResult<Vec<TransactionEntity>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .entities
            .iter()
            .filter(|e| e.from == *from && e.nonce == nonce && e.is_pending())
            .cloned()
            .collect())
    }

    async fn add_tx_entity(&self, entity: TransactionEntity) -> RepoResult<()> {
        self.check()?;
        let mut tables = self.tables.write().await;
        if tables
            .entities
            .iter()
            .any(|e| e.hash == entity.hash && e.log_index == entity.log_index)
        {
            return Err(RepositoryError::AlreadyExists(format!(
                "tx entity {} log index {}",
                entity.hash, entity.log_index
            )));
        }
        tables.entities.push(entity);
        Ok(())
    }

    async fn add_tx_view(&self, view: TransactionView) -> RepoResult<()> {
        self.check()?;
        let mut tables = self.tables.write().await;
        if tables.views.iter().any(|v| {
            v.tx_hash == view.tx_hash && v.owner == view.owner && v.log_index == view.log_index
        }) {
            return Err(RepositoryError::AlreadyExists(format!(
                "tx view {} owner {} log index {}",
                view.tx_hash, view.owner, view.log_index
            )));
        }
        tables.views.push(view);
        Ok(())
    }

    async fn del_duplicate_tx_entity(
        &self,
        hash: &TxHash,
        log_index: u64,
        nonce: u64,
    ) -> RepoResult<Vec<Address>> {
        self.check()?;
        let mut tables = self.tables.write().await;
        tables
            .entities
            .retain(|e| !(e.hash == *hash && e.log_index == log_index && e.nonce == nonce));

        let mut owners = Vec::new();
        tables.views.retain(|v| {
            let hit = v.tx_hash == *hash && v.log_index == log_index && v.nonce == nonce;
            if hit {
                owners.push(v.owner);
            }
            !hit
        });
        Ok(distinct(owners))
    }

    async fn set_pending_tx_entities_failed(&self, hashes: &[TxHash]) -> RepoResult<u64> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for entity in tables.entities.iter_mut() {
            if entity.is_pending() && hashes.contains(&entity.hash) {
                entity.status = TxStatus::Failed;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn set_pending_tx_views_failed(&self, hashes: &[TxHash]) -> RepoResult<Vec<Address>> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let mut owners = Vec::new();
        for view in tables.views.iter_mut() {
            if view.status == TxStatus::Pending && hashes.contains(&view.tx_hash) {
                view.status = TxStatus::Failed;
                owners.push(view.owner);
            }
        }
        Ok(distinct(owners))
    }

    async fn del_pending_tx_entity(&self, hash: &TxHash) -> RepoResult<u64> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let before = tables.entities.len();
        tables
            .entities
            .retain(|e| !(e.hash == *hash && e.is_pending()));
        Ok((before - tables.entities.len()) as u64)
    }

    async fn del_pending_tx_views(&self, hash: &TxHash) -> RepoResult<Vec<Address>> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let mut owners = Vec::new();
        tables.views.retain(|v| {
            let hit = v.tx_hash == *hash && v.status == TxStatus::Pending;
            if hit {
                owners.push(v.owner);
            }
            !hit
        });
        Ok(distinct(owners))
    }

    async fn rollback_tx_entities(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> RepoResult<Vec<Address>> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let mut senders = Vec::new();
        tables.entities.retain(|e| {
            let hit = !e.is_pending() && (from_block..=to_block).contains(&e.block_number);
            if hit {
                senders.push(e.from);
            }
            !hit
        });
        Ok(distinct(senders))
    }

    async fn rollback_tx_views(&self, from_block: u64, to_block: u64) -> RepoResult<Vec<Address>> {
        self.check()?;
        let mut tables = self.tables.write().await;
        let mut owners = Vec::new();
        tables.views.retain(|v| {
            let hit =
                v.status != TxStatus::Pending && (from_block..=to_block).contains(&v.block_number);
            if hit {
                owners.push(v.owner);
            }
            !hit
        });
        Ok(distinct(owners))
    }

    async fn max_nonce(&self, owner: &Address, class: NonceClass) -> RepoResult<Option<u64>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .entities
            .iter()
            .filter(|e| e.from == *owner && class.covers(e.status))
            .map(|e| e.nonce)
            .max())
    }

    async fn tx_views(&self, hash: &TxHash) -> RepoResult<Vec<TransactionView>> {
        self.check()?;
        let tables = self.tables.read().await;
        Ok(tables
            .views
            .iter()
            .filter(|v| v.tx_hash == *hash)
            .cloned()
            .collect())
    }
}
