//! Transaction manager
//!
//! Subscribes to every chain event kind, turns each event into one entity
//! and its views, and persists them under pending/mined semantics:
//! - a pending transaction is stored once per hash
//! - a mined transaction fails same-sender same-nonce pending ones, replaces
//!   its own pending record, and is stored once per (hash, log index)
//!
//! After each save the order side is told about the transaction. A chain
//! fork pauses the transaction subscriptions, waits until their queued
//! events are handled, rolls the affected block range back and resubscribes.
//! The fork subscription itself stays live; fork events are handled one at
//! a time by its worker.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use event_bus::{EventBus, EventHandler, SubscriptionId};
use order_manager::{OrderTx, OrderTxCorrelator};
use storage::keys::{FILL_QUERY_PREFIX, TXVIEW_QUERY_PREFIX};
use storage::{Cache, NotificationSink, TxRepository, UnlockPolicy};
use tracing::{debug, error, info, warn};
use types::errors::{RelayError, RelayResult, RepositoryError};
use types::events::{
    ApprovalEvent, ChainEvent, CutoffEvent, CutoffPairEvent, EthTransferEvent, EventEnvelope,
    ForkedEvent, OrderCancelledEvent, OrderFilledEvent, Topic, TransferEvent,
    UnsupportedContractEvent, WethDepositEvent, WethWithdrawalEvent,
};
use types::ids::Address;
use types::order::{FlexCancelKind, OrderStatus};
use types::transaction::{NonceClass, TransactionEntity, TransactionView, TxInfo, TxStatus};

use crate::cache::{FillOwnerCache, NonceWatermarks, QueryCache};
use crate::config::TxManagerConfig;
use crate::convert::{self, Converted};

/// Result of persisting one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Entity stored with this many views
    Saved { views: usize },
    /// A mined record with the same (hash, log index) but another nonce was
    /// replaced
    Replaced { views: usize },
    /// Already stored; nothing written
    Duplicate,
    /// No view owner is unlocked; nothing written
    Locked,
    /// Pending event for a transaction already mined, or for a nonce at or
    /// below the sender's mined watermark; nothing written
    Stale,
}

/// What a fork rollback touched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkReport {
    pub fork_block: u64,
    pub detected_block: u64,
    /// Owners whose entities or views were rolled back
    pub owners: Vec<Address>,
    /// Rollback steps that failed and were skipped
    pub failures: usize,
}

/// External collaborators of the manager
#[derive(Clone)]
pub struct TxManagerDeps {
    pub repo: Arc<dyn TxRepository>,
    pub cache: Arc<dyn Cache>,
    pub correlator: Arc<dyn OrderTxCorrelator>,
    pub unlock: Arc<dyn UnlockPolicy>,
    pub notifier: Arc<dyn NotificationSink>,
    pub bus: Arc<EventBus>,
}

/// Unlock state of every view owner of one transaction
struct UnlockedMap(BTreeMap<Address, bool>);

impl UnlockedMap {
    async fn build(unlock: &dyn UnlockPolicy, views: &[TransactionView]) -> Self {
        let mut map = BTreeMap::new();
        for view in views {
            if !map.contains_key(&view.owner) {
                map.insert(view.owner, unlock.is_unlocked(&view.owner).await);
            }
        }
        Self(map)
    }

    /// The entity is kept if anyone can see it
    fn keeps_entity(&self) -> bool {
        self.0.values().any(|unlocked| *unlocked)
    }

    fn keeps_view(&self, owner: &Address) -> bool {
        self.0.get(owner).copied().unwrap_or(false)
    }
}

/// Subscriptions held while the manager runs
#[derive(Default)]
struct Lifecycle {
    running: bool,
    subscriptions: Vec<(Topic, SubscriptionId)>,
}

impl Lifecycle {
    fn has_transaction_topics(&self) -> bool {
        self.subscriptions
            .iter()
            .any(|(topic, _)| *topic != Topic::ChainForkDetected)
    }
}

pub struct TxManager {
    config: TxManagerConfig,
    repo: Arc<dyn TxRepository>,
    correlator: Arc<dyn OrderTxCorrelator>,
    unlock: Arc<dyn UnlockPolicy>,
    notifier: Arc<dyn NotificationSink>,
    bus: Arc<EventBus>,
    fills: FillOwnerCache,
    nonces: NonceWatermarks,
    view_queries: QueryCache,
    fill_queries: QueryCache,
    lifecycle: Mutex<Lifecycle>,
    fork_lock: tokio::sync::Mutex<()>,
}

impl TxManager {
    pub fn new(config: TxManagerConfig, deps: TxManagerDeps) -> Arc<Self> {
        info!(
            fill_owner_ttl = config.fill_owner_ttl,
            view_cache_ttl = config.view_cache_ttl,
            fill_cache_ttl = config.fill_cache_ttl,
            "TxManager initialized"
        );
        let TxManagerDeps {
            repo,
            cache,
            correlator,
            unlock,
            notifier,
            bus,
        } = deps;

        Arc::new(Self {
            fills: FillOwnerCache::new(cache.clone(), config.fill_owner_ttl),
            nonces: NonceWatermarks::new(cache.clone()),
            view_queries: QueryCache::new(cache.clone(), TXVIEW_QUERY_PREFIX, config.view_cache_ttl),
            fill_queries: QueryCache::new(cache, FILL_QUERY_PREFIX, config.fill_cache_ttl),
            config,
            repo,
            correlator,
            unlock,
            notifier,
            bus,
            lifecycle: Mutex::new(Lifecycle::default()),
            fork_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_defaults(deps: TxManagerDeps) -> Arc<Self> {
        Self::new(TxManagerConfig::default(), deps)
    }

    pub fn config(&self) -> &TxManagerConfig {
        &self.config
    }

    pub fn view_queries(&self) -> &QueryCache {
        &self.view_queries
    }

    pub fn fill_queries(&self) -> &QueryCache {
        &self.fill_queries
    }

    pub fn fill_owners(&self) -> &FillOwnerCache {
        &self.fills
    }

    /// Current nonce watermark of `owner`
    pub async fn nonce_watermark(&self, owner: &Address, class: NonceClass) -> RelayResult<Option<u64>> {
        self.nonces.get(owner, class).await
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn subscribe(self: &Arc<Self>, topic: Topic) -> (Topic, SubscriptionId) {
        let watcher = Arc::new(Watcher {
            manager: self.clone(),
        });
        (topic, self.bus.subscribe(topic, watcher))
    }

    /// Subscribe one watcher per topic
    pub fn start(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle();
        if lifecycle.running {
            warn!("TxManager already started");
            return;
        }
        lifecycle.running = true;
        for topic in Topic::ALL {
            let sub = self.subscribe(topic);
            lifecycle.subscriptions.push(sub);
        }
        info!(topics = lifecycle.subscriptions.len(), "TxManager started");
    }

    /// Drop every subscription and wait until queued events are handled
    ///
    /// Must not be awaited from one of the manager's own handlers.
    pub async fn stop(&self) {
        let subs = {
            let mut lifecycle = self.lifecycle();
            lifecycle.running = false;
            std::mem::take(&mut lifecycle.subscriptions)
        };
        for (_, id) in subs {
            self.bus.unsubscribe_and_wait(id).await;
        }
        info!("TxManager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle().running
    }

    /// Unsubscribe every transaction topic and wait for their workers;
    /// returns whether the manager was running
    async fn pause_transactions(&self) -> bool {
        let (running, paused) = {
            let mut lifecycle = self.lifecycle();
            let (fork, paused): (Vec<_>, Vec<_>) = std::mem::take(&mut lifecycle.subscriptions)
                .into_iter()
                .partition(|(topic, _)| *topic == Topic::ChainForkDetected);
            lifecycle.subscriptions = fork;
            (lifecycle.running, paused)
        };
        for (topic, id) in &paused {
            self.bus.unsubscribe_and_wait(*id).await;
            debug!(topic = %topic, subscription = %id, "Paused for fork");
        }
        running
    }

    /// Resubscribe the transaction topics unless the manager was stopped or
    /// restarted meanwhile
    fn resume_transactions(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle();
        if !lifecycle.running || lifecycle.has_transaction_topics() {
            return;
        }
        for topic in Topic::ALL {
            if topic != Topic::ChainForkDetected {
                let sub = self.subscribe(topic);
                lifecycle.subscriptions.push(sub);
            }
        }
        debug!(topics = lifecycle.subscriptions.len(), "Resumed after fork");
    }

    /// Persist a transaction event and forward it to order bookkeeping
    pub async fn save_event(&self, event: &ChainEvent) -> RelayResult<SaveOutcome> {
        match event {
            ChainEvent::Approve(e) => self.save_approve(e).await,
            ChainEvent::CancelOrder(e) => self.save_order_cancelled(e).await,
            ChainEvent::CutoffAll(e) => self.save_cutoff_all(e).await,
            ChainEvent::CutoffPair(e) => self.save_cutoff_pair(e).await,
            ChainEvent::WethDeposit(e) => self.save_weth_deposit(e).await,
            ChainEvent::WethWithdrawal(e) => self.save_weth_withdrawal(e).await,
            ChainEvent::Transfer(e) => self.save_transfer(e).await,
            ChainEvent::EthTransfer(e) => self.save_eth_transfer(e).await,
            ChainEvent::UnsupportedContract(e) => self.save_unsupported_contract(e).await,
            ChainEvent::OrderFilled(e) => self.save_order_filled(e).await,
            ChainEvent::ChainForkDetected(_) => Err(RelayError::invalid(
                "fork notifications go through fork_process",
            )),
        }
    }

    pub async fn save_approve(&self, event: &ApprovalEvent) -> RelayResult<SaveOutcome> {
        let converted = convert::approve(event)?;
        let saved = self.save_transaction(converted).await;
        self.after_save(saved, self.correlate_sender(&event.tx)).await
    }

    pub async fn save_order_cancelled(&self, event: &OrderCancelledEvent) -> RelayResult<SaveOutcome> {
        let converted = convert::cancel(event)?;
        let saved = self.save_transaction(converted).await;
        let status = if event.tx.status == TxStatus::Pending {
            OrderStatus::Cancelling
        } else {
            OrderStatus::Cancelled
        };
        let correlation =
            self.correlate_order(OrderTx::related(&event.tx, event.order_hash, status));
        self.after_save(saved, correlation).await
    }

    /// Cutoff of every order valid since before `event.cutoff`
    pub async fn save_cutoff_all(&self, event: &CutoffEvent) -> RelayResult<SaveOutcome> {
        let converted = convert::cutoff_all(event)?;
        let saved = self.save_transaction(converted).await;
        let selection = FlexCancelKind::ByTime {
            cutoff: event.cutoff,
        };
        self.after_save(saved, self.correlate_cutoff(&event.tx, &event.owner, selection))
            .await
    }

    /// Cutoff of one market, either token order
    pub async fn save_cutoff_pair(&self, event: &CutoffPairEvent) -> RelayResult<SaveOutcome> {
        let converted = convert::cutoff_pair(event)?;
        let saved = self.save_transaction(converted).await;
        let selection = FlexCancelKind::ByMarket {
            token_s: event.token1,
            token_b: event.token2,
            cutoff: event.cutoff,
        };
        self.after_save(saved, self.correlate_cutoff(&event.tx, &event.owner, selection))
            .await
    }

    pub async fn save_weth_deposit(&self, event: &WethDepositEvent) -> RelayResult<SaveOutcome> {
        let converted = convert::weth_deposit(event)?;
        let saved = self.save_transaction(converted).await;
        self.after_save(saved, self.correlate_sender(&event.tx)).await
    }

    pub async fn save_weth_withdrawal(&self, event: &WethWithdrawalEvent) -> RelayResult<SaveOutcome> {
        let converted = convert::weth_withdrawal(event)?;
        let saved = self.save_transaction(converted).await;
        self.after_save(saved, self.correlate_sender(&event.tx)).await
    }

    /// Token transfer; views of fill participants of the same transaction
    /// are dropped, the entity is still kept
    pub async fn save_transfer(&self, event: &TransferEvent) -> RelayResult<SaveOutcome> {
        let mut converted = convert::transfer(event)?;

        let mut views = Vec::with_capacity(converted.views.len());
        for view in converted.views {
            if self.fills.is_marked(&view.tx_hash, &view.owner).await? {
                debug!(
                    tx_hash = %view.tx_hash,
                    owner = %view.owner,
                    "Transfer view suppressed for fill owner"
                );
                continue;
            }
            views.push(view);
        }
        converted.views = views;

        let saved = self.save_transaction(converted).await;
        self.after_save(saved, self.correlate_sender(&event.tx)).await
    }

    pub async fn save_eth_transfer(&self, event: &EthTransferEvent) -> RelayResult<SaveOutcome> {
        let converted = convert::eth_transfer(event)?;
        let saved = self.save_transaction(converted).await;
        self.after_save(saved, self.correlate_sender(&event.tx)).await
    }

    pub async fn save_unsupported_contract(
        &self,
        event: &UnsupportedContractEvent,
    ) -> RelayResult<SaveOutcome> {
        let converted = convert::unsupported_contract(event)?;
        let saved = self.save_transaction(converted).await;
        self.after_save(saved, self.correlate_sender(&event.tx)).await
    }

    /// Ring fill; marks the order owner as a fill participant first
    pub async fn save_order_filled(&self, event: &OrderFilledEvent) -> RelayResult<SaveOutcome> {
        let converted = convert::order_filled(event)?;
        self.fills.mark(&event.tx.tx_hash, &event.owner).await?;

        let saved = self.save_transaction(converted).await;
        let status = if event.tx.status == TxStatus::Pending {
            OrderStatus::Pending
        } else {
            event.order_status
        };
        let correlation =
            self.correlate_order(OrderTx::related(&event.tx, event.order_hash, status));
        self.after_save(saved, correlation).await
    }

    /// Run the correlation unless the event was stale
    ///
    /// The save error wins; a correlation error surfaces after a good save.
    async fn after_save<F>(
        &self,
        saved: RelayResult<SaveOutcome>,
        correlation: F,
    ) -> RelayResult<SaveOutcome>
    where
        F: Future<Output = RelayResult<()>>,
    {
        if let Ok(SaveOutcome::Stale) = saved {
            return saved;
        }
        let correlated = correlation.await;
        let outcome = saved?;
        correlated?;
        Ok(outcome)
    }

    async fn correlate_order(&self, tx: OrderTx) -> RelayResult<()> {
        match self.correlator.handle_order_related(&tx).await {
            Ok(outcome) => {
                debug!(tx_hash = %tx.tx_hash, order_hash = %tx.order_hash, ?outcome, "Order tx correlated");
                Ok(())
            }
            Err(err) => {
                warn!(tx_hash = %tx.tx_hash, order_hash = %tx.order_hash, error = %err, "Order tx correlation failed");
                Err(err)
            }
        }
    }

    async fn correlate_sender(&self, info: &TxInfo) -> RelayResult<()> {
        match self.correlator.handle_correlated(info).await {
            Ok(outcome) => {
                debug!(tx_hash = %info.tx_hash, owner = %info.from, ?outcome, "Sender txs correlated");
                Ok(())
            }
            Err(err) => {
                warn!(tx_hash = %info.tx_hash, owner = %info.from, error = %err, "Sender correlation failed");
                Err(err)
            }
        }
    }

    async fn correlate_cutoff(
        &self,
        info: &TxInfo,
        owner: &Address,
        selection: FlexCancelKind,
    ) -> RelayResult<()> {
        let cutoff = match self.correlator.handle_cutoff(info, owner, &selection).await {
            Ok(outcome) => {
                debug!(tx_hash = %info.tx_hash, owner = %owner, ?outcome, "Cutoff correlated");
                Ok(())
            }
            Err(err) => {
                warn!(tx_hash = %info.tx_hash, owner = %owner, error = %err, "Cutoff correlation failed");
                Err(err)
            }
        };
        let swept = self.correlate_sender(info).await;
        cutoff.and(swept)
    }

    async fn save_transaction(&self, converted: Converted) -> RelayResult<SaveOutcome> {
        let Converted { entity, views } = converted;
        if entity.is_pending() {
            self.save_pending_tx(entity, views).await
        } else {
            self.save_mined_tx(entity, views).await
        }
    }

    async fn save_pending_tx(
        &self,
        entity: TransactionEntity,
        views: Vec<TransactionView>,
    ) -> RelayResult<SaveOutcome> {
        if self.is_stale_pending(&entity).await? {
            return Ok(SaveOutcome::Stale);
        }

        let unlocked = UnlockedMap::build(self.unlock.as_ref(), &views).await;
        if !unlocked.keeps_entity() {
            debug!(tx_hash = %entity.hash, "No unlocked owner for pending tx");
            return Ok(SaveOutcome::Locked);
        }

        if self.repo.find_pending_tx_entity(&entity.hash).await?.is_some() {
            debug!(tx_hash = %entity.hash, "Pending tx entity already exists");
            return Ok(SaveOutcome::Duplicate);
        }

        if !self.add_entity(&entity).await? {
            return Ok(SaveOutcome::Duplicate);
        }
        let stored = self.add_views(views, &unlocked).await;
        Ok(SaveOutcome::Saved { views: stored })
    }

    /// A pending event arriving after its transaction, or a later one of the
    /// same sender, was mined
    async fn is_stale_pending(&self, entity: &TransactionEntity) -> RelayResult<bool> {
        if let Some(mined) = self.repo.find_mined_tx_entity(&entity.hash).await? {
            debug!(
                tx_hash = %entity.hash,
                status = ?mined.status,
                block = mined.block_number,
                "Pending tx already mined"
            );
            return Ok(true);
        }
        match self.nonces.get(&entity.from, NonceClass::Mined).await? {
            Some(mined_nonce) if entity.nonce <= mined_nonce => {
                debug!(
                    tx_hash = %entity.hash,
                    from = %entity.from,
                    nonce = entity.nonce,
                    mined_nonce,
                    "Pending tx nonce already mined"
                );
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_mined_tx(
        &self,
        entity: TransactionEntity,
        views: Vec<TransactionView>,
    ) -> RelayResult<SaveOutcome> {
        let unlocked = UnlockedMap::build(self.unlock.as_ref(), &views).await;
        if !unlocked.keeps_entity() {
            debug!(tx_hash = %entity.hash, "No unlocked owner for mined tx");
            return Ok(SaveOutcome::Locked);
        }

        self.process_pending_while_mined(&entity).await?;

        let mut replaced = false;
        if let Some(existing) = self.repo.find_tx_entity(&entity.hash, entity.log_index).await? {
            if existing.nonce == entity.nonce {
                debug!(
                    tx_hash = %entity.hash,
                    log_index = entity.log_index,
                    "Mined tx entity already exists"
                );
                return Ok(SaveOutcome::Duplicate);
            }
            let owners = self
                .repo
                .del_duplicate_tx_entity(&existing.hash, existing.log_index, existing.nonce)
                .await?;
            warn!(
                tx_hash = %entity.hash,
                log_index = entity.log_index,
                stale_nonce = existing.nonce,
                nonce = entity.nonce,
                "Replacing mined tx entity with different nonce"
            );
            self.view_queries.del_by_owners(&owners).await?;
            replaced = true;
        }

        if !self.add_entity(&entity).await? {
            return Ok(SaveOutcome::Duplicate);
        }
        let stored = self.add_views(views, &unlocked).await;
        debug!(
            tx_hash = %entity.hash,
            log_index = entity.log_index,
            block = entity.block_number,
            views = stored,
            "Mined tx saved"
        );

        Ok(if replaced {
            SaveOutcome::Replaced { views: stored }
        } else {
            SaveOutcome::Saved { views: stored }
        })
    }

    /// Fail same-sender same-nonce pending txs with other hashes and drop
    /// this hash's own pending record
    async fn process_pending_while_mined(&self, entity: &TransactionEntity) -> RelayResult<()> {
        let pending = self.repo.pending_tx_entities(&entity.from, entity.nonce).await?;
        if pending.is_empty() {
            return Ok(());
        }

        let mut replaced_hashes = Vec::new();
        let mut current_is_pending = false;
        for tx in &pending {
            if tx.hash == entity.hash {
                current_is_pending = true;
            } else if !replaced_hashes.contains(&tx.hash) {
                replaced_hashes.push(tx.hash);
            }
        }

        if !replaced_hashes.is_empty() {
            let failed = self.repo.set_pending_tx_entities_failed(&replaced_hashes).await?;
            let owners = self.repo.set_pending_tx_views_failed(&replaced_hashes).await?;
            info!(
                from = %entity.from,
                nonce = entity.nonce,
                mined = %entity.hash,
                failed,
                "Pending txs replaced by mined tx"
            );
            self.view_queries.del_by_owners(&owners).await?;
        }

        if current_is_pending {
            self.repo.del_pending_tx_entity(&entity.hash).await?;
            let owners = self.repo.del_pending_tx_views(&entity.hash).await?;
            self.view_queries.del_by_owners(&owners).await?;
        }
        Ok(())
    }

    /// Store the entity and advance nonce watermarks; false on a duplicate
    async fn add_entity(&self, entity: &TransactionEntity) -> RelayResult<bool> {
        match self.repo.add_tx_entity(entity.clone()).await {
            Ok(()) => {}
            Err(RepositoryError::AlreadyExists(_)) => {
                debug!(tx_hash = %entity.hash, log_index = entity.log_index, "Tx entity stored concurrently");
                return Ok(false);
            }
            Err(err) => {
                error!(tx_hash = %entity.hash, error = %err, "Failed to add tx entity");
                return Err(err.into());
            }
        }

        if entity.status.is_mined() {
            self.nonces
                .advance(&entity.from, NonceClass::Mined, entity.nonce)
                .await?;
        }
        self.nonces
            .advance(&entity.from, NonceClass::Any, entity.nonce)
            .await?;
        Ok(true)
    }

    /// Store views of unlocked owners; a failed view is logged and skipped
    async fn add_views(&self, views: Vec<TransactionView>, unlocked: &UnlockedMap) -> usize {
        let mut stored = 0;
        for view in views {
            if !unlocked.keeps_view(&view.owner) {
                continue;
            }
            match self.add_view(&view).await {
                Ok(()) => stored += 1,
                Err(err) => error!(
                    tx_hash = %view.tx_hash,
                    owner = %view.owner,
                    error = %err,
                    "Failed to add tx view"
                ),
            }
        }
        stored
    }

    async fn add_view(&self, view: &TransactionView) -> RelayResult<()> {
        self.repo.add_tx_view(view.clone()).await?;
        self.notifier.notify_transaction_view(view).await;
        self.view_queries.del_by_owners(&[view.owner]).await?;
        Ok(())
    }

    /// Roll back `[fork_block, detected_block]` with transaction
    /// subscriptions paused
    ///
    /// Rollback steps that fail are logged and skipped. Subscriptions are
    /// restored only if the manager was running.
    pub async fn fork_process(self: &Arc<Self>, event: &ForkedEvent) -> RelayResult<ForkReport> {
        if event.fork_block >= event.detected_block {
            return Err(RelayError::invalid(format!(
                "fork block {} must be below detected block {}",
                event.fork_block, event.detected_block
            )));
        }
        info!(
            fork_block = event.fork_block,
            detected_block = event.detected_block,
            "Processing chain fork"
        );

        let _fork = self.fork_lock.lock().await;
        let running = self.pause_transactions().await;
        let report = self.rollback(event.fork_block, event.detected_block).await;
        if running {
            self.resume_transactions();
        }

        info!(
            owners = report.owners.len(),
            failures = report.failures,
            "Chain fork processed"
        );
        Ok(report)
    }

    async fn rollback(&self, from: u64, to: u64) -> ForkReport {
        let mut owners = BTreeSet::new();
        let mut failures = 0;

        match self.repo.rollback_tx_entities(from, to).await {
            Ok(senders) => owners.extend(senders),
            Err(err) => {
                failures += 1;
                warn!(from, to, error = %err, "Tx entity rollback failed");
            }
        }
        match self.repo.rollback_tx_views(from, to).await {
            Ok(view_owners) => owners.extend(view_owners),
            Err(err) => {
                failures += 1;
                warn!(from, to, error = %err, "Tx view rollback failed");
            }
        }

        let owners: Vec<Address> = owners.into_iter().collect();
        if let Err(err) = self.view_queries.del_by_owners(&owners).await {
            failures += 1;
            warn!(error = %err, "Tx view cache invalidation failed");
        }
        if let Err(err) = self.fill_queries.del_by_owners(&owners).await {
            failures += 1;
            warn!(error = %err, "Fill cache invalidation failed");
        }

        for owner in &owners {
            for class in [NonceClass::Mined, NonceClass::Any] {
                if let Err(err) = self.rollback_nonce(owner, class).await {
                    failures += 1;
                    warn!(owner = %owner, ?class, error = %err, "Nonce watermark rollback failed");
                }
            }
        }

        ForkReport {
            fork_block: from,
            detected_block: to,
            owners,
            failures,
        }
    }

    async fn rollback_nonce(&self, owner: &Address, class: NonceClass) -> RelayResult<()> {
        let max = self.repo.max_nonce(owner, class).await?;
        self.nonces.reset(owner, class, max).await
    }
}

/// Bus subscriber forwarding one topic to the manager
struct Watcher {
    manager: Arc<TxManager>,
}

#[async_trait]
impl EventHandler for Watcher {
    fn name(&self) -> &'static str {
        "tx-manager"
    }

    async fn handle(&self, envelope: &EventEnvelope) -> RelayResult<()> {
        match &envelope.event {
            ChainEvent::ChainForkDetected(fork) => {
                self.manager.fork_process(fork).await?;
            }
            event => {
                let outcome = self.manager.save_event(event).await?;
                debug!(event_id = %envelope.event_id, topic = %envelope.topic(), ?outcome, "Event saved");
            }
        }
        Ok(())
    }
}
