//! Account visibility policy and outbound view notifications

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::sync::broadcast;
use tracing::debug;
use types::ids::Address;
use types::transaction::TransactionView;

/// Decides whether an owner may see transaction history yet
#[async_trait]
pub trait UnlockPolicy: Send + Sync {
    async fn is_unlocked(&self, owner: &Address) -> bool;
}

/// Unlock policy backed by an explicit set, or open to everyone
#[derive(Debug, Default)]
pub struct StaticUnlockPolicy {
    allow_all: bool,
    unlocked: DashSet<Address>,
}

impl StaticUnlockPolicy {
    /// Every owner is unlocked
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            unlocked: DashSet::new(),
        }
    }

    /// Only owners passed to `unlock` are visible
    pub fn allow_list() -> Self {
        Self::default()
    }

    pub fn unlock(&self, owner: Address) {
        self.unlocked.insert(owner);
    }

    pub fn lock(&self, owner: &Address) {
        self.unlocked.remove(owner);
    }
}

#[async_trait]
impl UnlockPolicy for StaticUnlockPolicy {
    async fn is_unlocked(&self, owner: &Address) -> bool {
        self.allow_all || self.unlocked.contains(owner)
    }
}

/// Receives every persisted transaction view
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_transaction_view(&self, view: &TransactionView);
}

/// Fans views out to in-process subscribers over a broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<TransactionView>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionView> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotifier {
    async fn notify_transaction_view(&self, view: &TransactionView) {
        // No receivers is not an error: presentation layers come and go.
        if self.sender.send(view.clone()).is_err() {
            debug!(tx_hash = %view.tx_hash, owner = %view.owner, "No view subscribers");
        }
    }
}
