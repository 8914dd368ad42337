//! Events flowing from the bus through the manager
//!
//! Tests include:
//! - Published events persisted and notified
//! - A published fork rolls back and the manager resubscribes
//! - A fork waits for queued events and never runs two workers per topic
//! - Stopping waits for queued events; a stopped manager receives nothing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use event_bus::EventBus;
use order_manager::CorrelationEngine;
use rust_decimal::Decimal;
use storage::{BroadcastNotifier, MemoryCache, MemoryRepository, StaticUnlockPolicy, UnlockPolicy};
use tx_manager::{TxManager, TxManagerDeps};
use types::events::{ChainEvent, EthTransferEvent, ForkedEvent, Topic};
use types::ids::{Address, TxHash};
use types::transaction::{TxInfo, TxStatus};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn transfer(tx: u64, nonce: u64, block: u64) -> ChainEvent {
    let info = TxInfo::pending(
        TxHash::from_low_u64(tx),
        Address::from_low_u64(0xa1),
        Address::from_low_u64(0xb0),
        nonce,
    );
    ChainEvent::EthTransfer(EthTransferEvent {
        tx: info.mined(TxStatus::Success, block, 0),
        value: Decimal::ONE,
    })
}

struct Harness {
    repo: Arc<MemoryRepository>,
    notifier: Arc<BroadcastNotifier>,
    bus: Arc<EventBus>,
    manager: Arc<TxManager>,
}

impl Harness {
    /// Wait until `entities` are stored and every subscription is live
    async fn settle(&self, entities: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stored = self.repo.all_tx_entities().await.len();
            if stored == entities
                && self.manager.is_running()
                && self.bus.subscriber_count(Topic::EthTransfer) == 1
                && self.bus.subscriber_count(Topic::ChainForkDetected) == 1
            {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {entities} entities, have {stored}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Unlocks everyone slowly and records how many calls overlap
#[derive(Default)]
struct SlowUnlock {
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[async_trait]
impl UnlockPolicy for SlowUnlock {
    async fn is_unlocked(&self, _owner: &Address) -> bool {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        true
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(StaticUnlockPolicy::allow_all()))
}

fn harness_with(unlock: Arc<dyn UnlockPolicy>) -> Harness {
    init_tracing();
    let repo = Arc::new(MemoryRepository::new());
    let cache = Arc::new(MemoryCache::with_defaults());
    let notifier = Arc::new(BroadcastNotifier::default());
    let bus = Arc::new(EventBus::new());
    let engine = Arc::new(CorrelationEngine::with_defaults(
        repo.clone(),
        repo.clone(),
        cache.clone(),
    ));
    let manager = TxManager::with_defaults(TxManagerDeps {
        repo: repo.clone(),
        cache,
        correlator: engine,
        unlock,
        notifier: notifier.clone(),
        bus: bus.clone(),
    });
    manager.start();
    Harness {
        repo,
        notifier,
        bus,
        manager,
    }
}

#[tokio::test]
async fn test_published_event_is_saved_and_notified() {
    let h = harness();
    let mut views = h.notifier.subscribe();

    assert_eq!(h.bus.publish(transfer(1, 0, 100)), 1);

    for _ in 0..2 {
        let view = tokio::time::timeout(Duration::from_secs(5), views.recv())
            .await
            .expect("view not notified")
            .unwrap();
        assert_eq!(view.tx_hash, TxHash::from_low_u64(1));
    }
    assert_eq!(h.repo.all_tx_entities().await.len(), 1);
}

#[tokio::test]
async fn test_published_fork_rolls_back() {
    let h = harness();
    h.bus.publish(transfer(1, 0, 100));
    h.bus.publish(transfer(2, 1, 120));
    h.settle(2).await;

    h.bus.publish(ChainEvent::ChainForkDetected(ForkedEvent {
        fork_block: 110,
        detected_block: 130,
    }));

    h.settle(1).await;

    // Resubscribed workers keep consuming
    h.bus.publish(transfer(3, 2, 131));
    h.settle(2).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fork_waits_for_queued_events() {
    let unlock = Arc::new(SlowUnlock::default());
    let h = harness_with(unlock.clone());
    let mut views = h.notifier.subscribe();

    for n in 0..5 {
        assert_eq!(h.bus.publish(transfer(n + 1, n, 100 + n)), 1);
    }
    h.bus.publish(ChainEvent::ChainForkDetected(ForkedEvent {
        fork_block: 100,
        detected_block: 105,
    }));

    // Every queued transfer is handled, then rolled back
    for _ in 0..10 {
        tokio::time::timeout(Duration::from_secs(5), views.recv())
            .await
            .expect("view not notified")
            .unwrap();
    }
    h.settle(0).await;
    assert_eq!(unlock.max_active.load(Ordering::SeqCst), 1);

    h.bus.publish(transfer(6, 5, 110));
    h.settle(1).await;
    assert_eq!(unlock.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_waits_for_queued_events() {
    let h = harness();
    for n in 0..3 {
        h.bus.publish(transfer(n + 1, n, 100));
    }

    h.manager.stop().await;

    assert_eq!(h.repo.all_tx_entities().await.len(), 3);
    assert!(!h.manager.is_running());
}

#[tokio::test]
async fn test_stopped_manager_receives_nothing() {
    let h = harness();
    h.manager.stop().await;

    assert_eq!(h.bus.publish(transfer(1, 0, 100)), 0);
    assert!(h.repo.all_tx_entities().await.is_empty());
}
