//! Correlation engine scenarios against the in-memory stores
//!
//! Tests include:
//! - Idempotent pending add
//! - Lowest nonce wins for the owner's own transactions
//! - Mined transactions clearing rows and the pending-order set
//! - Miner settlements never overriding an owner's in-flight action
//! - Cutoffs selecting orders by time and market
//! - Flex cancel and order query cache invalidation

use std::sync::Arc;

use order_manager::{
    CorrelationEngine, CorrelationOutcome, OrderManagerConfig, OrderTx, OrderTxCorrelator,
    OrderWriter, SweepOutcome,
};
use rust_decimal::Decimal;
use storage::keys::{self, ORDER_QUERY_PREFIX};
use storage::{Cache, MemoryCache, MemoryRepository, NO_EXPIRY};
use types::errors::RelayError;
use types::ids::{Address, OrderHash, TxHash};
use types::order::{FlexCancelKind, FlexCancelRequest, Order, OrderStatus};
use types::transaction::{TxInfo, TxStatus};

const OWNER: u64 = 0x0a;
const MINER: u64 = 0x3e;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn addr(n: u64) -> Address {
    Address::from_low_u64(n)
}

fn order_hash() -> OrderHash {
    OrderHash::from_low_u64(0x0d)
}

fn pending(from: u64, tx: u64, nonce: u64) -> TxInfo {
    TxInfo::pending(TxHash::from_low_u64(tx), addr(from), addr(0xcc), nonce)
}

fn mined(from: u64, tx: u64, nonce: u64, status: TxStatus) -> TxInfo {
    pending(from, tx, nonce).mined(status, 100, 0)
}

struct Harness {
    repo: Arc<MemoryRepository>,
    cache: Arc<MemoryCache>,
    engine: CorrelationEngine,
    writer: OrderWriter,
}

impl Harness {
    async fn new() -> Self {
        init_tracing();
        let repo = Arc::new(MemoryRepository::new());
        let cache = Arc::new(MemoryCache::with_defaults());
        repo.insert_order(Order::new(
            order_hash(),
            addr(OWNER),
            addr(100),
            addr(200),
            Decimal::from(1000),
            1_000,
        ))
        .await;

        let config = OrderManagerConfig::default();
        let engine =
            CorrelationEngine::new(config.clone(), repo.clone(), repo.clone(), cache.clone());
        let writer = OrderWriter::new(config, repo.clone(), cache.clone());
        Self {
            repo,
            cache,
            engine,
            writer,
        }
    }

    async fn status(&self) -> OrderStatus {
        self.repo.order(&order_hash()).await.unwrap().status
    }

    async fn rows(&self) -> usize {
        self.repo.all_pending_order_txs().await.len()
    }

    async fn in_pending_set(&self, owner: u64) -> bool {
        self.engine
            .pending_orders()
            .exists(&addr(owner), &order_hash())
            .await
            .unwrap()
    }

    async fn related(&self, info: &TxInfo, status: OrderStatus) -> CorrelationOutcome {
        self.engine
            .handle_order_related(&OrderTx::related(info, order_hash(), status))
            .await
            .unwrap()
    }

    async fn cutoff(&self, info: &TxInfo, selection: FlexCancelKind) -> SweepOutcome {
        self.engine
            .handle_cutoff(info, &addr(OWNER), &selection)
            .await
            .unwrap()
    }

    async fn seed_query_page(&self) -> String {
        let key = keys::owner_query(ORDER_QUERY_PREFIX, &addr(OWNER), ":PAGE=1");
        self.cache.set(&key, b"{}".to_vec(), NO_EXPIRY).await.unwrap();
        key
    }
}

#[tokio::test]
async fn test_pending_cancel_sets_cancelling() {
    let h = Harness::new().await;

    let outcome = h.related(&pending(OWNER, 1, 5), OrderStatus::Cancelling).await;

    assert_eq!(outcome, CorrelationOutcome::StatusChanged(OrderStatus::Cancelling));
    assert_eq!(h.status().await, OrderStatus::Cancelling);
    assert_eq!(h.rows().await, 1);
    assert!(h.in_pending_set(OWNER).await);
}

#[tokio::test]
async fn test_duplicate_pending_add_is_idempotent() {
    let h = Harness::new().await;
    let info = pending(OWNER, 1, 5);

    h.related(&info, OrderStatus::Cancelling).await;
    let outcome = h.related(&info, OrderStatus::Cancelling).await;

    assert_eq!(outcome, CorrelationOutcome::Duplicate);
    assert_eq!(h.rows().await, 1);
    assert_eq!(h.status().await, OrderStatus::Cancelling);
}

#[tokio::test]
async fn test_lowest_nonce_wins_regardless_of_arrival() {
    let h = Harness::new().await;

    // Higher nonce arrives first
    h.related(&pending(OWNER, 2, 7), OrderStatus::Cancelling).await;
    assert_eq!(h.status().await, OrderStatus::Cancelling);

    h.related(&pending(OWNER, 1, 5), OrderStatus::CutoffIng).await;
    assert_eq!(h.status().await, OrderStatus::CutoffIng);
}

#[tokio::test]
async fn test_mined_cancel_clears_rows_and_set() {
    let h = Harness::new().await;
    h.related(&pending(OWNER, 1, 5), OrderStatus::Cancelling).await;

    let outcome = h
        .related(&mined(OWNER, 1, 5, TxStatus::Success), OrderStatus::Cancelled)
        .await;

    assert_eq!(outcome, CorrelationOutcome::StatusChanged(OrderStatus::Cancelled));
    assert_eq!(h.rows().await, 0);
    assert!(!h.in_pending_set(OWNER).await);
}

#[tokio::test]
async fn test_failed_cancel_settles_from_amounts() {
    let h = Harness::new().await;
    h.related(&pending(OWNER, 1, 5), OrderStatus::Cancelling).await;

    h.related(&mined(OWNER, 1, 5, TxStatus::Failed), OrderStatus::Cancelled)
        .await;

    assert_eq!(h.status().await, OrderStatus::New);
}

#[tokio::test]
async fn test_correlated_tx_supersedes_lower_nonces_only() {
    let h = Harness::new().await;
    h.related(&pending(OWNER, 1, 5), OrderStatus::CutoffIng).await;
    h.related(&pending(OWNER, 2, 8), OrderStatus::Cancelling).await;
    assert_eq!(h.status().await, OrderStatus::CutoffIng);

    // An unrelated transaction with nonce 6 replaced the nonce-5 one
    let sweep = h
        .engine
        .handle_correlated(&mined(OWNER, 9, 6, TxStatus::Success))
        .await
        .unwrap();

    assert_eq!(
        sweep,
        SweepOutcome::Swept {
            orders: 1,
            changed: 1,
            failed: 0
        }
    );
    assert_eq!(h.rows().await, 1);
    assert_eq!(h.status().await, OrderStatus::Cancelling);
    assert!(h.in_pending_set(OWNER).await);
}

#[tokio::test]
async fn test_correlated_tx_empties_pending_set() {
    let h = Harness::new().await;
    h.related(&pending(OWNER, 1, 5), OrderStatus::Cancelling).await;

    h.engine
        .handle_correlated(&mined(OWNER, 9, 5, TxStatus::Success))
        .await
        .unwrap();

    assert_eq!(h.rows().await, 0);
    assert!(!h.in_pending_set(OWNER).await);
    assert_eq!(h.status().await, OrderStatus::New);
}

#[tokio::test]
async fn test_correlated_pending_tx_is_ignored() {
    let h = Harness::new().await;
    h.related(&pending(OWNER, 1, 5), OrderStatus::Cancelling).await;

    let sweep = h
        .engine
        .handle_correlated(&pending(OWNER, 9, 5))
        .await
        .unwrap();

    assert_eq!(sweep, SweepOutcome::Ignored);
    assert_eq!(h.rows().await, 1);
}

#[tokio::test]
async fn test_correlated_sender_without_pending_orders() {
    let h = Harness::new().await;
    let sweep = h
        .engine
        .handle_correlated(&mined(0x77, 9, 5, TxStatus::Success))
        .await
        .unwrap();
    assert_eq!(
        sweep,
        SweepOutcome::Swept {
            orders: 0,
            changed: 0,
            failed: 0
        }
    );
}

#[tokio::test]
async fn test_miner_does_not_override_owner_cancel() {
    let h = Harness::new().await;
    h.related(&pending(OWNER, 1, 5), OrderStatus::Cancelling).await;

    let outcome = h.related(&pending(MINER, 2, 5), OrderStatus::Pending).await;

    assert_eq!(outcome, CorrelationOutcome::Unchanged);
    assert_eq!(h.status().await, OrderStatus::Cancelling);
    assert!(h.in_pending_set(MINER).await);
}

#[tokio::test]
async fn test_owner_cancel_overrides_miner_pending() {
    let h = Harness::new().await;
    h.related(&pending(MINER, 2, 5), OrderStatus::Pending).await;
    assert_eq!(h.status().await, OrderStatus::Pending);

    h.related(&pending(OWNER, 1, 5), OrderStatus::Cancelling).await;
    assert_eq!(h.status().await, OrderStatus::Cancelling);
}

#[tokio::test]
async fn test_mined_fill_adopts_carried_status() {
    let h = Harness::new().await;
    h.related(&pending(MINER, 2, 3), OrderStatus::Pending).await;

    let outcome = h
        .related(&mined(MINER, 2, 3, TxStatus::Success), OrderStatus::PartiallyFilled)
        .await;

    assert_eq!(
        outcome,
        CorrelationOutcome::StatusChanged(OrderStatus::PartiallyFilled)
    );
    assert!(!h.in_pending_set(MINER).await);
}

#[tokio::test]
async fn test_status_change_invalidates_order_queries() {
    let h = Harness::new().await;
    let key = h.seed_query_page().await;

    h.related(&pending(OWNER, 1, 5), OrderStatus::Cancelling).await;

    assert!(!h.cache.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_unchanged_status_keeps_order_queries() {
    let h = Harness::new().await;
    h.related(&pending(OWNER, 1, 5), OrderStatus::Cancelling).await;
    let key = h.seed_query_page().await;

    h.related(&pending(OWNER, 1, 5), OrderStatus::Cancelling).await;

    assert!(h.cache.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_zero_order_hash_is_invalid() {
    let h = Harness::new().await;
    let tx = OrderTx::related(&pending(OWNER, 1, 5), OrderHash::ZERO, OrderStatus::Cancelling);

    let err = h.engine.handle_order_related(&tx).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidInput(_)));
    assert_eq!(h.rows().await, 0);
}

#[tokio::test]
async fn test_unknown_order_is_reported() {
    let h = Harness::new().await;
    let tx = OrderTx::related(
        &pending(OWNER, 1, 5),
        OrderHash::from_low_u64(0xee),
        OrderStatus::Cancelling,
    );

    let err = h.engine.handle_order_related(&tx).await.unwrap_err();
    assert!(matches!(err, RelayError::OrderNotFound { .. }));
}

#[tokio::test]
async fn test_repository_outage_surfaces_retryable_error() {
    let h = Harness::new().await;
    h.repo.set_unavailable(true);

    let tx = OrderTx::related(&pending(OWNER, 1, 5), order_hash(), OrderStatus::Cancelling);
    let err = h.engine.handle_order_related(&tx).await.unwrap_err();
    assert!(err.is_retryable());

    // Redelivery after recovery converges
    h.repo.set_unavailable(false);
    h.engine.handle_order_related(&tx).await.unwrap();
    assert_eq!(h.status().await, OrderStatus::Cancelling);
}

#[tokio::test]
async fn test_pending_cutoff_then_mined_cutoff() {
    let h = Harness::new().await;
    let by_time = FlexCancelKind::ByTime { cutoff: 2_000 };

    let outcome = h.cutoff(&pending(OWNER, 1, 5), by_time).await;
    assert_eq!(
        outcome,
        SweepOutcome::Swept {
            orders: 1,
            changed: 1,
            failed: 0
        }
    );
    assert_eq!(h.status().await, OrderStatus::CutoffIng);
    assert_eq!(h.rows().await, 1);
    assert!(h.in_pending_set(OWNER).await);

    h.cutoff(&mined(OWNER, 1, 5, TxStatus::Success), by_time).await;
    assert_eq!(h.status().await, OrderStatus::Cutoff);
    assert_eq!(h.rows().await, 0);
    assert!(!h.in_pending_set(OWNER).await);
}

#[tokio::test]
async fn test_failed_cutoff_reopens_order() {
    let h = Harness::new().await;
    let by_time = FlexCancelKind::ByTime { cutoff: 2_000 };

    h.cutoff(&pending(OWNER, 1, 5), by_time).await;
    h.cutoff(&mined(OWNER, 1, 5, TxStatus::Failed), by_time).await;
    assert_eq!(h.status().await, OrderStatus::New);
    assert_eq!(h.rows().await, 0);
}

#[tokio::test]
async fn test_mined_pair_cutoff_without_pending_row() {
    let h = Harness::new().await;
    let key = h.seed_query_page().await;

    // Token order of the pair does not matter
    let by_market = FlexCancelKind::ByMarket {
        token_s: addr(200),
        token_b: addr(100),
        cutoff: 2_000,
    };
    let outcome = h
        .cutoff(&mined(OWNER, 1, 5, TxStatus::Success), by_market)
        .await;
    assert_eq!(
        outcome,
        SweepOutcome::Swept {
            orders: 1,
            changed: 1,
            failed: 0
        }
    );
    assert_eq!(h.status().await, OrderStatus::Cutoff);
    assert!(!h.cache.exists(&key).await.unwrap());
}

#[tokio::test]
async fn test_cutoff_outside_selection_is_noop() {
    let h = Harness::new().await;

    let too_early = FlexCancelKind::ByTime { cutoff: 500 };
    let other_market = FlexCancelKind::ByMarket {
        token_s: addr(100),
        token_b: addr(300),
        cutoff: 2_000,
    };
    for selection in [too_early, other_market] {
        let outcome = h
            .cutoff(&mined(OWNER, 1, 5, TxStatus::Success), selection)
            .await;
        assert_eq!(
            outcome,
            SweepOutcome::Swept {
                orders: 0,
                changed: 0,
                failed: 0
            }
        );
    }
    assert_eq!(h.status().await, OrderStatus::New);
}

#[tokio::test]
async fn test_flex_cancel_by_hash() {
    let h = Harness::new().await;
    let key = h.seed_query_page().await;

    let request = FlexCancelRequest {
        owner: addr(OWNER),
        kind: FlexCancelKind::ByHash {
            order_hash: order_hash(),
        },
    };
    assert_eq!(h.writer.flex_cancel(&request).await.unwrap(), 1);
    assert_eq!(h.status().await, OrderStatus::FlexCancelled);
    assert!(!h.cache.exists(&key).await.unwrap());

    // Nothing left to cancel
    let err = h.writer.flex_cancel(&request).await.unwrap_err();
    assert_eq!(err, RelayError::NoValidOrder);
}

#[tokio::test]
async fn test_flex_cancel_skips_cancelling_orders() {
    let h = Harness::new().await;
    h.related(&pending(OWNER, 1, 5), OrderStatus::Cancelling).await;

    let request = FlexCancelRequest {
        owner: addr(OWNER),
        kind: FlexCancelKind::ByOwner,
    };
    assert_eq!(
        h.writer.flex_cancel(&request).await.unwrap_err(),
        RelayError::NoValidOrder
    );
}

#[tokio::test]
async fn test_flex_cancel_rejects_bad_request() {
    let h = Harness::new().await;
    let request = FlexCancelRequest {
        owner: Address::ZERO,
        kind: FlexCancelKind::ByOwner,
    };
    assert!(matches!(
        h.writer.flex_cancel(&request).await.unwrap_err(),
        RelayError::InvalidInput(_)
    ));
}
