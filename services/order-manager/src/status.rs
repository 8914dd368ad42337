//! Order status derivation
//!
//! Pure functions: given the outstanding transactions of one sender for one
//! order and the order's persisted state, decide the status to write.

use types::ids::Address;
use types::order::{Order, OrderPendingTransaction, OrderStatus};
use types::transaction::TxStatus;

/// Sort outstanding rows so the first one decides the status
///
/// Lowest nonce first, then by transaction hash. Rows always belong to a
/// single sender.
pub fn sort_pending(rows: &mut [OrderPendingTransaction]) {
    rows.sort_by(|a, b| a.nonce.cmp(&b.nonce).then_with(|| a.tx_hash.cmp(&b.tx_hash)));
}

/// Status an order settles into once nothing is outstanding
///
/// A successful transaction that carries a final status (a mined cancel
/// carries `Cancelled`, a mined fill carries `Filled` or `PartiallyFilled`)
/// wins; otherwise the fill amounts decide.
pub fn settled_status(order: &Order, tx_status: TxStatus, carried: Option<OrderStatus>) -> OrderStatus {
    match carried {
        Some(status) if tx_status == TxStatus::Success && !status.is_pending_class() => status,
        _ => order.settled_status(),
    }
}

/// Decide the new status of `order`
///
/// `sorted` holds the remaining outstanding rows of `event_owner`, sorted
/// with `sort_pending`. Returns `None` when the persisted status must stay.
pub fn derive_status(
    order: &Order,
    event_owner: &Address,
    sorted: &[OrderPendingTransaction],
    tx_status: TxStatus,
    carried: Option<OrderStatus>,
) -> Option<OrderStatus> {
    let current = order.status;

    let next = match sorted.first() {
        None => {
            if !current.is_pending_class() {
                return None;
            }
            settled_status(order, tx_status, carried)
        }
        // Owner cancelling or cutting off
        Some(first) if order.owner == *event_owner => first.order_status,
        // Miner settlement; never overrides the owner's in-flight action
        Some(first) => {
            if current.is_pending_class() {
                return None;
            }
            first.order_status
        }
    };

    (next != current).then_some(next)
}
