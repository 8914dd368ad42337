//! Event to entity/view conversion
//!
//! Pure functions, one per event kind. Each yields the canonical entity and
//! the per-owner views before any visibility filtering.

use rust_decimal::Decimal;
use serde_json::json;
use types::errors::{RelayError, RelayResult};
use types::events::{
    ApprovalEvent, CutoffEvent, CutoffPairEvent, EthTransferEvent, OrderCancelledEvent,
    OrderFilledEvent, TransferEvent, UnsupportedContractEvent, WethDepositEvent,
    WethWithdrawalEvent,
};
use types::ids::Address;
use types::transaction::{TransactionEntity, TransactionView, TxDirection, TxInfo, TxType};

/// Entity plus views of one event
#[derive(Debug, Clone, PartialEq)]
pub struct Converted {
    pub entity: TransactionEntity,
    pub views: Vec<TransactionView>,
}

/// Fills of one ring share a log index; spread them apart
///
/// `fill_index` is a single decimal digit.
pub fn pack_fill_log_index(log_index: u64, fill_index: u64) -> RelayResult<u64> {
    if fill_index > 9 {
        return Err(RelayError::invalid(format!(
            "fill index {fill_index} does not fit one digit"
        )));
    }
    log_index
        .checked_mul(10)
        .and_then(|packed| packed.checked_add(fill_index))
        .ok_or_else(|| RelayError::invalid(format!("log index {log_index} too large to pack")))
}

fn require_sender(tx: &TxInfo) -> RelayResult<()> {
    if tx.from.is_zero() {
        return Err(RelayError::invalid(format!("tx {} sender is zero", tx.tx_hash)));
    }
    Ok(())
}

fn require_owner(tx: &TxInfo, owner: &Address, role: &str) -> RelayResult<()> {
    if owner.is_zero() {
        return Err(RelayError::invalid(format!(
            "tx {} {} is zero",
            tx.tx_hash, role
        )));
    }
    Ok(())
}

fn require_cutoff(tx: &TxInfo, cutoff: i64) -> RelayResult<()> {
    if cutoff <= 0 {
        return Err(RelayError::invalid(format!(
            "tx {} cutoff {} must be positive",
            tx.tx_hash, cutoff
        )));
    }
    Ok(())
}

/// Sender/receiver views of a value transfer; one view for a self transfer
fn transfer_views(
    tx: &TxInfo,
    tx_type: TxType,
    token: Option<Address>,
    sender: Address,
    receiver: Address,
    amount: Decimal,
) -> Vec<TransactionView> {
    if sender == receiver {
        return vec![TransactionView::from_info(tx, sender, tx_type)
            .with_direction(TxDirection::SelfTransfer)
            .with_amount(token, amount)
            .with_counterparty(receiver)];
    }
    vec![
        TransactionView::from_info(tx, sender, tx_type)
            .with_direction(TxDirection::Send)
            .with_amount(token, amount)
            .with_counterparty(receiver),
        TransactionView::from_info(tx, receiver, tx_type)
            .with_direction(TxDirection::Receive)
            .with_amount(token, amount)
            .with_counterparty(sender),
    ]
}

pub fn approve(event: &ApprovalEvent) -> RelayResult<Converted> {
    let tx = &event.tx;
    require_sender(tx)?;
    require_owner(tx, &event.owner, "approval owner")?;

    let entity = TransactionEntity::from_info(
        tx,
        TxType::Approve,
        event.amount,
        json!({
            "owner": event.owner,
            "spender": event.spender,
            "token": event.token,
            "amount": event.amount,
        }),
    );
    let view = TransactionView::from_info(tx, event.owner, TxType::Approve)
        .with_amount(Some(event.token), event.amount)
        .with_counterparty(event.spender);
    Ok(Converted {
        entity,
        views: vec![view],
    })
}

pub fn cancel(event: &OrderCancelledEvent) -> RelayResult<Converted> {
    let tx = &event.tx;
    require_sender(tx)?;
    if event.order_hash.is_zero() {
        return Err(RelayError::invalid(format!(
            "tx {} cancels a zero order hash",
            tx.tx_hash
        )));
    }

    let entity = TransactionEntity::from_info(
        tx,
        TxType::Cancel,
        event.cancelled_amount,
        json!({
            "order_hash": event.order_hash,
            "cancelled_amount": event.cancelled_amount,
        }),
    );
    let view = TransactionView::from_info(tx, tx.from, TxType::Cancel)
        .with_amount(None, event.cancelled_amount)
        .with_order(event.order_hash);
    Ok(Converted {
        entity,
        views: vec![view],
    })
}

pub fn cutoff_all(event: &CutoffEvent) -> RelayResult<Converted> {
    let tx = &event.tx;
    require_sender(tx)?;
    require_owner(tx, &event.owner, "cutoff owner")?;
    require_cutoff(tx, event.cutoff)?;

    let entity = TransactionEntity::from_info(
        tx,
        TxType::Cutoff,
        Decimal::ZERO,
        json!({ "owner": event.owner, "cutoff": event.cutoff }),
    );
    let view = TransactionView::from_info(tx, event.owner, TxType::Cutoff);
    Ok(Converted {
        entity,
        views: vec![view],
    })
}

pub fn cutoff_pair(event: &CutoffPairEvent) -> RelayResult<Converted> {
    let tx = &event.tx;
    require_sender(tx)?;
    require_owner(tx, &event.owner, "cutoff owner")?;
    require_cutoff(tx, event.cutoff)?;
    if event.token1.is_zero() || event.token2.is_zero() || event.token1 == event.token2 {
        return Err(RelayError::invalid(format!(
            "tx {} cutoff pair {}/{} is invalid",
            tx.tx_hash, event.token1, event.token2
        )));
    }

    let entity = TransactionEntity::from_info(
        tx,
        TxType::CutoffPair,
        Decimal::ZERO,
        json!({
            "owner": event.owner,
            "token1": event.token1,
            "token2": event.token2,
            "cutoff": event.cutoff,
        }),
    );
    let view = TransactionView::from_info(tx, event.owner, TxType::CutoffPair);
    Ok(Converted {
        entity,
        views: vec![view],
    })
}

pub fn weth_deposit(event: &WethDepositEvent) -> RelayResult<Converted> {
    let tx = &event.tx;
    require_sender(tx)?;
    require_owner(tx, &event.dst, "deposit destination")?;

    let entity = TransactionEntity::from_info(
        tx,
        TxType::Deposit,
        event.amount,
        json!({ "dst": event.dst, "amount": event.amount }),
    );
    // The WETH contract is the transaction target
    let view = TransactionView::from_info(tx, event.dst, TxType::Deposit)
        .with_direction(TxDirection::Receive)
        .with_amount(Some(tx.to), event.amount);
    Ok(Converted {
        entity,
        views: vec![view],
    })
}

pub fn weth_withdrawal(event: &WethWithdrawalEvent) -> RelayResult<Converted> {
    let tx = &event.tx;
    require_sender(tx)?;
    require_owner(tx, &event.src, "withdrawal source")?;

    let entity = TransactionEntity::from_info(
        tx,
        TxType::Withdrawal,
        event.amount,
        json!({ "src": event.src, "amount": event.amount }),
    );
    let view = TransactionView::from_info(tx, event.src, TxType::Withdrawal)
        .with_direction(TxDirection::Send)
        .with_amount(Some(tx.to), event.amount);
    Ok(Converted {
        entity,
        views: vec![view],
    })
}

pub fn transfer(event: &TransferEvent) -> RelayResult<Converted> {
    let tx = &event.tx;
    require_sender(tx)?;
    require_owner(tx, &event.sender, "transfer sender")?;
    require_owner(tx, &event.receiver, "transfer receiver")?;

    let entity = TransactionEntity::from_info(
        tx,
        TxType::Transfer,
        event.amount,
        json!({
            "token": event.token,
            "sender": event.sender,
            "receiver": event.receiver,
            "amount": event.amount,
        }),
    );
    let views = transfer_views(
        tx,
        TxType::Transfer,
        Some(event.token),
        event.sender,
        event.receiver,
        event.amount,
    );
    Ok(Converted { entity, views })
}

/// Plain ether transfer; a zero-value call is an unsupported contract call
pub fn eth_transfer(event: &EthTransferEvent) -> RelayResult<Converted> {
    let tx = &event.tx;
    if event.value.is_zero() {
        return unsupported_contract(&UnsupportedContractEvent { tx: tx.clone() });
    }
    require_sender(tx)?;
    require_owner(tx, &tx.to, "ether receiver")?;

    let entity = TransactionEntity::from_info(
        tx,
        TxType::EthTransfer,
        event.value,
        json!({ "value": event.value }),
    );
    let views = transfer_views(tx, TxType::EthTransfer, None, tx.from, tx.to, event.value);
    Ok(Converted { entity, views })
}

pub fn unsupported_contract(event: &UnsupportedContractEvent) -> RelayResult<Converted> {
    let tx = &event.tx;
    require_sender(tx)?;

    let entity = TransactionEntity::from_info(
        tx,
        TxType::UnsupportedContract,
        Decimal::ZERO,
        json!({ "contract": tx.to }),
    );
    let view = TransactionView::from_info(tx, tx.from, TxType::UnsupportedContract)
        .with_direction(TxDirection::Send)
        .with_counterparty(tx.to);
    Ok(Converted {
        entity,
        views: vec![view],
    })
}

pub fn order_filled(event: &OrderFilledEvent) -> RelayResult<Converted> {
    let mut tx = event.tx.clone();
    require_sender(&tx)?;
    require_owner(&tx, &event.owner, "fill owner")?;
    if event.order_hash.is_zero() {
        return Err(RelayError::invalid(format!(
            "tx {} fills a zero order hash",
            tx.tx_hash
        )));
    }
    tx.log_index = pack_fill_log_index(tx.log_index, event.fill_index)?;

    let entity = TransactionEntity::from_info(
        &tx,
        TxType::OrderFilled,
        event.amount_s,
        json!({
            "ring_hash": event.ring_hash,
            "order_hash": event.order_hash,
            "owner": event.owner,
            "fill_index": event.fill_index,
            "token_s": event.token_s,
            "token_b": event.token_b,
            "amount_s": event.amount_s,
            "amount_b": event.amount_b,
            "order_status": event.order_status,
        }),
    );
    let view = TransactionView::from_info(&tx, event.owner, TxType::OrderFilled)
        .with_direction(TxDirection::Send)
        .with_amount(Some(event.token_s), event.amount_s)
        .with_order(event.order_hash);
    Ok(Converted {
        entity,
        views: vec![view],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{Hash, OrderHash, TxHash};
    use types::order::OrderStatus;
    use types::transaction::TxStatus;

    fn addr(n: u64) -> Address {
        Address::from_low_u64(n)
    }

    fn tx(from: u64, to: u64) -> TxInfo {
        TxInfo::pending(TxHash::from_low_u64(1), addr(from), addr(to), 3)
    }

    fn fill(log_index: u64, fill_index: u64) -> OrderFilledEvent {
        OrderFilledEvent {
            tx: tx(0x3e, 0x99).mined(TxStatus::Success, 100, log_index),
            ring_hash: Hash::from_low_u64(7),
            order_hash: OrderHash::from_low_u64(8),
            owner: addr(0x0a),
            fill_index,
            token_s: addr(100),
            token_b: addr(200),
            amount_s: Decimal::from(5),
            amount_b: Decimal::from(6),
            order_status: OrderStatus::PartiallyFilled,
        }
    }

    #[test]
    fn test_fill_log_index_packing() {
        assert_eq!(pack_fill_log_index(4, 0).unwrap(), 40);
        assert_eq!(pack_fill_log_index(4, 1).unwrap(), 41);

        let converted = order_filled(&fill(4, 1)).unwrap();
        assert_eq!(converted.entity.log_index, 41);
        assert_eq!(converted.views[0].log_index, 41);
        assert_eq!(converted.views[0].owner, addr(0x0a));
        assert_eq!(converted.entity.from, addr(0x3e));
    }

    #[test]
    fn test_fill_log_index_rejects_collisions_and_overflow() {
        assert!(matches!(
            pack_fill_log_index(4, 10),
            Err(RelayError::InvalidInput(_))
        ));
        assert!(matches!(
            pack_fill_log_index(u64::MAX / 10 + 1, 0),
            Err(RelayError::InvalidInput(_))
        ));
        assert_eq!(
            pack_fill_log_index(u64::MAX / 10, 5).unwrap(),
            u64::MAX / 10 * 10 + 5
        );
        assert!(order_filled(&fill(4, 12)).is_err());
    }

    #[test]
    fn test_transfer_yields_two_views() {
        let event = TransferEvent {
            tx: tx(1, 50),
            token: addr(50),
            sender: addr(1),
            receiver: addr(2),
            amount: Decimal::from(9),
        };
        let converted = transfer(&event).unwrap();
        assert_eq!(converted.views.len(), 2);
        assert_eq!(converted.views[0].direction, TxDirection::Send);
        assert_eq!(converted.views[1].direction, TxDirection::Receive);
        assert_eq!(converted.views[1].counterparty, Some(addr(1)));
    }

    #[test]
    fn test_self_transfer_yields_one_view() {
        let event = TransferEvent {
            tx: tx(1, 50),
            token: addr(50),
            sender: addr(1),
            receiver: addr(1),
            amount: Decimal::from(9),
        };
        let converted = transfer(&event).unwrap();
        assert_eq!(converted.views.len(), 1);
        assert_eq!(converted.views[0].direction, TxDirection::SelfTransfer);
    }

    #[test]
    fn test_zero_value_eth_transfer_is_unsupported_contract() {
        let event = EthTransferEvent {
            tx: tx(1, 2),
            value: Decimal::ZERO,
        };
        let converted = eth_transfer(&event).unwrap();
        assert_eq!(converted.entity.tx_type, TxType::UnsupportedContract);
        assert_eq!(converted.views.len(), 1);
        assert_eq!(converted.views[0].owner, addr(1));
    }

    #[test]
    fn test_eth_transfer_views() {
        let event = EthTransferEvent {
            tx: tx(1, 2),
            value: Decimal::ONE,
        };
        let converted = eth_transfer(&event).unwrap();
        assert_eq!(converted.entity.tx_type, TxType::EthTransfer);
        assert_eq!(converted.views.len(), 2);
        assert!(converted.views.iter().all(|v| v.token.is_none()));
    }

    #[test]
    fn test_cutoff_validation() {
        let bad = CutoffEvent {
            tx: tx(1, 2),
            owner: addr(1),
            cutoff: 0,
        };
        assert!(matches!(cutoff_all(&bad), Err(RelayError::InvalidInput(_))));

        let same_tokens = CutoffPairEvent {
            tx: tx(1, 2),
            owner: addr(1),
            token1: addr(5),
            token2: addr(5),
            cutoff: 10,
        };
        assert!(cutoff_pair(&same_tokens).is_err());

        let ok = CutoffPairEvent {
            token2: addr(6),
            ..same_tokens
        };
        assert_eq!(cutoff_pair(&ok).unwrap().views.len(), 1);
    }

    #[test]
    fn test_zero_sender_rejected() {
        let event = UnsupportedContractEvent { tx: tx(0, 2) };
        assert!(matches!(
            unsupported_contract(&event),
            Err(RelayError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_cancel_view_names_order() {
        let event = OrderCancelledEvent {
            tx: tx(1, 2),
            order_hash: OrderHash::from_low_u64(8),
            cancelled_amount: Decimal::from(3),
        };
        let converted = cancel(&event).unwrap();
        assert_eq!(converted.views[0].order_hash, Some(OrderHash::from_low_u64(8)));
        assert_eq!(converted.views[0].owner, addr(1));
    }
}
