//! Transaction entity and view types
//!
//! An entity is the owner-agnostic record of a transaction log; a view is
//! the projection of that log onto one affected owner's history.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ids::{Address, OrderHash, TxHash};

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    /// Success or failed: the transaction is in a block
    pub fn is_mined(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which transactions a nonce watermark covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonceClass {
    /// Pending, success and failed alike
    Any,
    /// Only transactions already in a block
    Mined,
}

impl NonceClass {
    pub fn covers(&self, status: TxStatus) -> bool {
        match self {
            NonceClass::Any => true,
            NonceClass::Mined => status.is_mined(),
        }
    }
}

/// Kind of user-facing history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Approve,
    Cancel,
    Cutoff,
    CutoffPair,
    Deposit,
    Withdrawal,
    Transfer,
    EthTransfer,
    UnsupportedContract,
    OrderFilled,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Approve => "approve",
            TxType::Cancel => "cancel",
            TxType::Cutoff => "cutoff",
            TxType::CutoffPair => "cutoff_pair",
            TxType::Deposit => "deposit",
            TxType::Withdrawal => "withdrawal",
            TxType::Transfer => "transfer",
            TxType::EthTransfer => "eth_transfer",
            TxType::UnsupportedContract => "unsupported_contract",
            TxType::OrderFilled => "order_filled",
        }
    }
}

impl std::fmt::Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of value relative to the view owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxDirection {
    Send,
    Receive,
    SelfTransfer,
    /// No value moves (approve, cancel, cutoff)
    None,
}

/// Metadata every chain event carries about its transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInfo {
    pub tx_hash: TxHash,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub status: TxStatus,
    /// Zero while pending
    pub block_number: u64,
    pub log_index: u64,
    /// Unix seconds of the block (or of first sighting while pending)
    pub block_time: i64,
}

impl TxInfo {
    pub fn pending(tx_hash: TxHash, from: Address, to: Address, nonce: u64) -> Self {
        Self {
            tx_hash,
            from,
            to,
            nonce,
            status: TxStatus::Pending,
            block_number: 0,
            log_index: 0,
            block_time: 0,
        }
    }

    /// Same transaction observed in a block
    pub fn mined(mut self, status: TxStatus, block_number: u64, log_index: u64) -> Self {
        self.status = status;
        self.block_number = block_number;
        self.log_index = log_index;
        self
    }
}

/// Canonical record of one transaction log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEntity {
    pub hash: TxHash,
    pub log_index: u64,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub status: TxStatus,
    pub block_number: u64,
    pub tx_type: TxType,
    pub value: Decimal,
    /// Kind-specific payload
    pub content: serde_json::Value,
    pub block_time: i64,
}

impl TransactionEntity {
    pub fn from_info(
        info: &TxInfo,
        tx_type: TxType,
        value: Decimal,
        content: serde_json::Value,
    ) -> Self {
        Self {
            hash: info.tx_hash,
            log_index: info.log_index,
            from: info.from,
            to: info.to,
            nonce: info.nonce,
            status: info.status,
            block_number: info.block_number,
            tx_type,
            value,
            content,
            block_time: info.block_time,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == TxStatus::Pending
    }
}

/// One owner's projection of a transaction log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionView {
    pub tx_hash: TxHash,
    pub owner: Address,
    pub log_index: u64,
    pub tx_type: TxType,
    pub direction: TxDirection,
    pub status: TxStatus,
    pub nonce: u64,
    pub block_number: u64,
    /// Token contract; `None` for ether and for non-value entries
    pub token: Option<Address>,
    pub amount: Decimal,
    pub counterparty: Option<Address>,
    pub order_hash: Option<OrderHash>,
    pub block_time: i64,
}

impl TransactionView {
    pub fn from_info(info: &TxInfo, owner: Address, tx_type: TxType) -> Self {
        Self {
            tx_hash: info.tx_hash,
            owner,
            log_index: info.log_index,
            tx_type,
            direction: TxDirection::None,
            status: info.status,
            nonce: info.nonce,
            block_number: info.block_number,
            token: None,
            amount: Decimal::ZERO,
            counterparty: None,
            order_hash: None,
            block_time: info.block_time,
        }
    }

    pub fn with_direction(mut self, direction: TxDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_amount(mut self, token: Option<Address>, amount: Decimal) -> Self {
        self.token = token;
        self.amount = amount;
        self
    }

    pub fn with_counterparty(mut self, counterparty: Address) -> Self {
        self.counterparty = Some(counterparty);
        self
    }

    pub fn with_order(mut self, order_hash: OrderHash) -> Self {
        self.order_hash = Some(order_hash);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> TxInfo {
        TxInfo::pending(
            TxHash::from_low_u64(1),
            Address::from_low_u64(2),
            Address::from_low_u64(3),
            7,
        )
    }

    #[test]
    fn test_status_is_mined() {
        assert!(!TxStatus::Pending.is_mined());
        assert!(TxStatus::Success.is_mined());
        assert!(TxStatus::Failed.is_mined());
    }

    #[test]
    fn test_info_mined_transition() {
        let mined = info().mined(TxStatus::Success, 100, 4);
        assert_eq!(mined.status, TxStatus::Success);
        assert_eq!(mined.block_number, 100);
        assert_eq!(mined.log_index, 4);
        assert_eq!(mined.nonce, 7);
    }

    #[test]
    fn test_entity_copies_info() {
        let info = info();
        let entity = TransactionEntity::from_info(
            &info,
            TxType::Approve,
            Decimal::ZERO,
            serde_json::json!({}),
        );
        assert_eq!(entity.hash, info.tx_hash);
        assert_eq!(entity.from, info.from);
        assert!(entity.is_pending());
    }

    #[test]
    fn test_view_builders() {
        let counterparty = Address::from_low_u64(9);
        let view = TransactionView::from_info(&info(), Address::from_low_u64(2), TxType::Transfer)
            .with_direction(TxDirection::Send)
            .with_amount(Some(Address::from_low_u64(5)), Decimal::from(3))
            .with_counterparty(counterparty);
        assert_eq!(view.direction, TxDirection::Send);
        assert_eq!(view.amount, Decimal::from(3));
        assert_eq!(view.counterparty, Some(counterparty));
    }
}
