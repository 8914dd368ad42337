//! Chain events consumed by the relay core
//!
//! `ChainEvent` is a closed tagged union; every consumer matches it
//! exhaustively. `Topic` is the matching closed set of bus topics.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{Address, Hash, OrderHash};
use crate::order::OrderStatus;
use crate::transaction::TxInfo;

/// ERC20 approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub tx: TxInfo,
    pub owner: Address,
    pub spender: Address,
    pub token: Address,
    pub amount: Decimal,
}

/// On-chain cancel of a single order, sent by the order owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub tx: TxInfo,
    pub order_hash: OrderHash,
    pub cancelled_amount: Decimal,
}

/// Cutoff of every order of `owner` valid before `cutoff`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoffEvent {
    pub tx: TxInfo,
    pub owner: Address,
    /// Unix seconds
    pub cutoff: i64,
}

/// Cutoff restricted to one token pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoffPairEvent {
    pub tx: TxInfo,
    pub owner: Address,
    pub token1: Address,
    pub token2: Address,
    pub cutoff: i64,
}

/// Ether wrapped into WETH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WethDepositEvent {
    pub tx: TxInfo,
    pub dst: Address,
    pub amount: Decimal,
}

/// WETH unwrapped into ether
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WethWithdrawalEvent {
    pub tx: TxInfo,
    pub src: Address,
    pub amount: Decimal,
}

/// ERC20 transfer log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub tx: TxInfo,
    pub token: Address,
    pub sender: Address,
    pub receiver: Address,
    pub amount: Decimal,
}

/// Plain transaction carrying ether from `tx.from` to `tx.to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthTransferEvent {
    pub tx: TxInfo,
    pub value: Decimal,
}

/// Call into a contract the relay does not decode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsupportedContractEvent {
    pub tx: TxInfo,
}

/// One order's share of a ring settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilledEvent {
    pub tx: TxInfo,
    pub ring_hash: Hash,
    pub order_hash: OrderHash,
    /// Order owner; `tx.from` is the miner
    pub owner: Address,
    /// Position of this fill within the ring; rings share one log index
    pub fill_index: u64,
    pub token_s: Address,
    pub token_b: Address,
    pub amount_s: Decimal,
    pub amount_b: Decimal,
    /// Status of the order once this fill is mined
    pub order_status: OrderStatus,
}

/// Canonical chain history changed between the two blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkedEvent {
    pub fork_block: u64,
    pub detected_block: u64,
}

/// Every event the extractor delivers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ChainEvent {
    Approve(ApprovalEvent),
    CancelOrder(OrderCancelledEvent),
    CutoffAll(CutoffEvent),
    CutoffPair(CutoffPairEvent),
    WethDeposit(WethDepositEvent),
    WethWithdrawal(WethWithdrawalEvent),
    Transfer(TransferEvent),
    EthTransfer(EthTransferEvent),
    UnsupportedContract(UnsupportedContractEvent),
    OrderFilled(OrderFilledEvent),
    ChainForkDetected(ForkedEvent),
}

impl ChainEvent {
    pub fn topic(&self) -> Topic {
        match self {
            ChainEvent::Approve(_) => Topic::Approve,
            ChainEvent::CancelOrder(_) => Topic::CancelOrder,
            ChainEvent::CutoffAll(_) => Topic::CutoffAll,
            ChainEvent::CutoffPair(_) => Topic::CutoffPair,
            ChainEvent::WethDeposit(_) => Topic::WethDeposit,
            ChainEvent::WethWithdrawal(_) => Topic::WethWithdrawal,
            ChainEvent::Transfer(_) => Topic::Transfer,
            ChainEvent::EthTransfer(_) => Topic::EthTransfer,
            ChainEvent::UnsupportedContract(_) => Topic::UnsupportedContract,
            ChainEvent::OrderFilled(_) => Topic::OrderFilled,
            ChainEvent::ChainForkDetected(_) => Topic::ChainForkDetected,
        }
    }

    /// Transaction metadata; `None` for fork notifications
    pub fn tx_info(&self) -> Option<&TxInfo> {
        match self {
            ChainEvent::Approve(e) => Some(&e.tx),
            ChainEvent::CancelOrder(e) => Some(&e.tx),
            ChainEvent::CutoffAll(e) => Some(&e.tx),
            ChainEvent::CutoffPair(e) => Some(&e.tx),
            ChainEvent::WethDeposit(e) => Some(&e.tx),
            ChainEvent::WethWithdrawal(e) => Some(&e.tx),
            ChainEvent::Transfer(e) => Some(&e.tx),
            ChainEvent::EthTransfer(e) => Some(&e.tx),
            ChainEvent::UnsupportedContract(e) => Some(&e.tx),
            ChainEvent::OrderFilled(e) => Some(&e.tx),
            ChainEvent::ChainForkDetected(_) => None,
        }
    }
}

/// Bus topics, one per `ChainEvent` variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Topic {
    Approve,
    CancelOrder,
    CutoffAll,
    CutoffPair,
    WethDeposit,
    WethWithdrawal,
    Transfer,
    EthTransfer,
    UnsupportedContract,
    OrderFilled,
    ChainForkDetected,
}

impl Topic {
    pub const ALL: [Topic; 11] = [
        Topic::Approve,
        Topic::CancelOrder,
        Topic::CutoffAll,
        Topic::CutoffPair,
        Topic::WethDeposit,
        Topic::WethWithdrawal,
        Topic::Transfer,
        Topic::EthTransfer,
        Topic::UnsupportedContract,
        Topic::OrderFilled,
        Topic::ChainForkDetected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Approve => "Approve",
            Topic::CancelOrder => "CancelOrder",
            Topic::CutoffAll => "CutoffAll",
            Topic::CutoffPair => "CutoffPair",
            Topic::WethDeposit => "WethDeposit",
            Topic::WethWithdrawal => "WethWithdrawal",
            Topic::Transfer => "Transfer",
            Topic::EthTransfer => "EthTransfer",
            Topic::UnsupportedContract => "UnsupportedContract",
            Topic::OrderFilled => "OrderFilled",
            Topic::ChainForkDetected => "ChainForkDetected",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published event as seen by one subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique per publish (UUID v7); redeliveries get a new id
    pub event_id: Uuid,
    pub published_at: DateTime<Utc>,
    pub event: ChainEvent,
}

impl EventEnvelope {
    pub fn new(event: ChainEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            published_at: Utc::now(),
            event,
        }
    }

    pub fn topic(&self) -> Topic {
        self.event.topic()
    }
}
