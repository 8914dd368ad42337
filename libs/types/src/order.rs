//! Order lifecycle types
//!
//! An order is created elsewhere (order submission is not part of this core);
//! here it is only ever status-updated. Outstanding transactions that will
//! change an order's status are tracked as `OrderPendingTransaction` rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::{Address, OrderHash, TxHash};

/// Order status
///
/// The last three variants are the pending class: a transaction that will
/// move the order elsewhere has been broadcast but not mined yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Open, no fills, nothing in flight
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Cutoff,
    Expired,
    /// Cancelled off-chain by the relay on the owner's request
    FlexCancelled,
    /// A miner's ring settlement touching this order is in flight
    Pending,
    /// The owner's cancel transaction is in flight
    Cancelling,
    /// The owner's cutoff transaction is in flight
    #[serde(rename = "CUTOFFING")]
    CutoffIng,
}

impl OrderStatus {
    /// Statuses that only exist while a transaction is outstanding
    pub fn is_pending_class(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::Cancelling | OrderStatus::CutoffIng
        )
    }

    /// Statuses a flex cancel may overwrite
    pub fn is_flex_cancellable(&self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::PartiallyFilled | OrderStatus::Pending
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Cutoff => "CUTOFF",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::FlexCancelled => "FLEX_CANCELLED",
            OrderStatus::Pending => "PENDING",
            OrderStatus::Cancelling => "CANCELLING",
            OrderStatus::CutoffIng => "CUTOFFING",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted order record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub hash: OrderHash,
    pub owner: Address,
    pub token_s: Address,
    pub token_b: Address,
    /// Amount of `token_s` offered
    pub amount: Decimal,
    /// Amount of `token_s` already settled on chain
    pub filled_amount: Decimal,
    pub status: OrderStatus,
    /// Unix seconds; compared against cutoff timestamps
    pub valid_since: i64,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        hash: OrderHash,
        owner: Address,
        token_s: Address,
        token_b: Address,
        amount: Decimal,
        valid_since: i64,
    ) -> Self {
        Self {
            hash,
            owner,
            token_s,
            token_b,
            amount,
            filled_amount: Decimal::ZERO,
            status: OrderStatus::New,
            valid_since,
            updated_at: Utc::now(),
        }
    }

    /// Status implied by the fill amounts alone, with nothing in flight
    pub fn settled_status(&self) -> OrderStatus {
        if self.filled_amount >= self.amount && !self.amount.is_zero() {
            OrderStatus::Filled
        } else if self.filled_amount > Decimal::ZERO {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::New
        }
    }

    /// Whether both tokens match the pair in either direction
    pub fn in_market(&self, token_a: Address, token_b: Address) -> bool {
        (self.token_s == token_a && self.token_b == token_b)
            || (self.token_s == token_b && self.token_b == token_a)
    }
}

/// One outstanding transaction that may still change an order's status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPendingTransaction {
    /// Sender of the transaction (order owner or miner)
    pub owner: Address,
    pub order_hash: OrderHash,
    pub tx_hash: TxHash,
    pub nonce: u64,
    /// Status the order takes while this transaction is outstanding
    pub order_status: OrderStatus,
}

/// Selection mode of a flex cancel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlexCancelKind {
    ByHash { order_hash: OrderHash },
    ByOwner,
    /// Orders with `valid_since` at or before the cutoff
    ByTime { cutoff: i64 },
    ByMarket {
        token_s: Address,
        token_b: Address,
        cutoff: i64,
    },
}

/// Off-chain cancel request issued by an order owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexCancelRequest {
    pub owner: Address,
    pub kind: FlexCancelKind,
}

impl FlexCancelRequest {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.owner.is_zero() {
            return Err(RelayError::invalid("flex cancel owner is zero"));
        }
        match self.kind {
            FlexCancelKind::ByHash { order_hash } if order_hash.is_zero() => {
                Err(RelayError::invalid("flex cancel order hash is zero"))
            }
            FlexCancelKind::ByTime { cutoff } if cutoff <= 0 => {
                Err(RelayError::invalid("flex cancel cutoff must be positive"))
            }
            FlexCancelKind::ByMarket {
                token_s, token_b, ..
            } if token_s.is_zero() || token_b.is_zero() || token_s == token_b => {
                Err(RelayError::invalid("flex cancel market is invalid"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        Order::new(
            OrderHash::from_low_u64(1),
            Address::from_low_u64(10),
            Address::from_low_u64(100),
            Address::from_low_u64(200),
            Decimal::from(100),
            1_700_000_000,
        )
    }

    #[test]
    fn test_pending_class() {
        assert!(OrderStatus::Pending.is_pending_class());
        assert!(OrderStatus::Cancelling.is_pending_class());
        assert!(OrderStatus::CutoffIng.is_pending_class());
        assert!(!OrderStatus::New.is_pending_class());
        assert!(!OrderStatus::Cancelled.is_pending_class());
    }

    #[test]
    fn test_settled_status_from_amounts() {
        let mut order = sample_order();
        assert_eq!(order.settled_status(), OrderStatus::New);

        order.filled_amount = Decimal::from(30);
        assert_eq!(order.settled_status(), OrderStatus::PartiallyFilled);

        order.filled_amount = Decimal::from(100);
        assert_eq!(order.settled_status(), OrderStatus::Filled);
    }

    #[test]
    fn test_in_market_is_direction_agnostic() {
        let order = sample_order();
        assert!(order.in_market(Address::from_low_u64(100), Address::from_low_u64(200)));
        assert!(order.in_market(Address::from_low_u64(200), Address::from_low_u64(100)));
        assert!(!order.in_market(Address::from_low_u64(100), Address::from_low_u64(300)));
    }

    #[test]
    fn test_flex_cancel_validation() {
        let owner = Address::from_low_u64(10);
        let ok = FlexCancelRequest {
            owner,
            kind: FlexCancelKind::ByOwner,
        };
        assert!(ok.validate().is_ok());

        let zero_owner = FlexCancelRequest {
            owner: Address::ZERO,
            kind: FlexCancelKind::ByOwner,
        };
        assert!(matches!(zero_owner.validate(), Err(RelayError::InvalidInput(_))));

        let bad_time = FlexCancelRequest {
            owner,
            kind: FlexCancelKind::ByTime { cutoff: 0 },
        };
        assert!(bad_time.validate().is_err());

        let same_tokens = FlexCancelRequest {
            owner,
            kind: FlexCancelKind::ByMarket {
                token_s: Address::from_low_u64(1),
                token_b: Address::from_low_u64(1),
                cutoff: 10,
            },
        };
        assert!(same_tokens.validate().is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&OrderStatus::CutoffIng).unwrap();
        assert_eq!(json, "\"CUTOFFING\"");
        assert_eq!(OrderStatus::CutoffIng.to_string(), "CUTOFFING");

        // Wire and display spellings agree for every status
        for status in [
            OrderStatus::New,
            OrderStatus::PartiallyFilled,
            OrderStatus::FlexCancelled,
            OrderStatus::CutoffIng,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
            let back: OrderStatus = serde_json::from_str(&json).unwrap();
            assert_eq!(back, status);
        }
    }
}
