//! Owner-initiated order writes
//!
//! Flex cancel marks orders cancelled off-chain, without a transaction. Only
//! orders still open or pending a miner settlement qualify.

use std::sync::Arc;

use storage::{Cache, OrderRepository};
use tracing::info;
use types::errors::{RelayError, RelayResult};
use types::order::{FlexCancelRequest, OrderStatus};

use crate::cache::OrderQueryCache;
use crate::config::OrderManagerConfig;

/// Statuses a flex cancel may overwrite
pub const FLEX_CANCELLABLE: [OrderStatus; 3] = [
    OrderStatus::New,
    OrderStatus::PartiallyFilled,
    OrderStatus::Pending,
];

pub struct OrderWriter {
    orders: Arc<dyn OrderRepository>,
    queries: OrderQueryCache,
}

impl OrderWriter {
    pub fn new(
        config: OrderManagerConfig,
        orders: Arc<dyn OrderRepository>,
        cache: Arc<dyn Cache>,
    ) -> Self {
        Self {
            orders,
            queries: OrderQueryCache::new(cache, config.order_cache_ttl),
        }
    }

    /// Flex-cancel the owner's orders selected by the request
    ///
    /// Returns the number of orders cancelled. Fails with `NoValidOrder`
    /// when nothing qualified.
    pub async fn flex_cancel(&self, request: &FlexCancelRequest) -> RelayResult<u64> {
        request.validate()?;

        let cancelled = self
            .orders
            .flex_cancel_orders(
                &request.owner,
                &request.kind,
                &FLEX_CANCELLABLE,
                OrderStatus::FlexCancelled,
            )
            .await?;
        if cancelled == 0 {
            return Err(RelayError::NoValidOrder);
        }

        info!(
            owner = %request.owner,
            kind = ?request.kind,
            cancelled,
            "Orders flex cancelled"
        );
        self.queries.del_by_owners(&[request.owner]).await?;
        Ok(cancelled)
    }
}
