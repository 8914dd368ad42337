//! Subscriber trait

use async_trait::async_trait;
use types::errors::RelayResult;
use types::events::EventEnvelope;

/// Receives the events of one subscription, one at a time
///
/// An error is logged by the bus and the next queued event is delivered;
/// the bus never retries on its own.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn handle(&self, envelope: &EventEnvelope) -> RelayResult<()>;
}
