//! Subscription table and delivery

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use types::events::{ChainEvent, EventEnvelope, Topic};

use crate::handler::EventHandler;

/// Handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct Subscription {
    id: SubscriptionId,
    sender: mpsc::UnboundedSender<EventEnvelope>,
    worker: JoinHandle<()>,
}

/// Typed publish/subscribe hub
///
/// Delivery is at-least-once from the publisher's point of view: each
/// publish hands every current subscriber of the topic its own envelope.
/// There is no ordering across topics.
#[derive(Default)]
pub struct EventBus {
    subscriptions: DashMap<Topic, Vec<Subscription>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic` and spawn its worker
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::unbounded_channel();

        let worker = tokio::spawn(run_subscription(topic, id, handler.clone(), receiver));

        self.subscriptions
            .entry(topic)
            .or_default()
            .push(Subscription { id, sender, worker });

        debug!(topic = %topic, subscription = %id, handler = handler.name(), "Subscribed");
        id
    }

    /// Remove a subscription
    ///
    /// Events already queued for it are still handled; its worker exits once
    /// the queue is empty. Returns false for an unknown id.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.remove(id).is_some()
    }

    /// Remove a subscription and wait until its worker has handled every
    /// queued event
    ///
    /// Must not be awaited from the handler of the same subscription.
    pub async fn unsubscribe_and_wait(&self, id: SubscriptionId) -> bool {
        let Some(Subscription { sender, worker, .. }) = self.remove(id) else {
            return false;
        };
        drop(sender);
        if let Err(err) = worker.await {
            error!(subscription = %id, error = %err, "Subscription worker aborted");
        }
        true
    }

    fn remove(&self, id: SubscriptionId) -> Option<Subscription> {
        for mut entry in self.subscriptions.iter_mut() {
            let Some(pos) = entry.value().iter().position(|sub| sub.id == id) else {
                continue;
            };
            let sub = entry.value_mut().remove(pos);
            debug!(topic = %entry.key(), subscription = %id, "Unsubscribed");
            return Some(sub);
        }
        None
    }

    /// Publish one event to every subscriber of its topic
    ///
    /// Returns the number of subscriptions the event was queued for.
    pub fn publish(&self, event: ChainEvent) -> usize {
        let topic = event.topic();
        let Some(subs) = self.subscriptions.get(&topic) else {
            debug!(topic = %topic, "No subscribers for event");
            return 0;
        };

        let mut delivered = 0;
        for sub in subs.iter() {
            if sub.sender.send(EventEnvelope::new(event.clone())).is_ok() {
                delivered += 1;
            } else {
                warn!(topic = %topic, subscription = %sub.id, "Subscription worker has stopped");
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.subscriptions.get(&topic).map_or(0, |subs| subs.len())
    }
}

async fn run_subscription(
    topic: Topic,
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    mut receiver: mpsc::UnboundedReceiver<EventEnvelope>,
) {
    while let Some(envelope) = receiver.recv().await {
        if let Err(err) = handler.handle(&envelope).await {
            error!(
                topic = %topic,
                subscription = %id,
                handler = handler.name(),
                event_id = %envelope.event_id,
                retryable = err.is_retryable(),
                error = %err,
                "Event handler failed"
            );
        }
    }
    debug!(topic = %topic, subscription = %id, "Subscription worker finished");
}
