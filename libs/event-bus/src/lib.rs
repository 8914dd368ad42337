//! Event bus for chain events
//!
//! An explicitly constructed, injected publish/subscribe hub. Topics are the
//! closed `types::events::Topic` set. Every subscription owns a queue and a
//! worker task, so one subscriber handles its events strictly in delivery
//! order while different subscriptions run concurrently.
//!
//! # Modules
//! - `handler`: Subscriber trait
//! - `bus`: Subscription table, publish and worker loop

pub mod bus;
pub mod handler;

pub use bus::{EventBus, SubscriptionId};
pub use handler::EventHandler;
