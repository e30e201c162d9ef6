//! Message bus abstraction
//!
//! The core only needs to produce keyed payloads and receive payloads through a
//! handler. Broker connections, partition assignment and consumer groups stay inside
//! the adapters.

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

#[cfg(feature = "kafka")]
pub use kafka::KafkaBus;
pub use memory::InMemoryBus;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::error::Result;

/// A consumed message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: String,
    pub value: Vec<u8>,
}

/// Where a produced message landed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub partition: i32,
    pub offset: i64,
}

/// Receives messages from a subscription
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<()>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Produce `value` keyed by `key`; resolves once the broker acknowledges it
    async fn produce(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<DeliveryReceipt>;

    /// Deliver every message on `topic` to `handler` until the subscription is cancelled
    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<Subscription>;

    /// Stop all subscriptions and refuse further produces
    async fn close(&self) -> Result<()>;
}

/// A running consume loop
///
/// Dropping the subscription leaves the loop running; call [`Subscription::cancel`]
/// or close the bus to stop it.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, task: JoinHandle<()>) -> Self {
        Self {
            topic: topic.into(),
            task,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

/// Run one handler invocation, containing its failures
///
/// Errors and panics are logged; the consume loop always moves on to the next message.
pub(crate) async fn dispatch(handler: &Arc<dyn MessageHandler>, message: Message) {
    let topic = message.topic.clone();
    let key = message.key.clone();
    let offset = message.offset;
    let handler = handler.clone();

    match tokio::spawn(async move { handler.handle(message).await }).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%topic, %key, offset, error = %e, "Message handler failed"),
        Err(e) => error!(%topic, %key, offset, error = %e, "Message handler panicked"),
    }
}
