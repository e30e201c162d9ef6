//! In-process message bus
//!
//! Each topic is a single ordered partition. Subscribers start from the earliest
//! offset and see every message in produce order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use super::{dispatch, DeliveryReceipt, Message, MessageBus, MessageHandler, Subscription};
use crate::error::{Result, SchemaError};

struct TopicLog {
    messages: Mutex<Vec<Message>>,
    /// Number of messages appended so far
    appended: watch::Sender<usize>,
}

impl TopicLog {
    fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            messages: Mutex::new(Vec::new()),
            appended,
        }
    }

    fn messages(&self) -> MutexGuard<'_, Vec<Message>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bus kept in memory
#[derive(Default)]
pub struct InMemoryBus {
    topics: Mutex<HashMap<String, Arc<TopicLog>>>,
    tasks: Mutex<Vec<AbortHandle>>,
    closed: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything produced to a topic so far
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.topic(topic).messages().clone()
    }

    fn topic(&self, name: &str) -> Arc<TopicLog> {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new()))
            .clone()
    }

    fn ensure_open(&self, topic: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SchemaError::Delivery {
                topic: topic.to_string(),
                reason: "bus is closed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn produce(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<DeliveryReceipt> {
        self.ensure_open(topic)?;
        let log = self.topic(topic);
        let (offset, count) = {
            let mut messages = log.messages();
            let offset = messages.len() as i64;
            messages.push(Message {
                topic: topic.to_string(),
                partition: 0,
                offset,
                key: key.to_string(),
                value,
            });
            (offset, messages.len())
        };
        log.appended.send_replace(count);
        debug!(topic, key, offset, "Produced message");
        Ok(DeliveryReceipt {
            partition: 0,
            offset,
        })
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<Subscription> {
        self.ensure_open(topic)?;
        let log = self.topic(topic);
        let mut appended = log.appended.subscribe();

        let task = tokio::spawn(async move {
            let mut next = 0usize;
            loop {
                let _seen = *appended.borrow_and_update();
                let batch: Vec<Message> = log
                    .messages()
                    .get(next..)
                    .map(<[Message]>::to_vec)
                    .unwrap_or_default();

                if batch.is_empty() {
                    if appended.changed().await.is_err() {
                        break;
                    }
                    continue;
                }

                for message in batch {
                    next += 1;
                    dispatch(&handler, message).await;
                }
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task.abort_handle());
        info!(topic, "Subscribed");
        Ok(Subscription::new(topic, task))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        info!("In-memory bus closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<Message>);

    #[async_trait]
    impl MessageHandler for Forward {
        async fn handle(&self, message: Message) -> Result<()> {
            let _ = self.0.send(message);
            Ok(())
        }
    }

    /// Fails on every message whose key is "bad"
    struct Picky(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl MessageHandler for Picky {
        async fn handle(&self, message: Message) -> Result<()> {
            if message.key == "bad" {
                return Err(SchemaError::MalformedPayload("bad message".into()));
            }
            let _ = self.0.send(message.key);
            Ok(())
        }
    }

    async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_produce_assigns_offsets() {
        let bus = InMemoryBus::new();
        let first = bus.produce("t", "a", vec![1]).await.unwrap();
        let second = bus.produce("t", "b", vec![2]).await.unwrap();
        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
        assert_eq!(bus.messages("t").len(), 2);
        assert!(bus.messages("other").is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_replays_then_follows() {
        let bus = InMemoryBus::new();
        bus.produce("t", "early", vec![1]).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = bus.subscribe("t", Arc::new(Forward(tx))).await.unwrap();
        assert_eq!(subscription.topic(), "t");

        assert_eq!(next(&mut rx).await.key, "early");
        bus.produce("t", "late", vec![2]).await.unwrap();
        let late = next(&mut rx).await;
        assert_eq!(late.key, "late");
        assert_eq!(late.offset, 1);
        subscription.cancel();
    }

    #[tokio::test]
    async fn test_handler_errors_do_not_stop_loop() {
        let bus = InMemoryBus::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe("t", Arc::new(Picky(tx))).await.unwrap();

        bus.produce("t", "bad", vec![]).await.unwrap();
        bus.produce("t", "good", vec![]).await.unwrap();
        assert_eq!(next(&mut rx).await, "good");
    }

    #[tokio::test]
    async fn test_closed_bus_refuses_produce() {
        let bus = InMemoryBus::new();
        bus.close().await.unwrap();
        let err = bus.produce("t", "k", vec![]).await.unwrap_err();
        assert!(err.is_transient());
        assert!(bus
            .subscribe("t", Arc::new(Forward(mpsc::unbounded_channel().0)))
            .await
            .is_err());
    }
}
