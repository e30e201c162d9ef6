//! Kafka transport for the message bus

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message as KafkaMessage;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use super::{dispatch, DeliveryReceipt, Message, MessageBus, MessageHandler, Subscription};
use crate::config::BusConfig;
use crate::error::{Result, SchemaError};

/// Bus backed by a Kafka cluster
pub struct KafkaBus {
    config: BusConfig,
    producer: FutureProducer,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl KafkaBus {
    pub fn new(config: &BusConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("client.id", &config.client_id)
            .set("message.timeout.ms", config.delivery_timeout_ms.to_string())
            .create()
            .map_err(|e| SchemaError::Delivery {
                topic: "*".to_string(),
                reason: format!("Failed to create producer: {}", e),
            })?;

        Ok(Self {
            config: config.clone(),
            producer,
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn consumer(&self, topic: &str) -> Result<StreamConsumer> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", self.config.brokers.join(","))
            .set("group.id", &self.config.group_id)
            .set("client.id", &self.config.client_id)
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| SchemaError::Delivery {
                topic: topic.to_string(),
                reason: format!("Failed to create consumer: {}", e),
            })?;
        consumer.subscribe(&[topic]).map_err(|e| SchemaError::Delivery {
            topic: topic.to_string(),
            reason: format!("Failed to subscribe: {}", e),
        })?;
        Ok(consumer)
    }
}

#[async_trait]
impl MessageBus for KafkaBus {
    async fn produce(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<DeliveryReceipt> {
        let record = FutureRecord::to(topic).key(key).payload(&value);
        match self
            .producer
            .send(record, Timeout::After(self.config.delivery_timeout()))
            .await
        {
            Ok((partition, offset)) => {
                debug!(topic, key, partition, offset, "Produced message");
                Ok(DeliveryReceipt { partition, offset })
            }
            Err((e, _)) => {
                error!(topic, key, error = %e, "Failed to produce message");
                Err(SchemaError::Delivery {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<Subscription> {
        let consumer = self.consumer(topic)?;

        let task = tokio::spawn(async move {
            loop {
                // The borrowed message must not outlive this statement.
                let message = match consumer.recv().await {
                    Ok(m) => Message {
                        topic: m.topic().to_string(),
                        partition: m.partition(),
                        offset: m.offset(),
                        key: m
                            .key()
                            .map(|k| String::from_utf8_lossy(k).into_owned())
                            .unwrap_or_default(),
                        value: m.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                    },
                    Err(e) => {
                        warn!(error = %e, "Kafka consume error");
                        continue;
                    }
                };
                dispatch(&handler, message).await;
            }
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task.abort_handle());
        info!(topic, group_id = %self.config.group_id, "Subscribed");
        Ok(Subscription::new(topic, task))
    }

    async fn close(&self) -> Result<()> {
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        self.producer
            .flush(Timeout::After(Duration::from_secs(5)))
            .map_err(|e| SchemaError::Delivery {
                topic: "*".to_string(),
                reason: format!("Failed to flush producer: {}", e),
            })?;
        info!("Kafka bus closed");
        Ok(())
    }
}
