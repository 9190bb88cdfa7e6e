//! Kafka adapter built on rdkafka.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::util::Timeout;
use tracing::{debug, info};

use super::{Broker, BrokerMessage, Consumer, Producer};
use crate::error::BrokerError;

/// Connection settings shared by every consumer and producer.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    /// How long a publish may wait in the local queue.
    pub send_timeout: Duration,
    /// How long `close()` waits for in-flight messages.
    pub flush_timeout: Duration,
    /// Consumer session timeout.
    pub session_timeout: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            send_timeout: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(5),
            session_timeout: Duration::from_secs(6),
        }
    }
}

/// Opens rdkafka consumers and producers against one cluster.
#[derive(Debug, Clone)]
pub struct KafkaBroker {
    config: KafkaConfig,
}

impl KafkaBroker {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", self.config.brokers.as_str());
        config
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn open_consumer(
        &self,
        topic: &str,
        group_id: &str,
    ) -> Result<Box<dyn Consumer>, BrokerError> {
        let open_err = |reason: String| BrokerError::ConsumerOpen {
            topic: topic.to_string(),
            group: group_id.to_string(),
            reason,
        };

        let consumer: StreamConsumer = self
            .client_config()
            .set("group.id", group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "earliest")
            .set(
                "session.timeout.ms",
                self.config.session_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| open_err(e.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| open_err(e.to_string()))?;

        info!(topic = %topic, group = %group_id, "Kafka consumer subscribed");

        Ok(Box::new(KafkaConsumer {
            topic: topic.to_string(),
            consumer,
        }))
    }

    async fn open_producer(&self, topic: &str) -> Result<Box<dyn Producer>, BrokerError> {
        let producer: FutureProducer = self
            .client_config()
            .set(
                "message.timeout.ms",
                self.config.send_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| BrokerError::ProducerOpen {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        info!(topic = %topic, "Kafka producer created");

        Ok(Box::new(KafkaProducer {
            topic: topic.to_string(),
            producer,
            send_timeout: self.config.send_timeout,
            flush_timeout: self.config.flush_timeout,
        }))
    }
}

struct KafkaConsumer {
    topic: String,
    consumer: StreamConsumer,
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn next(&mut self) -> Result<BrokerMessage, BrokerError> {
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| BrokerError::Receive {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })?;

        Ok(BrokerMessage {
            topic: msg.topic().to_string(),
            payload: msg.payload().unwrap_or_default().to_vec(),
        })
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.consumer.unsubscribe();
        debug!(topic = %self.topic, "Kafka consumer unsubscribed");
        Ok(())
    }
}

struct KafkaProducer {
    topic: String,
    producer: FutureProducer,
    send_timeout: Duration,
    flush_timeout: Duration,
}

#[async_trait]
impl Producer for KafkaProducer {
    async fn publish(&mut self, payload: &[u8]) -> Result<(), BrokerError> {
        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(&self.topic).payload(payload);

        self.producer
            .send(record, Timeout::After(self.send_timeout))
            .await
            .map(|_| ())
            .map_err(|(e, _)| BrokerError::Publish {
                topic: self.topic.clone(),
                reason: e.to_string(),
            })
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;
        let close_err = |reason: String| BrokerError::Close {
            resource: format!("producer for {}", self.topic),
            reason,
        };

        // flush() blocks the calling thread until the queue drains.
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| close_err(e.to_string()))?
            .map_err(|e| close_err(e.to_string()))?;

        debug!(topic = %self.topic, "Kafka producer flushed");
        Ok(())
    }
}
