//! Message broker abstraction.
//!
//! A stream worker only needs an ordered source with consumer-group
//! semantics and a sink:
//! - `Broker` — opens consumers and producers
//! - `Consumer` — blocking `next()` over one topic for one group
//! - `Producer` — `publish()` to one topic
//!
//! `KafkaBroker` talks to a real cluster; `MemoryBroker` keeps everything in
//! process for local runs and tests.

pub mod kafka;
pub mod memory;

use async_trait::async_trait;

use crate::error::BrokerError;

pub use kafka::{KafkaBroker, KafkaConfig};
pub use memory::MemoryBroker;

/// A message received from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Ordered message source bound to one topic and consumer group.
#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next message. Cancel-safe: dropping the future loses no
    /// message.
    async fn next(&mut self) -> Result<BrokerMessage, BrokerError>;

    /// Leave the group and release the connection.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Message sink bound to one topic.
#[async_trait]
pub trait Producer: Send {
    async fn publish(&mut self, payload: &[u8]) -> Result<(), BrokerError>;

    /// Flush pending messages and release the connection.
    async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Factory for consumers and producers.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn open_consumer(
        &self,
        topic: &str,
        group_id: &str,
    ) -> Result<Box<dyn Consumer>, BrokerError>;

    async fn open_producer(&self, topic: &str) -> Result<Box<dyn Producer>, BrokerError>;
}
