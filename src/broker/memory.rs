//! In-process broker.
//!
//! Each topic keeps a log of its most recent messages. The first consumer of
//! a group gets a queue seeded with the whole log (earliest offset) and every
//! later publish is fanned out to all group queues. Consumers of the same
//! group share one queue, so each message reaches exactly one of them.
//!
//! Logs and group queues hold at most `retention` messages; the oldest are
//! dropped first, like a size-based Kafka retention.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use super::{Broker, BrokerMessage, Consumer, Producer};
use crate::error::BrokerError;

/// Messages kept per topic log and per group queue unless configured.
pub const DEFAULT_RETENTION: usize = 10_000;

/// Pending messages of one consumer group.
struct GroupQueue {
    pending: Mutex<VecDeque<Vec<u8>>>,
    ready: Notify,
}

impl GroupQueue {
    async fn push(&self, payload: Vec<u8>, retention: usize) -> bool {
        let mut pending = self.pending.lock().await;
        let dropped = push_bounded(&mut pending, payload, retention);
        self.ready.notify_one();
        dropped
    }

    /// Wait for the next message. Cancel-safe: a message is only removed
    /// from the queue when it is returned.
    async fn pop(&self) -> Vec<u8> {
        loop {
            if let Some(payload) = self.pending.lock().await.pop_front() {
                return payload;
            }
            self.ready.notified().await;
        }
    }
}

/// Append `payload`, dropping the oldest entry past `retention`. Returns
/// whether anything was dropped.
fn push_bounded(queue: &mut VecDeque<Vec<u8>>, payload: Vec<u8>, retention: usize) -> bool {
    queue.push_back(payload);
    let mut dropped = false;
    while queue.len() > retention {
        queue.pop_front();
        dropped = true;
    }
    dropped
}

#[derive(Default)]
struct Topic {
    log: VecDeque<Vec<u8>>,
    groups: HashMap<String, Arc<GroupQueue>>,
}

struct Inner {
    topics: Mutex<HashMap<String, Topic>>,
    retention: usize,
    open_consumers: AtomicUsize,
    open_producers: AtomicUsize,
}

impl Inner {
    async fn append(&self, topic: &str, payload: &[u8]) {
        let mut topics = self.topics.lock().await;
        let entry = topics.entry(topic.to_string()).or_default();
        push_bounded(&mut entry.log, payload.to_vec(), self.retention);
        for (group_id, queue) in &entry.groups {
            if queue.push(payload.to_vec(), self.retention).await {
                warn!(topic, group = %group_id, "Group queue full, dropped oldest message");
            }
        }
    }
}

/// Broker that never leaves the process.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` messages per topic log and per group queue.
    pub fn with_retention(retention: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                retention: retention.max(1),
                open_consumers: AtomicUsize::new(0),
                open_producers: AtomicUsize::new(0),
            }),
        }
    }

    /// Append a message to `topic` without opening a producer.
    pub async fn publish(&self, topic: &str, payload: impl AsRef<[u8]>) {
        self.inner.append(topic, payload.as_ref()).await;
    }

    /// Snapshot of the retained messages of `topic`, oldest first.
    pub async fn messages(&self, topic: &str) -> Vec<Vec<u8>> {
        self.inner
            .topics
            .lock()
            .await
            .get(topic)
            .map(|t| t.log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of consumers opened and not yet closed or dropped.
    pub fn open_consumers(&self) -> usize {
        self.inner.open_consumers.load(Ordering::SeqCst)
    }

    /// Number of producers opened and not yet closed or dropped.
    pub fn open_producers(&self) -> usize {
        self.inner.open_producers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn open_consumer(
        &self,
        topic: &str,
        group_id: &str,
    ) -> Result<Box<dyn Consumer>, BrokerError> {
        let queue = {
            let mut topics = self.inner.topics.lock().await;
            let entry = topics.entry(topic.to_string()).or_default();
            let log = &entry.log;
            let group = entry.groups.entry(group_id.to_string()).or_insert_with(|| {
                Arc::new(GroupQueue {
                    pending: Mutex::new(log.clone()),
                    ready: Notify::new(),
                })
            });
            Arc::clone(group)
        };

        self.inner.open_consumers.fetch_add(1, Ordering::SeqCst);
        debug!(topic = %topic, group = %group_id, "Memory consumer opened");

        Ok(Box::new(MemoryConsumer {
            topic: topic.to_string(),
            queue,
            inner: Arc::clone(&self.inner),
            closed: false,
        }))
    }

    async fn open_producer(&self, topic: &str) -> Result<Box<dyn Producer>, BrokerError> {
        self.inner.open_producers.fetch_add(1, Ordering::SeqCst);
        debug!(topic = %topic, "Memory producer opened");

        Ok(Box::new(MemoryProducer {
            topic: topic.to_string(),
            inner: Arc::clone(&self.inner),
            closed: false,
        }))
    }
}

struct MemoryConsumer {
    topic: String,
    queue: Arc<GroupQueue>,
    inner: Arc<Inner>,
    closed: bool,
}

impl MemoryConsumer {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.open_consumers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next(&mut self) -> Result<BrokerMessage, BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed(self.topic.clone()));
        }

        let payload = self.queue.pop().await;
        Ok(BrokerMessage {
            topic: self.topic.clone(),
            payload,
        })
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.release();
    }
}

struct MemoryProducer {
    topic: String,
    inner: Arc<Inner>,
    closed: bool,
}

impl MemoryProducer {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.open_producers.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn publish(&mut self, payload: &[u8]) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Closed(self.topic.clone()));
        }
        self.inner.append(&self.topic, payload).await;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryProducer {
    fn drop(&mut self) {
        self.release();
    }
}
