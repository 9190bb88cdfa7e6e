//! Stream worker: one consume → transform → produce loop per rule.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use super::state::{StateTransition, WorkerState};
use crate::broker::{Broker, Consumer, Producer};
use crate::error::{BrokerError, WorkerError};
use crate::model::{RuleConfig, RuleId};
use crate::transform::{FunctionRegistry, Outcome, Pipeline};

/// Join handle of a worker task; resolves with the worker's terminal error.
pub type WorkerTask = JoinHandle<Result<(), WorkerError>>;

/// Point-in-time view of a worker, as reported by the pool.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub id: RuleId,
    pub state: WorkerState,
    /// When the worker entered `state`.
    pub since: DateTime<Utc>,
    /// Why the worker entered `state`, set for failures.
    pub reason: Option<String>,
    pub topic_from: String,
    pub topic_to: String,
}

/// A configured, not yet running worker.
pub struct StreamWorker {
    id: RuleId,
    config: Arc<RuleConfig>,
    broker: Arc<dyn Broker>,
    functions: Arc<FunctionRegistry>,
    predecessor: Option<(WorkerTask, Duration)>,
}

impl StreamWorker {
    pub fn new(
        id: RuleId,
        config: Arc<RuleConfig>,
        broker: Arc<dyn Broker>,
        functions: Arc<FunctionRegistry>,
    ) -> Self {
        Self {
            id,
            config,
            broker,
            functions,
            predecessor: None,
        }
    }

    /// Wait for `task` (up to `wait`) before opening any broker resource.
    ///
    /// Used when a rule is replaced so the old and new workers never share
    /// the consumer group at the same time. A predecessor that outlives
    /// `wait` is aborted.
    pub fn after(mut self, task: WorkerTask, wait: Duration) -> Self {
        self.predecessor = Some((task, wait));
        self
    }

    /// Spawn the worker loop on the tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(StateTransition::new(
            WorkerState::Starting,
            WorkerState::Starting,
            None,
        ));

        let id = self.id.clone();
        let config = Arc::clone(&self.config);
        let run = WorkerRun {
            id: self.id,
            config: self.config,
            broker: self.broker,
            functions: self.functions,
            stop_rx,
            state_tx,
        };
        let predecessor = self.predecessor;

        let task = tokio::spawn(async move {
            if let Some((mut task, wait)) = predecessor {
                if timeout(wait, &mut task).await.is_err() {
                    warn!(rule_id = %run.id, ?wait, "Previous worker did not stop in time, aborting it");
                    task.abort();
                }
            }
            run.run().await
        });

        WorkerHandle {
            id,
            config,
            stop_tx,
            state_rx,
            task,
        }
    }
}

/// Pool-side handle of a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    id: RuleId,
    config: Arc<RuleConfig>,
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<StateTransition>,
    task: WorkerTask,
}

impl WorkerHandle {
    pub fn id(&self) -> &RuleId {
        &self.id
    }

    pub fn config(&self) -> &RuleConfig {
        &self.config
    }

    /// Request a stop. Never blocks; the worker observes the request at its
    /// next wait for a message.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn state(&self) -> WorkerState {
        self.state_rx.borrow().to
    }

    pub fn status(&self) -> WorkerStatus {
        let transition = self.state_rx.borrow();
        WorkerStatus {
            id: self.id.clone(),
            state: transition.to,
            since: transition.timestamp,
            reason: transition.reason.clone(),
            topic_from: self.config.topic_from.clone(),
            topic_to: self.config.topic_to.clone(),
        }
    }

    /// Receiver that follows every state change of this worker.
    pub fn subscribe(&self) -> watch::Receiver<StateTransition> {
        self.state_rx.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn into_task(self) -> WorkerTask {
        self.task
    }
}

/// Resolves once a stop is requested or the handle is dropped.
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}

/// State owned by the spawned task.
struct WorkerRun {
    id: RuleId,
    config: Arc<RuleConfig>,
    broker: Arc<dyn Broker>,
    functions: Arc<FunctionRegistry>,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<StateTransition>,
}

impl WorkerRun {
    async fn run(mut self) -> Result<(), WorkerError> {
        if *self.stop_rx.borrow() {
            self.transition(WorkerState::Stopping, None);
            self.transition(WorkerState::Stopped, Some("stopped before start".into()));
            return Ok(());
        }

        let pipeline = match Pipeline::compile(Arc::clone(&self.config), Arc::clone(&self.functions)) {
            Ok(pipeline) => pipeline,
            Err(source) => {
                return self.fail(WorkerError::Config {
                    id: self.id.clone(),
                    source,
                });
            }
        };

        let mut consumer = match self
            .broker
            .open_consumer(&self.config.topic_from, self.id.as_str())
            .await
        {
            Ok(consumer) => consumer,
            Err(source) => return self.fail(self.broker_error(source)),
        };

        let mut producer = match self.broker.open_producer(&self.config.topic_to).await {
            Ok(producer) => producer,
            Err(source) => {
                if let Err(e) = consumer.close().await {
                    warn!(rule_id = %self.id, error = %e, "Failed to close consumer");
                }
                return self.fail(self.broker_error(source));
            }
        };

        self.transition(WorkerState::Running, None);
        info!(
            rule_id = %self.id,
            topic_from = %self.config.topic_from,
            topic_to = %self.config.topic_to,
            "Worker started"
        );

        let result = self
            .consume(&pipeline, consumer.as_mut(), producer.as_mut())
            .await;

        if result.is_ok() {
            self.transition(WorkerState::Stopping, None);
        }
        self.close(consumer.as_mut(), producer.as_mut()).await;

        match result {
            Ok(()) => {
                self.transition(WorkerState::Stopped, None);
                info!(rule_id = %self.id, "Worker stopped");
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    /// Run until a stop request (`Ok`) or a fatal broker error (`Err`).
    async fn consume(
        &mut self,
        pipeline: &Pipeline,
        consumer: &mut dyn Consumer,
        producer: &mut dyn Producer,
    ) -> Result<(), WorkerError> {
        let mut published: u64 = 0;

        loop {
            let message = tokio::select! {
                biased;
                _ = stop_requested(&mut self.stop_rx) => {
                    debug!(rule_id = %self.id, published, "Stop signal received");
                    return Ok(());
                }
                message = consumer.next() => message.map_err(|e| self.broker_error(e))?,
            };

            match pipeline.process(&message.payload) {
                Ok(Outcome::Filtered) => {
                    trace!(rule_id = %self.id, "Message filtered out");
                }
                Ok(Outcome::Emit {
                    payload,
                    field_errors,
                }) => {
                    for e in &field_errors {
                        warn!(rule_id = %self.id, error = %e, "Field transformation failed");
                    }
                    producer
                        .publish(&payload)
                        .await
                        .map_err(|e| self.broker_error(e))?;
                    published += 1;
                }
                Err(e) => {
                    warn!(rule_id = %self.id, error = %e, "Skipping message");
                }
            }
        }
    }

    async fn close(&self, consumer: &mut dyn Consumer, producer: &mut dyn Producer) {
        if let Err(e) = consumer.close().await {
            warn!(rule_id = %self.id, error = %e, "Failed to close consumer");
        }
        if let Err(e) = producer.close().await {
            warn!(rule_id = %self.id, error = %e, "Failed to close producer");
        }
    }

    fn broker_error(&self, source: BrokerError) -> WorkerError {
        WorkerError::Broker {
            id: self.id.clone(),
            source,
        }
    }

    fn fail(&self, e: WorkerError) -> Result<(), WorkerError> {
        error!(rule_id = %self.id, error = %e, "Worker failed");
        self.transition(WorkerState::Failed, Some(e.to_string()));
        Err(e)
    }

    fn transition(&self, to: WorkerState, reason: Option<String>) {
        let from = self.state_tx.borrow().to;
        if !from.can_transition_to(to) {
            debug!(rule_id = %self.id, %from, %to, "Ignored invalid worker transition");
            return;
        }
        self.state_tx
            .send_replace(StateTransition::new(from, to, reason));
    }
}
