//! Worker pool: the process-wide registry of running stream workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::stream::{StreamWorker, WorkerHandle, WorkerStatus, WorkerTask};
use crate::broker::Broker;
use crate::error::PoolError;
use crate::model::{RuleConfig, RuleId};
use crate::store::Database;
use crate::transform::FunctionRegistry;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long `stop_pool()` and worker replacement wait for a worker to
    /// exit before aborting it.
    pub stop_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
        }
    }
}

/// Result of [`WorkerPool::add_worker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// No worker was registered for the id.
    Started,
    /// A running worker was stopped and replaced.
    Replaced,
}

#[derive(Default)]
struct Registry {
    active: HashMap<RuleId, WorkerHandle>,
    /// Workers told to stop whose tasks have not been joined yet.
    draining: HashMap<RuleId, WorkerTask>,
    shutting_down: bool,
}

impl Registry {
    fn prune_draining(&mut self) {
        self.draining.retain(|_, task| !task.is_finished());
    }
}

/// Registry mapping rule ids to stream workers.
///
/// At most one worker runs per rule id. Every mutation goes through one
/// mutex and none of them waits on broker I/O, so add/delete return as soon
/// as the change is recorded.
pub struct WorkerPool {
    broker: Arc<dyn Broker>,
    functions: Arc<FunctionRegistry>,
    config: PoolConfig,
    registry: Mutex<Registry>,
}

impl WorkerPool {
    /// Create an empty pool using the built-in enrichment functions.
    pub fn new(broker: Arc<dyn Broker>, config: PoolConfig) -> Self {
        Self {
            broker,
            functions: Arc::new(FunctionRegistry::with_builtins()),
            config,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Use `functions` for every worker started from now on.
    pub fn with_functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = functions;
        self
    }

    /// Create a pool and start one worker per persisted rule.
    ///
    /// Workers start asynchronously; a rule whose worker fails only shows up
    /// as a `failed` worker and in the logs. A rule whose stored config no
    /// longer decodes is logged and skipped.
    pub async fn bootstrap(
        broker: Arc<dyn Broker>,
        db: &dyn Database,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        let rules = db.load_rules().await?;
        let pool = Self::new(broker, config);

        for (rule_id, rule) in rules {
            let rule = match rule {
                Ok(rule) => rule,
                Err(e) => {
                    error!(rule_id, error = %e, "Skipping rule that failed to load");
                    continue;
                }
            };
            let id = rule.rule_id();
            if let Err(e) = pool.add_worker(id.clone(), rule.rule).await {
                error!(rule_id = %id, error = %e, "Failed to start worker");
            }
        }

        let workers = pool.len().await;
        info!(workers, "Worker pool started");
        Ok(pool)
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    /// Register and start a worker for `id`.
    ///
    /// If `id` already has a worker, that worker is told to stop and the new
    /// one waits for it to exit before joining the consumer group.
    pub async fn add_worker(
        &self,
        id: RuleId,
        config: RuleConfig,
    ) -> Result<AddOutcome, PoolError> {
        let mut registry = self.registry.lock().await;
        if registry.shutting_down {
            return Err(PoolError::ShuttingDown);
        }
        registry.prune_draining();

        let (predecessor, outcome) = match registry.active.remove(&id) {
            Some(previous) => {
                previous.stop();
                (Some(previous.into_task()), AddOutcome::Replaced)
            }
            None => (registry.draining.remove(&id), AddOutcome::Started),
        };

        let mut worker = StreamWorker::new(
            id.clone(),
            Arc::new(config),
            Arc::clone(&self.broker),
            Arc::clone(&self.functions),
        );
        if let Some(task) = predecessor {
            worker = worker.after(task, self.config.stop_timeout);
        }

        registry.active.insert(id.clone(), worker.spawn());

        match outcome {
            AddOutcome::Started => info!(rule_id = %id, "Worker added"),
            AddOutcome::Replaced => info!(rule_id = %id, "Worker replaced"),
        }
        Ok(outcome)
    }

    /// Stop the worker for `id` and remove it from the registry.
    pub async fn delete_worker(&self, id: &RuleId) -> Result<(), PoolError> {
        let mut registry = self.registry.lock().await;
        registry.prune_draining();

        let handle = registry
            .active
            .remove(id)
            .ok_or_else(|| PoolError::NotFound(id.clone()))?;
        handle.stop();
        registry.draining.insert(id.clone(), handle.into_task());

        info!(rule_id = %id, "Worker stop requested");
        Ok(())
    }

    /// Stop every worker and wait (bounded by `stop_timeout`) for them to
    /// exit. Workers still running after the timeout are aborted.
    ///
    /// Returns the number of workers that were signalled. The pool rejects
    /// new workers afterwards.
    pub async fn stop_pool(&self) -> usize {
        let tasks: Vec<(RuleId, WorkerTask)> = {
            let mut registry = self.registry.lock().await;
            registry.shutting_down = true;

            let mut tasks: Vec<_> = registry
                .active
                .drain()
                .map(|(id, handle)| {
                    handle.stop();
                    (id, handle.into_task())
                })
                .collect();
            tasks.extend(registry.draining.drain());
            tasks
        };

        let count = tasks.len();
        if count == 0 {
            return 0;
        }
        info!(workers = count, "Stopping worker pool");

        let (ids, tasks): (Vec<RuleId>, Vec<WorkerTask>) = tasks.into_iter().unzip();
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();

        match timeout(self.config.stop_timeout, join_all(tasks)).await {
            Ok(results) => {
                for (id, result) in ids.iter().zip(results) {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!(rule_id = %id, error = %e, "Worker exited with error"),
                        Err(e) => error!(rule_id = %id, error = %e, "Worker task panicked"),
                    }
                }
                info!(workers = count, "Worker pool stopped");
            }
            Err(_) => {
                warn!(
                    timeout = ?self.config.stop_timeout,
                    "Workers did not stop in time, aborting"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        count
    }

    /// Status of the worker registered for `id`.
    pub async fn status(&self, id: &RuleId) -> Option<WorkerStatus> {
        self.registry
            .lock()
            .await
            .active
            .get(id)
            .map(WorkerHandle::status)
    }

    /// Status of every registered worker, ordered by id.
    pub async fn list(&self) -> Vec<WorkerStatus> {
        let mut statuses: Vec<_> = self
            .registry
            .lock()
            .await
            .active
            .values()
            .map(WorkerHandle::status)
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    pub async fn contains(&self, id: &RuleId) -> bool {
        self.registry.lock().await.active.contains_key(id)
    }

    /// Number of registered workers.
    pub async fn len(&self) -> usize {
        self.registry.lock().await.active.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::model::Filter;

    fn pool(broker: &MemoryBroker) -> WorkerPool {
        WorkerPool::new(
            Arc::new(broker.clone()),
            PoolConfig {
                stop_timeout: Duration::from_secs(2),
            },
        )
    }

    fn rule(from: &str, to: &str) -> RuleConfig {
        RuleConfig {
            topic_from: from.into(),
            filter: Filter {
                regexp: ".".into(),
            },
            topic_to: to.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn delete_unknown_worker_is_not_found() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker);
        let err = pool.delete_worker(&RuleId::new("404")).await.unwrap_err();
        assert!(matches!(err, PoolError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_add_replaces() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker);
        let id = RuleId::new("1");

        assert_eq!(
            pool.add_worker(id.clone(), rule("a", "b")).await.unwrap(),
            AddOutcome::Started
        );
        assert_eq!(
            pool.add_worker(id.clone(), rule("c", "d")).await.unwrap(),
            AddOutcome::Replaced
        );

        assert_eq!(pool.len().await, 1);
        assert_eq!(pool.status(&id).await.unwrap().topic_from, "c");
        assert_eq!(pool.stop_pool().await, 1);
    }

    #[tokio::test]
    async fn stopped_pool_rejects_new_workers() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker);
        pool.stop_pool().await;
        let err = pool
            .add_worker(RuleId::new("1"), rule("a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::ShuttingDown));
    }

    #[tokio::test]
    async fn list_is_ordered_by_id() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker);
        for id in ["3", "1", "2"] {
            pool.add_worker(RuleId::new(id), rule("a", "b")).await.unwrap();
        }
        let ids: Vec<_> = pool.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![RuleId::new("1"), RuleId::new("2"), RuleId::new("3")]);
        pool.stop_pool().await;
    }
}
