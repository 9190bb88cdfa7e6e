//! Integration tests for the worker pool over the in-process broker.
//!
//! Each test drives a real `WorkerPool` against `MemoryBroker`, whose open
//! consumer/producer counters make resource leaks observable.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::{sleep, timeout};

use event_unifier::broker::{Broker, Consumer, MemoryBroker};
use event_unifier::model::{ExtraProcessSpec, Filter, RuleConfig, RuleId, UnifierSpec};
use event_unifier::store::{Database, LibSqlBackend};
use event_unifier::worker::{AddOutcome, PoolConfig, WorkerPool, WorkerState};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

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

/// Poll until `check` holds.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    while !check().await {
        sleep(Duration::from_millis(10)).await;
    }
}

async fn next_json(consumer: &mut Box<dyn Consumer>) -> Value {
    let message = consumer.next().await.unwrap();
    serde_json::from_slice(&message.payload).unwrap()
}

#[tokio::test]
async fn end_to_end_transformation() {
    timeout(TEST_TIMEOUT, async {
        let broker = MemoryBroker::new();
        let pool = pool(&broker);

        let config = RuleConfig {
            topic_from: "raw".into(),
            filter: Filter {
                regexp: "login".into(),
            },
            entity_hash: vec!["user".into()],
            unifier: vec![
                UnifierSpec {
                    name: "who".into(),
                    field_type: "string".into(),
                    expression: "user".into(),
                },
                UnifierSpec {
                    name: "attempts".into(),
                    field_type: "int".into(),
                    expression: "count".into(),
                },
            ],
            extra_process: vec![ExtraProcessSpec {
                func: "__stringConstant".into(),
                args: "web".into(),
                to: "source".into(),
            }],
            topic_to: "unified".into(),
        };
        pool.add_worker(RuleId::new("1"), config).await.unwrap();

        broker
            .publish("raw", br#"{"action":"logout","user":"bob"}"#)
            .await;
        broker
            .publish("raw", br#"{"action":"login","user":" alice ","count":"3"}"#)
            .await;

        let mut out = broker.open_consumer("unified", "reader").await.unwrap();
        let event = next_json(&mut out).await;

        assert_eq!(event["entity"], format!("{:x}", md5::compute("alice")));
        assert_eq!(event["who"], " alice ");
        assert_eq!(event["attempts"], 3);
        assert_eq!(event["source"], "web");
        assert!(event.get("action").is_none());

        // The filtered logout event must never appear.
        assert!(timeout(Duration::from_millis(100), out.next()).await.is_err());
        assert_eq!(broker.messages("unified").await.len(), 1);

        pool.stop_pool().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn add_delete_readd_leaks_nothing() {
    timeout(TEST_TIMEOUT, async {
        let broker = MemoryBroker::new();
        let pool = pool(&broker);
        let id = RuleId::new("7");

        for _ in 0..3 {
            pool.add_worker(id.clone(), rule("a", "b")).await.unwrap();
            eventually(|| async { broker.open_consumers() == 1 }).await;

            pool.delete_worker(&id).await.unwrap();
            assert!(!pool.contains(&id).await);
            eventually(|| async { broker.open_consumers() == 0 && broker.open_producers() == 0 })
                .await;
        }

        assert!(pool.is_empty().await);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn replacing_a_worker_keeps_one_running() {
    timeout(TEST_TIMEOUT, async {
        let broker = MemoryBroker::new();
        let pool = pool(&broker);
        let id = RuleId::new("1");

        pool.add_worker(id.clone(), rule("a", "out-a")).await.unwrap();
        eventually(|| async { broker.open_consumers() == 1 }).await;

        let outcome = pool.add_worker(id.clone(), rule("a", "out-b")).await.unwrap();
        assert_eq!(outcome, AddOutcome::Replaced);
        eventually(|| async {
            pool.status(&id).await.map(|s| s.state) == Some(WorkerState::Running)
        })
        .await;
        assert_eq!(broker.open_consumers(), 1);
        assert_eq!(broker.open_producers(), 1);

        broker.publish("a", br#"{"x":"y"}"#).await;
        eventually(|| async { broker.messages("out-b").await.len() == 1 }).await;
        assert!(broker.messages("out-a").await.is_empty());

        assert_eq!(pool.stop_pool().await, 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn stop_pool_stops_every_worker() {
    timeout(TEST_TIMEOUT, async {
        let broker = MemoryBroker::new();
        let pool = pool(&broker);

        for i in 0..5 {
            pool.add_worker(RuleId::from(i), rule(&format!("in-{i}"), "out"))
                .await
                .unwrap();
        }
        eventually(|| async { broker.open_consumers() == 5 }).await;

        assert_eq!(pool.stop_pool().await, 5);
        assert!(pool.is_empty().await);
        assert_eq!(broker.open_consumers(), 0);
        assert_eq!(broker.open_producers(), 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn failed_worker_is_reported_and_holds_nothing() {
    timeout(TEST_TIMEOUT, async {
        let broker = MemoryBroker::new();
        let pool = pool(&broker);
        let id = RuleId::new("bad");

        let mut config = rule("a", "b");
        config.filter.regexp = "[".into();
        pool.add_worker(id.clone(), config).await.unwrap();

        eventually(|| async {
            pool.status(&id).await.map(|s| s.state) == Some(WorkerState::Failed)
        })
        .await;
        assert_eq!(broker.open_consumers(), 0);

        // A failed worker can still be deleted.
        pool.delete_worker(&id).await.unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn bootstrap_starts_persisted_rules() {
    timeout(TEST_TIMEOUT, async {
        let broker = MemoryBroker::new();
        let db = LibSqlBackend::new_memory().await.unwrap();
        let owner = db.create_user("alice", "hash").await.unwrap();
        let first = db.create_rule(&rule("a", "b"), owner).await.unwrap();
        let second = db.create_rule(&rule("c", "d"), owner).await.unwrap();

        let pool = WorkerPool::bootstrap(
            Arc::new(broker.clone()),
            &db,
            PoolConfig::default(),
        )
        .await
        .unwrap();

        assert!(pool.contains(&RuleId::from(first)).await);
        assert!(pool.contains(&RuleId::from(second)).await);
        eventually(|| async { broker.open_consumers() == 2 }).await;

        pool.stop_pool().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn bootstrap_skips_rules_that_no_longer_decode() {
    timeout(TEST_TIMEOUT, async {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unifier.db");
        let broker = MemoryBroker::new();

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let owner = db.create_user("alice", "hash").await.unwrap();
        let good = db.create_rule(&rule("a", "b"), owner).await.unwrap();

        // Written by hand: the stored config is missing `topicTo`.
        let raw = libsql::Builder::new_local(&path).build().await.unwrap();
        raw.connect()
            .unwrap()
            .execute(
                r#"INSERT INTO rules (config) VALUES ('{"topicFrom":"x"}')"#,
                (),
            )
            .await
            .unwrap();

        let pool = WorkerPool::bootstrap(Arc::new(broker.clone()), &db, PoolConfig::default())
            .await
            .unwrap();

        assert_eq!(pool.len().await, 1);
        assert!(pool.contains(&RuleId::from(good)).await);
        eventually(|| async { broker.open_consumers() == 1 }).await;

        pool.stop_pool().await;
    })
    .await
    .expect("test timed out");
}
