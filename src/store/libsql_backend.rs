//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::model::{Rule, RuleConfig, User};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests and the memory broker mode).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Canonical write format for timestamps; sorts lexicographically.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

fn row_to_rule(row: &libsql::Row) -> Result<Rule, DatabaseError> {
    let id: i64 = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("rule id: {e}")))?;
    let config: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("rule config: {e}")))?;
    // NULL once the owning user is gone.
    let owner: Option<i64> = row.get(2).ok();

    let rule: RuleConfig = serde_json::from_str(&config)
        .map_err(|e| DatabaseError::Serialization(format!("rule {id}: {e}")))?;

    Ok(Rule { id, rule, owner })
}

fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    Ok(User {
        id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("user id: {e}")))?,
        login: row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("user login: {e}")))?,
        password_hash: row
            .get(2)
            .map_err(|e| DatabaseError::Query(format!("user password_hash: {e}")))?,
    })
}

// ── Trait implementation ────────────────────────────────────────────

const RULE_COLUMNS: &str = "id, config, owner";

const USER_COLUMNS: &str = "id, login, password_hash";

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Rules ───────────────────────────────────────────────────────

    async fn list_rules(&self) -> Result<Vec<Rule>, DatabaseError> {
        self.load_rules()
            .await?
            .into_iter()
            .map(|(_, rule)| rule)
            .collect()
    }

    async fn load_rules(&self) -> Result<Vec<(i64, Result<Rule, DatabaseError>)>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(&format!("SELECT {RULE_COLUMNS} FROM rules ORDER BY id"), ())
            .await
            .map_err(|e| DatabaseError::Query(format!("load_rules: {e}")))?;

        let mut rules = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_rules: {e}")))?
        {
            let id: i64 = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("rule id: {e}")))?;
            rules.push((id, row_to_rule(&row)));
        }
        Ok(rules)
    }

    async fn get_rule(&self, id: i64) -> Result<Option<Rule>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_rule: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_rule(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_rule: {e}"))),
        }
    }

    async fn create_rule(&self, config: &RuleConfig, owner: i64) -> Result<i64, DatabaseError> {
        let json = serde_json::to_string(config)
            .map_err(|e| DatabaseError::Serialization(format!("create_rule: {e}")))?;

        let mut rows = self
            .conn()
            .query(
                "INSERT INTO rules (config, owner) VALUES (?1, ?2) RETURNING id",
                params![json, owner],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_rule: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_rule: {e}")))?
            .ok_or_else(|| DatabaseError::Query("create_rule: no id returned".into()))?;
        let id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("create_rule id: {e}")))?;

        debug!(rule_id = id, owner, "Rule inserted into DB");
        Ok(id)
    }

    async fn delete_rule(&self, id: i64) -> Result<bool, DatabaseError> {
        let count = self
            .conn()
            .execute("DELETE FROM rules WHERE id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_rule: {e}")))?;
        Ok(count > 0)
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn get_user_by_login(&self, login: &str) -> Result<Option<User>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE login = ?1"),
                params![login],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user_by_login: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user_by_login: {e}"))),
        }
    }

    async fn create_user(&self, login: &str, password_hash: &str) -> Result<i64, DatabaseError> {
        // The constraint can fire when the statement is prepared or when it is stepped.
        let insert_err = |e: libsql::Error| {
            if is_unique_violation(&e) {
                DatabaseError::Constraint(format!("login {login:?} already exists"))
            } else {
                DatabaseError::Query(format!("create_user: {e}"))
            }
        };

        let mut rows = self
            .conn()
            .query(
                "INSERT INTO users (login, password_hash) VALUES (?1, ?2) RETURNING id",
                params![login, password_hash],
            )
            .await
            .map_err(insert_err)?;

        let row = rows
            .next()
            .await
            .map_err(insert_err)?
            .ok_or_else(|| DatabaseError::Query("create_user: no id returned".into()))?;
        let id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("create_user id: {e}")))?;

        debug!(user_id = id, login, "User created");
        Ok(id)
    }

    // ── Sessions ────────────────────────────────────────────────────

    async fn create_session(
        &self,
        token: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![token, user_id, timestamp(Utc::now()), timestamp(expires_at)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_session: {e}")))?;
        Ok(())
    }

    async fn get_session_user(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT user_id FROM sessions WHERE token = ?1 AND expires_at > ?2",
                params![token, timestamp(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let user_id: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("session user_id: {e}")))?;
                Ok(Some(user_id))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_session_user: {e}"))),
        }
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let count = self
            .conn()
            .execute(
                "DELETE FROM sessions WHERE expires_at <= ?1",
                params![timestamp(now)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_expired_sessions: {e}")))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Filter;
    use chrono::Duration;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn make_rule(topic_from: &str) -> RuleConfig {
        RuleConfig {
            topic_from: topic_from.into(),
            filter: Filter {
                regexp: "login".into(),
            },
            entity_hash: vec!["user".into()],
            topic_to: "out".into(),
            ..Default::default()
        }
    }

    // ── Rule tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn create_and_get_rule() {
        let db = test_db().await;
        let owner = db.create_user("alice", "hash").await.unwrap();
        let config = make_rule("in");

        let id = db.create_rule(&config, owner).await.unwrap();
        let fetched = db.get_rule(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.owner, Some(owner));
        assert_eq!(fetched.rule, config);
    }

    #[tokio::test]
    async fn get_rule_not_found() {
        let db = test_db().await;
        assert!(db.get_rule(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_rules_ordered_by_id() {
        let db = test_db().await;
        let owner = db.create_user("alice", "hash").await.unwrap();
        let first = db.create_rule(&make_rule("a"), owner).await.unwrap();
        let second = db.create_rule(&make_rule("b"), owner).await.unwrap();

        let rules = db.list_rules().await.unwrap();
        let ids: Vec<_> = rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert_eq!(rules[1].rule.topic_from, "b");
    }

    #[tokio::test]
    async fn undecodable_rule_is_reported_per_row() {
        let db = test_db().await;
        let owner = db.create_user("alice", "hash").await.unwrap();
        let good = db.create_rule(&make_rule("a"), owner).await.unwrap();
        db.conn()
            .execute(
                r#"INSERT INTO rules (config) VALUES ('{"topicFrom":"x"}')"#,
                (),
            )
            .await
            .unwrap();

        let loaded = db.load_rules().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].0, good);
        assert!(loaded[0].1.is_ok());
        assert!(matches!(loaded[1].1, Err(DatabaseError::Serialization(_))));

        assert!(db.list_rules().await.is_err());
    }

    #[tokio::test]
    async fn schema_init_runs_on_a_spawned_task() {
        let db = Arc::new(test_db().await);
        let task = tokio::spawn({
            let db = Arc::clone(&db);
            async move { db.init_schema().await }
        });
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn delete_rule_reports_existence() {
        let db = test_db().await;
        let owner = db.create_user("alice", "hash").await.unwrap();
        let id = db.create_rule(&make_rule("a"), owner).await.unwrap();

        assert!(db.delete_rule(id).await.unwrap());
        assert!(!db.delete_rule(id).await.unwrap());
        assert!(db.list_rules().await.unwrap().is_empty());
    }

    // ── User tests ──────────────────────────────────────────────────

    #[tokio::test]
    async fn duplicate_login_is_a_constraint_error() {
        let db = test_db().await;
        db.create_user("alice", "hash").await.unwrap();
        let err = db.create_user("alice", "other").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn get_user_by_login() {
        let db = test_db().await;
        let id = db.create_user("alice", "salt$hash").await.unwrap();

        let user = db.get_user_by_login("alice").await.unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.password_hash, "salt$hash");
        assert!(db.get_user_by_login("bob").await.unwrap().is_none());
    }

    // ── Session tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn session_expires() {
        let db = test_db().await;
        let user = db.create_user("alice", "hash").await.unwrap();
        let now = Utc::now();
        db.create_session("tok", user, now + Duration::minutes(15))
            .await
            .unwrap();

        assert_eq!(db.get_session_user("tok", now).await.unwrap(), Some(user));
        assert_eq!(
            db.get_session_user("tok", now + Duration::minutes(16))
                .await
                .unwrap(),
            None
        );
        assert_eq!(db.get_session_user("nope", now).await.unwrap(), None);

        let removed = db
            .delete_expired_sessions(now + Duration::minutes(16))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn local_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("unifier.db");

        let id = {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            let owner = db.create_user("alice", "hash").await.unwrap();
            db.create_rule(&make_rule("a"), owner).await.unwrap()
        };

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        let rules = db.list_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, id);
    }
}
