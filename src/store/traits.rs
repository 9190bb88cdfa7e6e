//! `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::model::{Rule, RuleConfig, User};

/// Backend-agnostic database trait covering users, rules, and sessions.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Rules ───────────────────────────────────────────────────────

    /// All persisted rules, ordered by id.
    async fn list_rules(&self) -> Result<Vec<Rule>, DatabaseError>;

    /// Like `list_rules`, but a row whose stored config no longer decodes
    /// comes back as an error next to its id instead of failing the load.
    async fn load_rules(&self) -> Result<Vec<(i64, Result<Rule, DatabaseError>)>, DatabaseError>;

    async fn get_rule(&self, id: i64) -> Result<Option<Rule>, DatabaseError>;

    /// Persist a rule and return its new id.
    async fn create_rule(&self, config: &RuleConfig, owner: i64) -> Result<i64, DatabaseError>;

    /// Delete a rule. Returns `false` if it did not exist.
    async fn delete_rule(&self, id: i64) -> Result<bool, DatabaseError>;

    // ── Users ───────────────────────────────────────────────────────

    async fn get_user_by_login(&self, login: &str) -> Result<Option<User>, DatabaseError>;

    /// Insert a user and return its id.
    ///
    /// Fails with `DatabaseError::Constraint` when the login is taken.
    async fn create_user(&self, login: &str, password_hash: &str) -> Result<i64, DatabaseError>;

    // ── Sessions ────────────────────────────────────────────────────

    async fn create_session(
        &self,
        token: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// User id owning `token`, if the session exists and has not expired at `now`.
    async fn get_session_user(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, DatabaseError>;

    /// Remove sessions that expired before `now`. Returns the number removed.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError>;
}
