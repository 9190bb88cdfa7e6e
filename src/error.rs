//! Error types for the event unifier.

use crate::model::RuleId;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),
}

/// Rule configuration errors, detected when a rule is compiled.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid filter regexp {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Unknown unifier type {type_name:?} for field {field}")]
    UnknownType { field: String, type_name: String },

    #[error("Unknown enrichment function {name:?} for field {field}")]
    UnknownFunction { field: String, name: String },

    #[error("Field {0:?} is reserved for the entity hash")]
    ReservedField(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<libsql::Error> for DatabaseError {
    fn from(e: libsql::Error) -> Self {
        DatabaseError::Query(e.to_string())
    }
}

/// Message broker errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Failed to open consumer on topic {topic} (group {group}): {reason}")]
    ConsumerOpen {
        topic: String,
        group: String,
        reason: String,
    },

    #[error("Failed to open producer on topic {topic}: {reason}")]
    ProducerOpen { topic: String, reason: String },

    #[error("Failed to receive from topic {topic}: {reason}")]
    Receive { topic: String, reason: String },

    #[error("Failed to publish to topic {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Failed to close {resource}: {reason}")]
    Close { resource: String, reason: String },

    #[error("Topic {0} is closed")]
    Closed(String),
}

/// Per-message transformation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("Invalid regexp {pattern:?}: {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Invalid JSON event: {0}")]
    Parse(String),

    #[error("Field {field}: expected an integer, got {value}")]
    NotAnInteger { field: String, value: String },

    #[error("Field {field}: invalid RFC 3339 timestamp {value:?}: {reason}")]
    InvalidTimestamp {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Unknown func: {0}")]
    UnknownFunction(String),

    #[error("Function {name} expects {expected} argument(s), got {got}")]
    InvalidArguments {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("Failed to serialize event: {0}")]
    Serialize(String),
}

/// Terminal errors of a single stream worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker {id}: invalid rule: {source}")]
    Config {
        id: RuleId,
        #[source]
        source: ConfigError,
    },

    #[error("Worker {id}: {source}")]
    Broker {
        id: RuleId,
        #[source]
        source: BrokerError,
    },
}

/// Worker pool errors.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Worker {0} not found")]
    NotFound(RuleId),

    #[error("Pool is shutting down")]
    ShuttingDown,

    #[error("Failed to load rules: {0}")]
    Bootstrap(#[from] DatabaseError),
}

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing session token")]
    MissingToken,

    #[error("Invalid or expired session token")]
    InvalidToken,

    #[error("Login or password incorrect")]
    InvalidCredentials,

    #[error("User {0} already exists")]
    UserExists(String),

    #[error("Password hashing failed: {0}")]
    Hash(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
