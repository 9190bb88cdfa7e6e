//! Configuration types.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::auth::DEFAULT_HASH_ROUNDS;
use crate::broker::KafkaConfig;
use crate::broker::memory::DEFAULT_RETENTION;
use crate::worker::PoolConfig;

/// Kafka event unifier.
///
/// Runs one transformation worker per stored rule and exposes an HTTP API to
/// manage rules. Every flag can also be set through its environment variable.
#[derive(Parser, Debug, Clone)]
#[command(name = "event-unifier")]
#[command(version, about, long_about = None)]
pub struct AppConfig {
    // === Broker ===
    /// Kafka bootstrap servers
    #[arg(short = 'a', long, env = "KAFKA_ADDRESS", default_value = "localhost:9092")]
    pub kafka_address: String,

    /// Message broker backend
    #[arg(long, env = "BROKER", value_enum, default_value = "kafka")]
    pub broker: BrokerKind,

    /// Messages kept per topic and per consumer group by the memory broker
    #[arg(long, env = "MEMORY_RETENTION", default_value_t = DEFAULT_RETENTION, value_parser = parse_positive_usize)]
    pub memory_retention: usize,

    // === Storage ===
    /// Path of the libSQL database file
    #[arg(short = 'd', long, env = "DATABASE_PATH", default_value = "./data/unifier.db")]
    pub database_path: PathBuf,

    // === HTTP ===
    /// Address the HTTP API listens on
    #[arg(long, env = "HTTP_ADDR", default_value = "127.0.0.1:8080")]
    pub http_addr: SocketAddr,

    // === Workers ===
    /// Seconds to wait for workers to stop before aborting them (must be >= 1)
    #[arg(long, env = "WORKER_STOP_TIMEOUT_SECS", default_value = "10", value_parser = parse_positive_u64)]
    pub stop_timeout_secs: u64,

    // === Auth ===
    /// Session lifetime in minutes (1 to 527040, i.e. at most 366 days)
    #[arg(long, env = "SESSION_TTL_MINUTES", default_value = "15", value_parser = parse_session_ttl)]
    pub session_ttl_minutes: u32,

    /// PBKDF2 rounds for newly hashed passwords (must be >= 1)
    #[arg(long, env = "PASSWORD_HASH_ROUNDS", default_value_t = DEFAULT_HASH_ROUNDS, value_parser = clap::value_parser!(u32).range(1..))]
    pub password_hash_rounds: u32,

    // === Logging ===
    /// Log filter directive (e.g. "info" or "event_unifier=debug")
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

/// Message broker backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BrokerKind {
    /// Apache Kafka through librdkafka
    Kafka,
    /// In-process broker; topics live only as long as the process
    Memory,
}

impl AppConfig {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
        }
    }

    pub fn kafka_config(&self) -> KafkaConfig {
        KafkaConfig {
            brokers: self.kafka_address.clone(),
            ..KafkaConfig::default()
        }
    }

    /// Session lifetime. `parse_session_ttl` keeps it far inside chrono's range.
    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.session_ttl_minutes))
    }
}

const MAX_SESSION_TTL_MINUTES: u32 = 366 * 24 * 60;

fn parse_session_ttl(s: &str) -> Result<u32, String> {
    let value: u32 = s.parse().map_err(|e| format!("{e}"))?;
    if !(1..=MAX_SESSION_TTL_MINUTES).contains(&value) {
        return Err(format!("must be between 1 and {MAX_SESSION_TTL_MINUTES}"));
    }
    Ok(value)
}

fn parse_positive_usize(s: &str) -> Result<usize, String> {
    let value: usize = s.parse().map_err(|e| format!("{e}"))?;
    if value == 0 {
        return Err("must be at least 1".to_string());
    }
    Ok(value)
}

fn parse_positive_u64(s: &str) -> Result<u64, String> {
    let value: u64 = s.parse().map_err(|e| format!("{e}"))?;
    if value == 0 {
        return Err("must be at least 1".to_string());
    }
    Ok(value)
}
