use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use event_unifier::api::{AppState, api_routes};
use event_unifier::auth::AuthService;
use event_unifier::broker::{Broker, KafkaBroker, MemoryBroker};
use event_unifier::config::{AppConfig, BrokerKind};
use event_unifier::store::{Database, LibSqlBackend};
use event_unifier::worker::WorkerPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    eprintln!("🔀 Event Unifier v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Broker: {:?} ({})", config.broker, config.kafka_address);
    eprintln!("   Database: {}", config.database_path.display());
    eprintln!("   API: http://{}/api", config.http_addr);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.database_path)
            .await
            .with_context(|| {
                format!("failed to open database at {}", config.database_path.display())
            })?,
    );

    // ── Broker + workers ─────────────────────────────────────────────────
    let broker: Arc<dyn Broker> = match config.broker {
        BrokerKind::Kafka => Arc::new(KafkaBroker::new(config.kafka_config())),
        BrokerKind::Memory => Arc::new(MemoryBroker::with_retention(config.memory_retention)),
    };

    let pool = Arc::new(
        WorkerPool::bootstrap(broker, db.as_ref(), config.pool_config())
            .await
            .context("failed to start worker pool")?,
    );

    // ── HTTP API ─────────────────────────────────────────────────────────
    let auth = AuthService::new(Arc::clone(&db), config.session_ttl())
        .with_hash_rounds(config.password_hash_rounds);
    let state = AppState::new(Arc::clone(&db), Arc::clone(&pool), auth);
    let app = api_routes(state);

    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    tracing::info!(addr = %config.http_addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // ── Shutdown ─────────────────────────────────────────────────────────
    let stopped = pool.stop_pool().await;
    tracing::info!(workers = stopped, "Shutdown complete");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
