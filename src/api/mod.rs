//! HTTP control API: accounts, rule management and worker status.

pub mod error;
pub mod rules;
pub mod session;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::{Json, Router, middleware};
use axum::response::IntoResponse;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AuthService;
use crate::store::Database;
use crate::worker::WorkerPool;

pub use error::ApiError;
pub use session::AuthUser;

/// Shared state of every API handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub pool: Arc<WorkerPool>,
    pub auth: AuthService,
}

impl AppState {
    pub fn new(db: Arc<dyn Database>, pool: Arc<WorkerPool>, auth: AuthService) -> Self {
        Self { db, pool, auth }
    }
}

/// Build the API router.
///
/// # Routes
/// - Public:
///   - `GET /health`
///   - `POST /api/user/register`
///   - `POST /api/user/login`
/// - Session required:
///   - `GET /api/rules`, `POST /api/rules`
///   - `DELETE /api/rules/{id}`
///   - `GET /api/workers`
pub fn api_routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/rules", get(rules::list_rules).post(rules::create_rule))
        .route("/api/rules/{id}", delete(rules::delete_rule))
        .route("/api/workers", get(rules::list_workers))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session::require_session,
        ));

    let public = Router::new()
        .route("/health", get(health))
        .route("/api/user/register", post(session::register))
        .route("/api/user/login", post(session::login));

    protected
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "event-unifier"
    }))
}
