//! Rule management and worker status endpoints.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::{ApiError, AppState, AuthUser};
use crate::error::PoolError;
use crate::model::{Rule, RuleConfig, RuleId};
use crate::transform::Pipeline;
use crate::worker::WorkerStatus;

/// GET /api/rules
pub async fn list_rules(State(state): State<AppState>) -> Result<Json<Vec<Rule>>, ApiError> {
    Ok(Json(state.db.list_rules().await?))
}

/// POST /api/rules
///
/// The rule is compiled before it is stored, so a rule that would fail its
/// worker at start is rejected with 400 instead.
pub async fn create_rule(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    body: Result<Json<RuleConfig>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(config) = body?;
    Pipeline::compile(
        Arc::new(config.clone()),
        Arc::clone(state.pool.functions()),
    )?;

    let id = state.db.create_rule(&config, user.id).await?;
    state.pool.add_worker(RuleId::from(id), config).await?;

    info!(rule_id = id, owner = user.id, "Rule created");
    Ok(Json(json!({ "id": id })))
}

/// DELETE /api/rules/{id}
pub async fn delete_rule(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id: i64 = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid rule id {id:?}")))?;

    let rule = state
        .db
        .get_rule(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Rule {id} not found")))?;
    if rule.owner != Some(user.id) {
        return Err(ApiError::Forbidden);
    }

    state.db.delete_rule(id).await?;
    match state.pool.delete_worker(&rule.rule_id()).await {
        Ok(()) => {}
        Err(PoolError::NotFound(rule_id)) => {
            warn!(%rule_id, "Deleted rule had no worker");
        }
        Err(e) => return Err(e.into()),
    }

    info!(rule_id = id, owner = user.id, "Rule deleted");
    Ok(Json(json!({ "id": id })))
}

/// GET /api/workers
pub async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerStatus>> {
    Json(state.pool.list().await)
}
