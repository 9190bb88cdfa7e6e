//! Registration, login and the session guard.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use secrecy::SecretString;
use serde::Deserialize;
use tracing::debug;

use super::{ApiError, AppState};
use crate::error::AuthError;

/// Name of the cookie carrying the session token.
pub const TOKEN_COOKIE: &str = "token";

/// Authenticated caller, inserted into request extensions by [`require_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: i64,
}

#[derive(Deserialize)]
pub struct Credentials {
    login: Option<String>,
    password: Option<String>,
}

impl Credentials {
    fn into_parts(self) -> Result<(String, SecretString), ApiError> {
        match (self.login, self.password) {
            (Some(login), Some(password)) if !login.trim().is_empty() => {
                Ok((login, SecretString::from(password)))
            }
            _ => Err(ApiError::BadRequest("login or password missing".into())),
        }
    }
}

/// POST /api/user/register
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(credentials) = body?;
    let (login, password) = credentials.into_parts()?;
    let token = state.auth.register(&login, &password).await?;
    token_response(token)
}

/// POST /api/user/login
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<Credentials>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(credentials) = body?;
    let (login, password) = credentials.into_parts()?;
    let token = state.auth.login(&login, &password).await?;
    token_response(token)
}

/// `{token}` body plus the session cookie.
fn token_response(token: String) -> Result<Response, ApiError> {
    let cookie = HeaderValue::from_str(&format!(
        "{TOKEN_COOKIE}={token}; Path=/api/; HttpOnly; SameSite=Lax"
    ))
    .map_err(|e| ApiError::Internal(format!("session cookie: {e}")))?;

    let mut response = Json(serde_json::json!({ "token": token })).into_response();
    response.headers_mut().insert(SET_COOKIE, cookie);
    Ok(response)
}

/// Reject requests without a live session; expose the caller as [`AuthUser`].
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = session_token(req.headers()).ok_or(AuthError::MissingToken)?;
    let id = state.auth.authenticate(&token).await?;
    debug!(user_id = id, path = %req.uri().path(), "Session accepted");

    req.extensions_mut().insert(AuthUser { id });
    Ok(next.run(req).await)
}

/// Token from `Authorization: Bearer` or, failing that, the session cookie.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}
