//! Mapping of domain errors to HTTP responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::error::{AuthError, ConfigError, DatabaseError, PoolError};

/// Error returned by every API handler.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "Request failed");
        }
        (
            self.status(),
            Json(serde_json::json!({"error": self.to_string()})),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        Self::BadRequest(e.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::MissingToken | AuthError::InvalidToken | AuthError::InvalidCredentials => {
                Self::Unauthorized(e.to_string())
            }
            AuthError::UserExists(_) => Self::Conflict(e.to_string()),
            AuthError::Hash(_) => Self::Internal(e.to_string()),
            AuthError::Database(e) => e.into(),
        }
    }
}

impl From<PoolError> for ApiError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::NotFound(_) => Self::NotFound(e.to_string()),
            PoolError::ShuttingDown => Self::Unavailable(e.to_string()),
            PoolError::Bootstrap(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RuleId;

    #[test]
    fn auth_errors_map_to_status() {
        assert_eq!(
            ApiError::from(AuthError::MissingToken).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(AuthError::UserExists("a".into())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(AuthError::Hash("bad salt".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn pool_errors_map_to_status() {
        assert_eq!(
            ApiError::from(PoolError::NotFound(RuleId::new("1"))).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(PoolError::ShuttingDown).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn internal_error_hides_detail() {
        let err = ApiError::from(DatabaseError::Query("secret detail".into()));
        assert_eq!(err.to_string(), "Internal server error");
    }
}
