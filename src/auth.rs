//! User accounts and session tokens.
//!
//! Passwords are stored as PBKDF2-HMAC-SHA256 PHC strings
//! (`$pbkdf2-sha256$i=…,l=32$salt$hash`) with a random per-user salt, so the
//! round count travels with each hash. Sessions are opaque UUID tokens
//! persisted with an expiry.

use std::sync::Arc;

use chrono::{Duration, Utc};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::{Params, Pbkdf2};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AuthError, DatabaseError};
use crate::store::Database;

/// PBKDF2-HMAC-SHA256 iteration count (OWASP 2023 recommendation).
pub const DEFAULT_HASH_ROUNDS: u32 = 600_000;

/// Derived key length in bytes.
const HASH_LENGTH: usize = 32;

/// Hash `password` with a fresh random salt and `rounds` PBKDF2 iterations.
pub fn hash_password(password: &SecretString, rounds: u32) -> Result<String, AuthError> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| AuthError::Hash(e.to_string()))?;
    let params = Params {
        rounds,
        output_length: HASH_LENGTH,
    };
    let hash = Pbkdf2
        .hash_password_customized(
            password.expose_secret().as_bytes(),
            None,
            None,
            params,
            &salt,
        )
        .map_err(|e| AuthError::Hash(e.to_string()))?;
    Ok(hash.to_string())
}

/// Check `password` against a hash produced by [`hash_password`].
///
/// The round count is read from the stored hash. Anything that does not
/// parse as a PHC string never verifies.
pub fn verify_password(password: &SecretString, stored: &str) -> bool {
    let parsed = match PasswordHash::new(stored) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Stored password hash is malformed");
            return false;
        }
    };
    Pbkdf2
        .verify_password(password.expose_secret().as_bytes(), &parsed)
        .is_ok()
}

/// Registration, login and token checks on top of the store.
#[derive(Clone)]
pub struct AuthService {
    db: Arc<dyn Database>,
    session_ttl: Duration,
    hash_rounds: u32,
}

impl AuthService {
    pub fn new(db: Arc<dyn Database>, session_ttl: Duration) -> Self {
        Self {
            db,
            session_ttl,
            hash_rounds: DEFAULT_HASH_ROUNDS,
        }
    }

    /// PBKDF2 rounds for passwords hashed from now on. Existing hashes keep
    /// verifying with the rounds they were created with.
    pub fn with_hash_rounds(mut self, rounds: u32) -> Self {
        self.hash_rounds = rounds;
        self
    }

    /// Create a user and open a session for it.
    pub async fn register(&self, login: &str, password: &SecretString) -> Result<String, AuthError> {
        let rounds = self.hash_rounds;
        let hash = off_runtime(password, move |password| hash_password(&password, rounds)).await??;
        let user_id = match self.db.create_user(login, &hash).await {
            Ok(id) => id,
            Err(DatabaseError::Constraint(_)) => {
                return Err(AuthError::UserExists(login.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        info!(user_id, login, "User registered");
        self.open_session(user_id).await
    }

    /// Check credentials and open a session.
    pub async fn login(&self, login: &str, password: &SecretString) -> Result<String, AuthError> {
        let user = self
            .db
            .get_user_by_login(login)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let stored = user.password_hash.clone();
        if !off_runtime(password, move |password| verify_password(&password, &stored)).await? {
            debug!(login, "Password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let pruned = self.db.delete_expired_sessions(Utc::now()).await?;
        if pruned > 0 {
            debug!(pruned, "Expired sessions removed");
        }

        self.open_session(user.id).await
    }

    /// Resolve a session token to its user id.
    pub async fn authenticate(&self, token: &str) -> Result<i64, AuthError> {
        self.db
            .get_session_user(token, Utc::now())
            .await?
            .ok_or(AuthError::InvalidToken)
    }

    async fn open_session(&self, user_id: i64) -> Result<String, AuthError> {
        let token = Uuid::new_v4().to_string();
        self.db
            .create_session(&token, user_id, Utc::now() + self.session_ttl)
            .await?;
        Ok(token)
    }
}

/// Run a key derivation on the blocking pool so it does not stall the
/// async workers.
async fn off_runtime<T, F>(password: &SecretString, f: F) -> Result<T, AuthError>
where
    T: Send + 'static,
    F: FnOnce(SecretString) -> T + Send + 'static,
{
    let password = SecretString::from(password.expose_secret().to_owned());
    tokio::task::spawn_blocking(move || f(password))
        .await
        .map_err(|e| AuthError::Hash(format!("hashing task failed: {e}")))
}
