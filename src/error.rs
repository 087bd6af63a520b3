//! Error taxonomy shared by the stores, the orchestrator and both transports.

use thiserror::Error;

/// Errors surfaced by the authentication core.
///
/// Every credential or token problem collapses into [`AuthError::Unauthorized`] or
/// [`AuthError::Unauthenticated`] so callers cannot tell which check failed.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Malformed request fields.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Bad credentials, bad or replayed refresh token, blocked user.
    #[error("unauthorized")]
    Unauthorized,
    /// Missing or invalid bearer token at the gate.
    #[error("unauthenticated")]
    Unauthenticated,
    /// Duplicate registration or duplicate refresh token.
    #[error("conflict: {0}")]
    Conflict(&'static str),
    #[error("not found")]
    NotFound,
    /// The rate guard refused the request.
    #[error("rate limited")]
    RateLimited,
    /// A storage dependency failed.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// A storage call outlived its deadline.
    #[error("storage call timed out: {0}")]
    Timeout(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors returned by the SQL-backed stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("unique constraint violated")]
    Conflict,
    /// A stored value could not be decoded (for example a malformed UUID).
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::Conflict,
            _ => StoreError::Database(err),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AuthError::NotFound,
            StoreError::Conflict => AuthError::Conflict("duplicate record"),
            StoreError::Corrupt(msg) => AuthError::Internal(msg),
            StoreError::Database(e) => AuthError::Unavailable(e.to_string()),
        }
    }
}

impl AuthError {
    /// Whether this error is a server-side fault that should be logged loudly.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            AuthError::Unavailable(_) | AuthError::Timeout(_) | AuthError::Internal(_)
        )
    }
}
