//! The single authentication boundary shared by the HTTP and RPC surfaces.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::AuthError;
use crate::jwt::TokenCodec;

/// Identity attached to a request once its bearer token has been verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
}

/// Verifies bearer tokens. Transports hand it the raw `Authorization` value
/// and get back an [`AuthenticatedUser`] or `Unauthenticated`.
#[derive(Clone)]
pub struct AuthGate {
    codec: Arc<TokenCodec>,
}

impl AuthGate {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }

    /// Authenticate from an `Authorization` header (or metadata) value.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<AuthenticatedUser, AuthError> {
        let token = authorization
            .and_then(bearer_token)
            .ok_or(AuthError::Unauthenticated)?;
        self.authenticate_token(token)
    }

    /// Authenticate a bare token, already stripped of its scheme.
    pub fn authenticate_token(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let user_id = self.codec.verify(token).map_err(|_| {
            tracing::debug!("Rejected bearer token");
            AuthError::Unauthenticated
        })?;

        if user_id.is_nil() {
            tracing::debug!("Rejected bearer token with nil subject");
            return Err(AuthError::Unauthenticated);
        }

        Ok(AuthenticatedUser { user_id })
    }
}

/// Extract the token from a `Bearer <token>` value. The scheme is
/// case-insensitive; the token must be non-empty and contain no spaces.
pub fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() || token.contains(' ') {
        return None;
    }
    Some(token)
}
