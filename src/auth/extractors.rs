//! Axum adapter for the auth gate.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use super::gate::AuthenticatedUser;
use super::state::HasAuthGate;
use crate::api::ApiError;

/// Extractor for endpoints that require a valid bearer token.
///
/// The verified identity is also stored in the request extensions, so a
/// second extraction in the same request does not verify again.
pub struct Auth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthGate + Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(Auth(*user));
        }

        let authorization = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let user = state.gate().authenticate(authorization)?;
        parts.extensions.insert(user);
        Ok(Auth(user))
    }
}
