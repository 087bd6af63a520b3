//! tonic adapter for the auth gate.
//!
//! RPC services install [`GateInterceptor`] and read the identity back with
//! [`authenticated_user`]. Refresh calls carry the refresh token and its owner
//! in the `x-refresh-token` and `x-user-id` metadata entries.

use tonic::metadata::{Ascii, MetadataMap, MetadataValue};
use tonic::service::Interceptor;
use tonic::{Request, Status};
use uuid::Uuid;

use super::gate::{AuthGate, AuthenticatedUser};
use crate::error::AuthError;

pub const AUTHORIZATION_METADATA: &str = "authorization";
pub const REFRESH_TOKEN_METADATA: &str = "x-refresh-token";
pub const USER_ID_METADATA: &str = "x-user-id";

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized | AuthError::Unauthenticated | AuthError::NotFound => {
                Status::unauthenticated("Unauthorized")
            }
            AuthError::InvalidInput(msg) => Status::invalid_argument(msg),
            AuthError::Conflict(msg) => Status::already_exists(msg),
            AuthError::RateLimited => Status::resource_exhausted("Too many requests"),
            AuthError::Unavailable(e) => {
                tracing::error!("RPC storage failure: {}", e);
                Status::unavailable("Service unavailable")
            }
            AuthError::Timeout(op) => {
                tracing::error!(op, "RPC storage deadline exceeded");
                Status::deadline_exceeded("Service unavailable")
            }
            AuthError::Internal(e) => {
                tracing::error!("RPC internal error: {}", e);
                Status::internal("Internal error")
            }
        }
    }
}

/// Rejects calls without a valid bearer token in the `authorization` metadata.
#[derive(Clone)]
pub struct GateInterceptor {
    gate: AuthGate,
}

impl GateInterceptor {
    pub fn new(gate: AuthGate) -> Self {
        Self { gate }
    }
}

impl Interceptor for GateInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let authorization = request
            .metadata()
            .get(AUTHORIZATION_METADATA)
            .and_then(|value| value.to_str().ok());

        let user = self.gate.authenticate(authorization)?;
        request.extensions_mut().insert(user);
        Ok(request)
    }
}

/// The identity attached by [`GateInterceptor`].
pub fn authenticated_user<T>(request: &Request<T>) -> Result<AuthenticatedUser, Status> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .copied()
        .ok_or_else(|| Status::unauthenticated("Unauthorized"))
}

/// Read the refresh token and its owner from call metadata.
pub fn refresh_credentials(metadata: &MetadataMap) -> Result<(String, Uuid), AuthError> {
    let token = metadata
        .get(REFRESH_TOKEN_METADATA)
        .and_then(|value| value.to_str().ok())
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::Unauthorized)?;
    let user_id = metadata
        .get(USER_ID_METADATA)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .ok_or(AuthError::Unauthorized)?;
    Ok((token.to_string(), user_id))
}

/// Write a refresh token and its owner into response metadata.
pub fn set_refresh_credentials(
    metadata: &mut MetadataMap,
    token: &str,
    user_id: Uuid,
) -> Result<(), AuthError> {
    let token: MetadataValue<Ascii> = token
        .parse()
        .map_err(|_| AuthError::Internal("refresh token is not valid metadata".into()))?;
    let user: MetadataValue<Ascii> = user_id
        .to_string()
        .parse()
        .map_err(|_| AuthError::Internal("user id is not valid metadata".into()))?;
    metadata.insert(REFRESH_TOKEN_METADATA, token);
    metadata.insert(USER_ID_METADATA, user);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::{DEFAULT_ACCESS_TOKEN_TTL, TokenCodec};
    use std::sync::Arc;

    fn interceptor() -> (GateInterceptor, Arc<TokenCodec>) {
        let codec = Arc::new(TokenCodec::new(
            b"rpc-test-secret-0123456789abcdefgh",
            DEFAULT_ACCESS_TOKEN_TTL,
        ));
        (GateInterceptor::new(AuthGate::new(codec.clone())), codec)
    }

    #[test]
    fn test_interceptor_attaches_identity() {
        let (mut interceptor, codec) = interceptor();
        let user_id = Uuid::new_v4();
        let token = codec.issue(user_id).unwrap().token;

        let mut request = Request::new(());
        request.metadata_mut().insert(
            AUTHORIZATION_METADATA,
            format!("Bearer {}", token).parse().unwrap(),
        );

        let request = interceptor.call(request).unwrap();
        assert_eq!(authenticated_user(&request).unwrap().user_id, user_id);
    }

    #[test]
    fn test_interceptor_rejects_missing_token() {
        let (mut interceptor, _) = interceptor();
        let status = interceptor.call(Request::new(())).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
        assert_eq!(status.message(), "Unauthorized");
    }

    #[test]
    fn test_interceptor_rejects_bad_token() {
        let (mut interceptor, _) = interceptor();
        let mut request = Request::new(());
        request
            .metadata_mut()
            .insert(AUTHORIZATION_METADATA, "Bearer garbage".parse().unwrap());

        let status = interceptor.call(request).unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Status::from(AuthError::RateLimited).code(),
            tonic::Code::ResourceExhausted
        );
        assert_eq!(
            Status::from(AuthError::Conflict("taken")).code(),
            tonic::Code::AlreadyExists
        );
        assert_eq!(
            Status::from(AuthError::Timeout("rotate")).code(),
            tonic::Code::DeadlineExceeded
        );
        let internal = Status::from(AuthError::Internal("secret detail".into()));
        assert_eq!(internal.code(), tonic::Code::Internal);
        assert!(!internal.message().contains("secret"));
    }

    #[test]
    fn test_refresh_credentials_roundtrip() {
        let user_id = Uuid::new_v4();
        let mut metadata = MetadataMap::new();
        set_refresh_credentials(&mut metadata, "opaque-token", user_id).unwrap();

        let (token, owner) = refresh_credentials(&metadata).unwrap();
        assert_eq!(token, "opaque-token");
        assert_eq!(owner, user_id);
    }

    #[test]
    fn test_refresh_credentials_missing() {
        let mut metadata = MetadataMap::new();
        assert!(matches!(
            refresh_credentials(&metadata),
            Err(AuthError::Unauthorized)
        ));

        metadata.insert(REFRESH_TOKEN_METADATA, "tok".parse().unwrap());
        metadata.insert(USER_ID_METADATA, "not-a-uuid".parse().unwrap());
        assert!(matches!(
            refresh_credentials(&metadata),
            Err(AuthError::Unauthorized)
        ));
    }
}
