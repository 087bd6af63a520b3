//! Shared error handling for API endpoints.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::error::AuthError;

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Credentials or refresh token rejected.
    Unauthorized,
    /// Missing or invalid bearer token. Carries a `WWW-Authenticate` challenge.
    Unauthenticated,
    Conflict(String),
    TooManyRequests(String),
    ServiceUnavailable,
    Internal,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn too_many_requests(msg: impl Into<String>) -> Self {
        Self::TooManyRequests(msg.into())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidInput(msg) => ApiError::BadRequest(msg),
            AuthError::Unauthorized | AuthError::NotFound => ApiError::Unauthorized,
            AuthError::Unauthenticated => ApiError::Unauthenticated,
            AuthError::Conflict(msg) => ApiError::Conflict(msg.to_string()),
            AuthError::RateLimited => {
                ApiError::TooManyRequests("Too many login attempts. Please try again later.".into())
            }
            AuthError::Unavailable(e) => {
                error!("Storage unavailable: {}", e);
                ApiError::ServiceUnavailable
            }
            AuthError::Timeout(op) => {
                error!(op, "Storage deadline exceeded");
                ApiError::ServiceUnavailable
            }
            AuthError::Internal(e) => {
                error!("Internal error: {}", e);
                ApiError::Internal
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let challenge = matches!(self, ApiError::Unauthenticated);
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized | ApiError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string())
            }
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal error".to_string(),
            ),
        };

        let mut response = (status, Json(ErrorResponse { error: message })).into_response();
        if challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
