//! Protobuf messages of the `authgate.v1` package.
//!
//! Refresh tokens never appear in a message body: they travel in the
//! `x-refresh-token` / `x-user-id` metadata entries.

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterRequest {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub email: String,
    #[prost(string, tag = "3")]
    pub password: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RegisterReply {
    #[prost(string, tag = "1")]
    pub user_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LoginRequest {
    /// Username or email
    #[prost(string, tag = "1")]
    pub identifier: String,
    #[prost(string, tag = "2")]
    pub password: String,
}

/// A freshly issued access token.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TokenReply {
    #[prost(string, tag = "1")]
    pub user_id: String,
    /// Set by login only
    #[prost(string, tag = "2")]
    pub session_id: String,
    #[prost(string, tag = "3")]
    pub access_token: String,
    #[prost(int64, tag = "4")]
    pub expires_at: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LogoutRequest {
    #[prost(string, tag = "1")]
    pub session_id: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LogoutAllReply {
    #[prost(uint64, tag = "1")]
    pub revoked: u64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Empty {}
