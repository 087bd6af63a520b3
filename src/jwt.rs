//! Access token signing and verification.
//!
//! Access tokens are short-lived HS256 JWTs carrying only the user id. They are
//! never stored and cannot be revoked individually; revoking the session that
//! issued the refresh chain stops further renewal.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::clock::unix_now;

/// Default access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// JWT claims for access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user UUID)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Unique token id, keeps two tokens issued in the same second distinct
    pub jti: String,
}

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: i64,
    /// Token lifetime in seconds
    pub expires_in: u64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    /// Bad signature, wrong algorithm, expired, or missing subject. Deliberately
    /// carries no detail.
    #[error("invalid token")]
    InvalidToken,
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
}

/// Signs and verifies access tokens with a symmetric secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue an access token for `user_id`, valid from now for the configured TTL.
    pub fn issue(&self, user_id: Uuid) -> Result<AccessToken, TokenError> {
        self.issue_at(user_id, unix_now())
    }

    pub fn issue_at(&self, user_id: Uuid, now: i64) -> Result<AccessToken, TokenError> {
        let expires_in = self.ttl.as_secs();
        let exp = now + expires_in as i64;

        let claims = AccessClaims {
            sub: user_id.to_string(),
            iat: now,
            exp,
            jti: Uuid::new_v4().to_string(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(TokenError::Encoding)?;

        Ok(AccessToken {
            token,
            expires_at: exp,
            expires_in,
        })
    }

    /// Verify a token and return the user id it was issued for.
    ///
    /// Only HS256 is accepted, so a header claiming another algorithm is
    /// rejected before the signature is looked at.
    pub fn verify(&self, token: &str) -> Result<Uuid, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(|_| TokenError::InvalidToken)?;

        Uuid::parse_str(&data.claims.sub).map_err(|_| TokenError::InvalidToken)
    }
}
