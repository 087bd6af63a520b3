//! Refresh session storage.
//!
//! Refresh tokens are opaque random strings handed to the client; only their
//! SHA-256 digest is stored. Each session is a single row whose digest is
//! replaced in place on every refresh, so the old token stops matching the
//! moment it is rotated.

use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use super::user::parse_uuid;
use crate::error::StoreError;

/// A refresh session. The token itself is never read back out of the store.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_agent: String,
    pub client_ip: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub is_blocked: bool,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    user_agent: String,
    client_ip: String,
    created_at: i64,
    expires_at: i64,
    is_blocked: i32,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            user_id: parse_uuid(&row.user_id)?,
            user_agent: row.user_agent,
            client_ip: row.client_ip,
            created_at: row.created_at,
            expires_at: row.expires_at,
            is_blocked: row.is_blocked != 0,
        })
    }
}

const SESSION_COLUMNS: &str =
    "id, user_id, user_agent, client_ip, created_at, expires_at, is_blocked";

pub struct NewSession<'a> {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token: &'a str,
    pub user_agent: &'a str,
    pub client_ip: &'a str,
    pub created_at: i64,
    pub expires_at: i64,
}

/// A compare-and-swap of a session's refresh token.
pub struct Rotation<'a> {
    pub session_id: Uuid,
    pub user_id: Uuid,
    /// The token the caller presented; the swap only happens if it is still live.
    pub expected_token: &'a str,
    pub new_token: &'a str,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Hex SHA-256 of a refresh token, the form it is stored and looked up in.
pub fn hash_refresh_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

#[derive(Clone)]
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new session. Fails with `Conflict` if the token digest already exists.
    pub async fn create(&self, session: &NewSession<'_>) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, refresh_hash, user_agent, client_ip, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(hash_refresh_token(session.refresh_token))
        .bind(session.user_agent)
        .bind(session.client_ip)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Find the session whose live token is `token`.
    pub async fn find_by_refresh_token(&self, token: &str) -> Result<Session, StoreError> {
        let row: SessionRow = sqlx::query_as(sqlx::AssertSqlSafe(format!(
            "SELECT {} FROM sessions WHERE refresh_hash = ?",
            SESSION_COLUMNS
        )))
        .bind(hash_refresh_token(token))
        .fetch_one(&self.pool)
        .await?;
        Session::try_from(row)
    }

    /// Find the session that `token` was the live token of one rotation ago.
    pub async fn find_by_previous_token(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(sqlx::AssertSqlSafe(format!(
            "SELECT {} FROM sessions WHERE previous_hash = ? LIMIT 1",
            SESSION_COLUMNS
        )))
        .bind(hash_refresh_token(token))
        .fetch_optional(&self.pool)
        .await?;
        row.map(Session::try_from).transpose()
    }

    /// Replace the session's token in a single conditional update.
    ///
    /// Matches on session id, owner and the expected live token digest at once.
    /// If a racing rotation already replaced the token, or the session is gone,
    /// zero rows match and this fails with `NotFound`.
    pub async fn rotate(&self, rotation: &Rotation<'_>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE sessions
             SET refresh_hash = ?, previous_hash = refresh_hash, created_at = ?, expires_at = ?
             WHERE id = ? AND user_id = ? AND refresh_hash = ?",
        )
        .bind(hash_refresh_token(rotation.new_token))
        .bind(rotation.created_at)
        .bind(rotation.expires_at)
        .bind(rotation.session_id.to_string())
        .bind(rotation.user_id.to_string())
        .bind(hash_refresh_token(rotation.expected_token))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete one session owned by `user_id`.
    pub async fn delete_one(&self, user_id: Uuid, session_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ? AND user_id = ?")
            .bind(session_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Delete every session of a user. Returns the number removed.
    pub async fn delete_all(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Whether the user exists and is not blocked.
    pub async fn is_user_active(&self, user_id: Uuid) -> Result<bool, StoreError> {
        let row: (i32,) = sqlx::query_as("SELECT is_blocked FROM users WHERE id = ?")
            .bind(user_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 == 0)
    }

    /// List a user's sessions that have not expired as of `now`, newest first.
    pub async fn list_by_user(&self, user_id: Uuid, now: i64) -> Result<Vec<Session>, StoreError> {
        let rows: Vec<SessionRow> = sqlx::query_as(sqlx::AssertSqlSafe(format!(
            "SELECT {} FROM sessions WHERE user_id = ? AND expires_at >= ? ORDER BY created_at DESC",
            SESSION_COLUMNS
        )))
        .bind(user_id.to_string())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    /// Mark a session blocked. Returns false if it does not exist.
    pub async fn block(&self, session_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE sessions SET is_blocked = 1 WHERE id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete sessions that expired before `now`.
    pub async fn delete_expired(&self, now: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
