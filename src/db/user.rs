use std::fmt;

use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use crate::clock::unix_now;
use crate::error::StoreError;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// Public view of a user. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub created_at: i64,
    pub is_blocked: bool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: String,
    created_at: i64,
    is_blocked: i32,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_uuid(&row.id)?,
            username: row.username,
            email: row.email,
            created_at: row.created_at,
            is_blocked: row.is_blocked != 0,
        })
    }
}

/// A user about to be inserted.
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: i64,
}

impl NewUser {
    pub fn new(username: &str, email: &str, password_hash: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: unix_now(),
        }
    }
}

/// What login needs to check a password. Only lives inside the login path.
pub struct LoginRecord {
    pub id: Uuid,
    pub password_hash: String,
    pub is_blocked: bool,
}

impl fmt::Debug for LoginRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRecord")
            .field("id", &self.id)
            .field("password_hash", &"<redacted>")
            .field("is_blocked", &self.is_blocked)
            .finish()
    }
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|_| StoreError::Corrupt(format!("bad uuid {:?}", value)))
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user. Fails with `Conflict` when the username or email is taken
    /// (case-insensitively), including as the other column of an existing
    /// user: logins match either column, so a login identifier may name at
    /// most one user.
    pub async fn create(&self, user: &NewUser) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5
             WHERE NOT EXISTS (SELECT 1 FROM users WHERE email = ?2 OR username = ?3)",
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    /// Look a user up by username or email.
    pub async fn find_by_login(&self, identifier: &str) -> Result<LoginRecord, StoreError> {
        let row: (String, String, i32) = sqlx::query_as(
            "SELECT id, password_hash, is_blocked FROM users WHERE username = ?1 OR email = ?1 LIMIT 1",
        )
        .bind(identifier)
        .fetch_one(&self.pool)
        .await?;

        Ok(LoginRecord {
            id: parse_uuid(&row.0)?,
            password_hash: row.1,
            is_blocked: row.2 != 0,
        })
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, username, email, created_at, is_blocked FROM users WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    /// Whether the user is blocked. Fails with `NotFound` for an unknown id.
    pub async fn is_blocked(&self, id: Uuid) -> Result<bool, StoreError> {
        let row: (i32,) = sqlx::query_as("SELECT is_blocked FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 != 0)
    }

    /// Block or unblock a user. Returns false if no such user exists.
    pub async fn set_blocked(&self, id: Uuid, blocked: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET is_blocked = ? WHERE id = ?")
            .bind(blocked as i32)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
