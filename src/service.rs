//! Register, login, refresh and logout.
//!
//! `AuthService` holds no state of its own. Every cross-request guarantee
//! comes from the stores: the session digest is unique, rotation is a single
//! conditional update, and the rate counter increments atomically. Every store
//! call runs under the configured deadline.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::AuthGate;
use crate::clock::unix_now;
use crate::db::{Database, NewSession, NewUser, Rotation, Session, User};
use crate::error::{AuthError, StoreError};
use crate::jwt::{AccessToken, TokenCodec};
use crate::metrics::{AuthEvent, EventSink};
use crate::password::{dummy_verify, hash_password, verify_password};
use crate::rate_limit::{Admission, RateGuard};

/// Default refresh session lifetime: 15 days.
pub const DEFAULT_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(15 * 24 * 60 * 60);

/// Default deadline for a single storage call.
pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Attempts at inserting a fresh random token before giving up.
const TOKEN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub refresh_ttl: Duration,
    pub storage_timeout: Duration,
    /// Delete the whole session when a rotated token is replayed.
    pub revoke_on_replay: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_ttl: DEFAULT_REFRESH_TOKEN_TTL,
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
            revoke_on_replay: false,
        }
    }
}

pub struct LoginRequest<'a> {
    /// Username or email
    pub identifier: &'a str,
    pub password: &'a str,
    pub user_agent: &'a str,
    pub client_addr: &'a str,
}

/// An access token plus the refresh token that renews it.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: String,
    /// When the refresh session expires (Unix seconds)
    pub refresh_expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub tokens: TokenPair,
}

#[derive(Clone)]
pub struct AuthService {
    db: Database,
    codec: Arc<TokenCodec>,
    guard: RateGuard,
    events: Arc<dyn EventSink>,
    config: AuthConfig,
}

/// A fresh opaque refresh token: 32 random bytes, base64url.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl AuthService {
    pub fn new(
        db: Database,
        codec: Arc<TokenCodec>,
        guard: RateGuard,
        events: Arc<dyn EventSink>,
        config: AuthConfig,
    ) -> Self {
        Self {
            db,
            codec,
            guard,
            events,
            config,
        }
    }

    /// A gate verifying tokens issued by this service.
    pub fn gate(&self) -> AuthGate {
        AuthGate::new(self.codec.clone())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn rate_guard(&self) -> &RateGuard {
        &self.guard
    }

    /// Run a store call under the storage deadline. The outer error is the
    /// timeout; the inner result is left for the caller to interpret.
    async fn deadline<T, F>(&self, op: &'static str, fut: F) -> Result<Result<T, StoreError>, AuthError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.config.storage_timeout, fut).await {
            Ok(result) => Ok(result),
            Err(_) => {
                warn!(op, "Storage call timed out");
                Err(AuthError::Timeout(op))
            }
        }
    }

    /// Create a user. Fails with `Conflict` when the username or email is taken.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Uuid, AuthError> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidInput(
                "username, email and password are required".into(),
            ));
        }

        let password = password.to_string();
        let hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("hashing task failed: {}", e)))?
            .map_err(|e| AuthError::Internal(format!("failed to hash password: {}", e)))?;

        let user = NewUser::new(username, email, &hash);
        let users = self.db.users();
        match self.deadline("create_user", users.create(&user)).await? {
            Ok(()) => {
                info!(user_id = %user.id, username, "User registered");
                Ok(user.id)
            }
            Err(StoreError::Conflict) => {
                debug!(username, "Registration rejected: username or email taken");
                Err(AuthError::Conflict("username or email already taken"))
            }
            Err(e) => Err(storage_failure("create_user", e)),
        }
    }

    /// Check credentials and open a new session.
    pub async fn login(&self, request: LoginRequest<'_>) -> Result<LoginOutcome, AuthError> {
        self.login_attempt(request).await.1
    }

    /// Like [`login`](Self::login), also returning the rate guard's verdict.
    /// The admission is `None` only when the guard itself could not be
    /// consulted, in which case the login is refused.
    pub async fn login_attempt(
        &self,
        request: LoginRequest<'_>,
    ) -> (Option<Admission>, Result<LoginOutcome, AuthError>) {
        let admission = match self
            .deadline("rate_guard", self.guard.admit(request.client_addr))
            .await
        {
            Ok(Ok(admission)) => admission,
            // Fail closed: no counter, no login
            Ok(Err(e)) => return (None, Err(storage_failure("rate_guard", e))),
            Err(timeout) => return (None, Err(timeout)),
        };
        if !admission.allowed {
            self.events.record(AuthEvent::RateLimited);
            warn!(client_ip = request.client_addr, "Login rate limit exceeded");
            return (Some(admission), Err(AuthError::RateLimited));
        }

        (Some(admission), self.open_session(&request).await)
    }

    async fn open_session(&self, request: &LoginRequest<'_>) -> Result<LoginOutcome, AuthError> {
        if request.identifier.trim().is_empty() || request.password.is_empty() {
            return Err(AuthError::InvalidInput(
                "identifier and password are required".into(),
            ));
        }

        let users = self.db.users();
        let record = match self
            .deadline("find_user", users.find_by_login(request.identifier.trim()))
            .await?
        {
            Ok(record) => record,
            Err(StoreError::NotFound) => {
                let password = request.password.to_string();
                let _ = tokio::task::spawn_blocking(move || dummy_verify(&password)).await;
                return Err(self.login_failed(None));
            }
            Err(e) => return Err(storage_failure("find_user", e)),
        };

        let password = request.password.to_string();
        let hash = record.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("verification task failed: {}", e)))?
            .map_err(|e| {
                error!(user_id = %record.id, "Stored password hash is unusable: {}", e);
                AuthError::Internal("unusable password hash".into())
            })?;

        if !matches || record.is_blocked {
            return Err(self.login_failed(Some(record.id)));
        }

        let now = unix_now();
        let access_token = self.issue_access(record.id, now)?;
        let (session_id, refresh_token, refresh_expires_at) =
            self.create_session(record.id, request, now).await?;

        self.events.record(AuthEvent::LoginSuccess);
        info!(user_id = %record.id, session_id = %session_id, "User logged in");

        Ok(LoginOutcome {
            user_id: record.id,
            session_id,
            tokens: TokenPair {
                access_token,
                refresh_token,
                refresh_expires_at,
            },
        })
    }

    fn login_failed(&self, user_id: Option<Uuid>) -> AuthError {
        self.events.record(AuthEvent::LoginFailure);
        match user_id {
            Some(id) => info!(user_id = %id, "Login failed"),
            None => info!("Login failed for unknown identifier"),
        }
        AuthError::Unauthorized
    }

    fn issue_access(&self, user_id: Uuid, now: i64) -> Result<AccessToken, AuthError> {
        self.codec.issue_at(user_id, now).map_err(|e| {
            error!("Failed to sign access token: {}", e);
            AuthError::Internal("failed to sign access token".into())
        })
    }

    async fn create_session(
        &self,
        user_id: Uuid,
        request: &LoginRequest<'_>,
        now: i64,
    ) -> Result<(Uuid, String, i64), AuthError> {
        let expires_at = now + self.config.refresh_ttl.as_secs() as i64;
        let sessions = self.db.sessions();

        for _ in 0..TOKEN_ATTEMPTS {
            let refresh_token = generate_refresh_token();
            let session = NewSession {
                id: Uuid::new_v4(),
                user_id,
                refresh_token: &refresh_token,
                user_agent: request.user_agent,
                client_ip: request.client_addr,
                created_at: now,
                expires_at,
            };

            match self.deadline("create_session", sessions.create(&session)).await? {
                Ok(()) => return Ok((session.id, refresh_token, expires_at)),
                Err(StoreError::Conflict) => {
                    warn!(user_id = %user_id, "Refresh token collision, regenerating");
                }
                Err(e) => return Err(storage_failure("create_session", e)),
            }
        }

        Err(AuthError::Conflict("could not allocate a unique refresh token"))
    }

    /// Exchange a live refresh token for a new token pair, rotating the session.
    pub async fn refresh(&self, refresh_token: &str, user_id: Uuid) -> Result<TokenPair, AuthError> {
        let result = self.try_refresh(refresh_token, user_id).await;
        match &result {
            Ok(_) => self.events.record(AuthEvent::RefreshSuccess),
            Err(e) if !e.is_server_fault() => self.events.record(AuthEvent::RefreshFailure),
            Err(_) => {}
        }
        result
    }

    async fn try_refresh(&self, refresh_token: &str, user_id: Uuid) -> Result<TokenPair, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::Unauthorized);
        }

        let sessions = self.db.sessions();
        let session = match self
            .deadline("find_session", sessions.find_by_refresh_token(refresh_token))
            .await?
        {
            Ok(session) => session,
            Err(StoreError::NotFound) => {
                self.check_replay(refresh_token).await;
                return Err(AuthError::Unauthorized);
            }
            Err(e) => return Err(storage_failure("find_session", e)),
        };

        let now = unix_now();
        if session.user_id != user_id {
            warn!(session_id = %session.id, claimed_user = %user_id, "Refresh token presented for another user");
            return Err(AuthError::Unauthorized);
        }
        if session.is_blocked {
            info!(session_id = %session.id, "Refresh rejected: session blocked");
            return Err(AuthError::Unauthorized);
        }
        if now > session.expires_at {
            debug!(session_id = %session.id, "Refresh rejected: session expired");
            return Err(AuthError::Unauthorized);
        }

        match self
            .deadline("is_user_active", sessions.is_user_active(user_id))
            .await?
        {
            Ok(true) => {}
            Ok(false) | Err(StoreError::NotFound) => {
                info!(user_id = %user_id, "Refresh rejected: user inactive");
                return Err(AuthError::Unauthorized);
            }
            Err(e) => return Err(storage_failure("is_user_active", e)),
        }

        let access_token = self.issue_access(user_id, now)?;
        let expires_at = now + self.config.refresh_ttl.as_secs() as i64;

        for _ in 0..TOKEN_ATTEMPTS {
            let new_token = generate_refresh_token();
            let rotation = Rotation {
                session_id: session.id,
                user_id,
                expected_token: refresh_token,
                new_token: &new_token,
                created_at: now,
                expires_at,
            };

            match self.deadline("rotate_session", sessions.rotate(&rotation)).await? {
                Ok(()) => {
                    info!(user_id = %user_id, session_id = %session.id, "Session refreshed");
                    return Ok(TokenPair {
                        access_token,
                        refresh_token: new_token,
                        refresh_expires_at: expires_at,
                    });
                }
                Err(StoreError::NotFound) => {
                    // Another request rotated this token between lookup and swap
                    self.replay_detected(&session).await;
                    return Err(AuthError::Unauthorized);
                }
                Err(StoreError::Conflict) => {
                    warn!(session_id = %session.id, "Refresh token collision, regenerating");
                }
                Err(e) => return Err(storage_failure("rotate_session", e)),
            }
        }

        Err(AuthError::Conflict("could not allocate a unique refresh token"))
    }

    /// A token that matches no live session may be one that was already rotated.
    ///
    /// Only the digest of the token replaced by the latest rotation is kept, so a
    /// token two or more rotations old is indistinguishable from an unknown one:
    /// it is still rejected, but no replay is recorded and `revoke_on_replay`
    /// does not fire.
    async fn check_replay(&self, refresh_token: &str) {
        let sessions = self.db.sessions();
        match self
            .deadline("find_previous", sessions.find_by_previous_token(refresh_token))
            .await
        {
            Ok(Ok(Some(session))) => self.replay_detected(&session).await,
            Ok(Ok(None)) => debug!("Refresh rejected: unknown token"),
            Ok(Err(e)) => warn!("Replay check failed: {}", e),
            Err(_) => {}
        }
    }

    async fn replay_detected(&self, session: &Session) {
        self.events.record(AuthEvent::RefreshReplay);
        warn!(
            user_id = %session.user_id,
            session_id = %session.id,
            "Refresh token replay detected"
        );

        if !self.config.revoke_on_replay {
            return;
        }

        let sessions = self.db.sessions();
        match self
            .deadline("revoke_session", sessions.delete_one(session.user_id, session.id))
            .await
        {
            Ok(Ok(())) => warn!(session_id = %session.id, "Session revoked after replay"),
            Ok(Err(StoreError::NotFound)) => {}
            Ok(Err(e)) => warn!(session_id = %session.id, "Failed to revoke replayed session: {}", e),
            Err(_) => {}
        }
    }

    /// Remove one of the user's sessions. A session that is already gone, or
    /// belongs to someone else, is a successful no-op.
    pub async fn logout(&self, user_id: Uuid, session_id: Uuid) -> Result<(), AuthError> {
        let sessions = self.db.sessions();
        match self
            .deadline("delete_session", sessions.delete_one(user_id, session_id))
            .await?
        {
            Ok(()) => {
                info!(user_id = %user_id, session_id = %session_id, "User logged out");
                Ok(())
            }
            Err(StoreError::NotFound) => {
                debug!(user_id = %user_id, session_id = %session_id, "Logout matched no session");
                Ok(())
            }
            Err(e) => Err(storage_failure("delete_session", e)),
        }
    }

    /// Remove every session of the user. Returns how many were removed.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, AuthError> {
        let sessions = self.db.sessions();
        match self
            .deadline("delete_sessions", sessions.delete_all(user_id))
            .await?
        {
            Ok(count) => {
                info!(user_id = %user_id, count, "User logged out everywhere");
                Ok(count)
            }
            Err(e) => Err(storage_failure("delete_sessions", e)),
        }
    }

    /// The user's unexpired sessions, newest first.
    pub async fn sessions(&self, user_id: Uuid) -> Result<Vec<Session>, AuthError> {
        let sessions = self.db.sessions();
        self.deadline("list_sessions", sessions.list_by_user(user_id, unix_now()))
            .await?
            .map_err(|e| storage_failure("list_sessions", e))
    }

    /// The user's public profile.
    pub async fn profile(&self, user_id: Uuid) -> Result<User, AuthError> {
        let users = self.db.users();
        match self.deadline("get_user", users.get_by_id(user_id)).await? {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(AuthError::Unauthorized),
            Err(e) => Err(storage_failure("get_user", e)),
        }
    }
}

/// Map a store error that is not part of normal control flow.
fn storage_failure(op: &'static str, err: StoreError) -> AuthError {
    match err {
        StoreError::NotFound => AuthError::Unauthorized,
        other => {
            warn!(op, "Storage call failed: {}", other);
            AuthError::from(other)
        }
    }
}
