//! Authentication API endpoints.
//!
//! - POST `/register` - Create an account
//! - POST `/login` - Exchange credentials for an access token and refresh cookies
//! - POST `/refresh` - Rotate the refresh cookie and issue a new access token
//! - POST `/logout` - End one of the caller's sessions
//! - POST `/logout-all` - End every session of the caller
//! - GET `/sessions` - List the caller's live sessions
//! - GET `/me` - The caller's profile

use axum::{
    Json, Router,
    extract::{FromRequestParts, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode, header, header::SET_COOKIE,
        request::Parts,
    },
    middleware,
    response::{AppendHeaders, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ApiError;
use crate::auth::{
    Auth, AuthGate, REFRESH_COOKIE_NAME, USER_COOKIE_NAME, clear_refresh_cookies,
    extract_client_ip, get_cookie, refresh_cookies,
};
use crate::clock::unix_now;
use crate::db::{Session, User};
use crate::error::AuthError;
use crate::impl_has_auth_gate;
use crate::jwt::AccessToken;
use crate::rate_limit::{Admission, RegisterLimiter, rate_limit_register};
use crate::service::{AuthService, LoginRequest, TokenPair};

/// Longest user agent kept on a session.
const MAX_USER_AGENT_LEN: usize = 512;

const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

#[derive(Clone)]
pub struct AuthState {
    pub service: AuthService,
    pub gate: AuthGate,
    pub secure_cookies: bool,
    pub trust_forwarded_for: bool,
}

impl_has_auth_gate!(AuthState);

pub fn router(state: AuthState, register_limiter: RegisterLimiter) -> Router {
    Router::new()
        .route(
            "/register",
            post(register).route_layer(middleware::from_fn_with_state(
                register_limiter,
                rate_limit_register,
            )),
        )
        .route("/login", post(login))
        .route("/refresh", post(refresh))
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
        .route("/sessions", get(list_sessions))
        .route("/me", get(me))
        .with_state(state)
}

/// Client address and user agent of the caller.
struct ClientContext {
    ip: String,
    user_agent: String,
}

impl FromRequestParts<AuthState> for ClientContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AuthState,
    ) -> Result<Self, Self::Rejection> {
        let ip = extract_client_ip(parts, state.trust_forwarded_for)
            .map_err(|_| ApiError::bad_request("Unable to determine client IP"))?;

        let user_agent = clamp_user_agent(
            parts
                .headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default(),
        );

        Ok(ClientContext { ip, user_agent })
    }
}

/// The user agent as stored on a session, cut to [`MAX_USER_AGENT_LEN`] bytes.
pub(crate) fn clamp_user_agent(raw: &str) -> String {
    let mut user_agent = raw.to_string();
    if user_agent.len() > MAX_USER_AGENT_LEN {
        let mut end = MAX_USER_AGENT_LEN;
        while !user_agent.is_char_boundary(end) {
            end -= 1;
        }
        user_agent.truncate(end);
    }
    user_agent
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    user_id: Uuid,
}

async fn register(
    State(state): State<AuthState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let body = json_body(payload)?;
    let user_id = state
        .service
        .register(&body.username, &body.email, &body.password)
        .await?;
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
}

#[derive(Deserialize)]
struct LoginBody {
    /// Username or email
    #[serde(alias = "username", alias = "email")]
    identifier: String,
    password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<Uuid>,
    access_token: String,
    token_type: &'static str,
    expires_in: u64,
    expires_at: i64,
}

impl TokenResponse {
    fn new(user_id: Uuid, session_id: Option<Uuid>, access: AccessToken) -> Self {
        Self {
            user_id,
            session_id,
            access_token: access.token,
            token_type: "Bearer",
            expires_in: access.expires_in,
            expires_at: access.expires_at,
        }
    }
}

type CookieHeaders = AppendHeaders<[(HeaderName, String); 2]>;

fn set_refresh_cookies(tokens: &TokenPair, user_id: Uuid, secure: bool) -> CookieHeaders {
    let max_age = (tokens.refresh_expires_at - unix_now()).max(0);
    let [token_cookie, user_cookie] =
        refresh_cookies(&tokens.refresh_token, user_id, max_age, secure);
    AppendHeaders([(SET_COOKIE, token_cookie), (SET_COOKIE, user_cookie)])
}

fn clear_cookies(secure: bool) -> CookieHeaders {
    let [token_cookie, user_cookie] = clear_refresh_cookies(secure);
    AppendHeaders([(SET_COOKIE, token_cookie), (SET_COOKIE, user_cookie)])
}

/// Rate limit headers for an admitted or refused login.
fn rate_limit_headers(limit: u64, admission: Option<Admission>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(admission) = admission {
        headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
        headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(admission.remaining));
    }
    headers
}

async fn login(
    State(state): State<AuthState>,
    client: ClientContext,
    payload: Result<Json<LoginBody>, JsonRejection>,
) -> Response {
    let body = match json_body(payload) {
        Ok(body) => body,
        Err(e) => return e.into_response(),
    };
    let (admission, result) = state
        .service
        .login_attempt(LoginRequest {
            identifier: &body.identifier,
            password: &body.password,
            user_agent: &client.user_agent,
            client_addr: &client.ip,
        })
        .await;
    let limit_headers = rate_limit_headers(state.service.rate_guard().policy().limit, admission);

    match result {
        Ok(outcome) => {
            let cookies =
                set_refresh_cookies(&outcome.tokens, outcome.user_id, state.secure_cookies);
            (
                limit_headers,
                cookies,
                Json(TokenResponse::new(
                    outcome.user_id,
                    Some(outcome.session_id),
                    outcome.tokens.access_token,
                )),
            )
                .into_response()
        }
        Err(e) => (limit_headers, ApiError::from(e)).into_response(),
    }
}

/// Rotate the refresh cookie. A rejected refresh clears the cookies.
async fn refresh(State(state): State<AuthState>, headers: HeaderMap) -> Response {
    let credentials = get_cookie(&headers, REFRESH_COOKIE_NAME).zip(
        get_cookie(&headers, USER_COOKIE_NAME).and_then(|v| Uuid::parse_str(v).ok()),
    );

    let result = match credentials {
        Some((token, user_id)) => state
            .service
            .refresh(token, user_id)
            .await
            .map(|tokens| (user_id, tokens)),
        None => Err(AuthError::Unauthorized),
    };

    match result {
        Ok((user_id, tokens)) => {
            let cookies = set_refresh_cookies(&tokens, user_id, state.secure_cookies);
            (
                cookies,
                Json(TokenResponse::new(user_id, None, tokens.access_token)),
            )
                .into_response()
        }
        Err(AuthError::Unauthorized) => (
            clear_cookies(state.secure_cookies),
            ApiError::from(AuthError::Unauthorized),
        )
            .into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

#[derive(Deserialize)]
struct LogoutBody {
    session_id: Uuid,
}

async fn logout(
    State(state): State<AuthState>,
    Auth(user): Auth,
    payload: Result<Json<LogoutBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let body = json_body(payload)?;
    state.service.logout(user.user_id, body.session_id).await?;
    Ok((clear_cookies(state.secure_cookies), StatusCode::NO_CONTENT))
}

#[derive(Serialize)]
struct LogoutAllResponse {
    revoked: u64,
}

async fn logout_all(
    State(state): State<AuthState>,
    Auth(user): Auth,
) -> Result<impl IntoResponse, ApiError> {
    let revoked = state.service.logout_all(user.user_id).await?;
    Ok((
        clear_cookies(state.secure_cookies),
        Json(LogoutAllResponse { revoked }),
    ))
}

#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<SessionInfo>,
}

#[derive(Serialize)]
struct SessionInfo {
    id: Uuid,
    user_agent: String,
    client_ip: String,
    created_at: i64,
    expires_at: i64,
}

impl From<Session> for SessionInfo {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            user_agent: session.user_agent,
            client_ip: session.client_ip,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

async fn list_sessions(
    State(state): State<AuthState>,
    Auth(user): Auth,
) -> Result<Json<SessionsResponse>, ApiError> {
    let sessions = state.service.sessions(user.user_id).await?;
    Ok(Json(SessionsResponse {
        sessions: sessions.into_iter().map(SessionInfo::from).collect(),
    }))
}

#[derive(Serialize)]
struct MeResponse {
    id: Uuid,
    username: String,
    email: String,
    created_at: i64,
}

impl From<User> for MeResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            created_at: user.created_at,
        }
    }
}

async fn me(State(state): State<AuthState>, Auth(user): Auth) -> Result<Json<MeResponse>, ApiError> {
    let profile = state.service.profile(user.user_id).await?;
    Ok(Json(MeResponse::from(profile)))
}
