#![allow(dead_code)]

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use authgate::cli::RateBackend;
use authgate::db::Database;
use authgate::jwt::TokenCodec;
use authgate::metrics::AuthMetrics;
use authgate::rate_limit::{CounterStore, MemoryCounterStore, RateGuard, RatePolicy};
use authgate::service::{AuthConfig, AuthService, LoginRequest};
use authgate::{App, ServerConfig, create_app};
use axum::{
    body::Body,
    http::{Request, Response, header},
};

pub const TEST_SECRET: &[u8] = b"integration-test-secret-0123456789abcdef";
pub const TEST_IP: &str = "198.51.100.7";

pub fn test_config(db: Database) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: TEST_SECRET.to_vec(),
        access_ttl: Duration::from_secs(15 * 60),
        auth: AuthConfig::default(),
        login_limit: RatePolicy {
            limit: 100,
            window: Duration::from_secs(60),
        },
        rate_backend: RateBackend::Sqlite,
        register_per_minute: NonZeroU32::new(1000).unwrap(),
        secure_cookies: false,
        trust_forwarded_for: true,
    }
}

pub async fn test_app() -> App {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    create_app(&test_config(db))
}

pub async fn test_app_with(configure: impl FnOnce(&mut ServerConfig)) -> App {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let mut config = test_config(db);
    configure(&mut config);
    create_app(&config)
}

/// A service over a fresh in-memory database, with in-process rate counters.
pub async fn test_service(login_limit: u64, config: AuthConfig) -> (AuthService, Arc<AuthMetrics>) {
    test_service_with_store(Arc::new(MemoryCounterStore::new()), login_limit, config).await
}

/// A service whose rate guard counts in the given store.
pub async fn test_service_with_store(
    counters: Arc<dyn CounterStore>,
    login_limit: u64,
    config: AuthConfig,
) -> (AuthService, Arc<AuthMetrics>) {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let codec = Arc::new(TokenCodec::new(TEST_SECRET, Duration::from_secs(15 * 60)));
    let guard = RateGuard::new(
        counters,
        RatePolicy {
            limit: login_limit,
            window: Duration::from_secs(60),
        },
    );
    let metrics = Arc::new(AuthMetrics::new());
    let service = AuthService::new(db, codec, guard, metrics.clone(), config);
    (service, metrics)
}

pub async fn session_count(service: &AuthService) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
        .fetch_one(service.database().pool())
        .await
        .unwrap();
    count
}

pub fn login_request<'a>(identifier: &'a str, password: &'a str) -> LoginRequest<'a> {
    LoginRequest {
        identifier,
        password,
        user_agent: "integration-test",
        client_addr: TEST_IP,
    }
}

pub fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", TEST_IP)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn authed_request(method: &str, uri: &str, access_token: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", TEST_IP)
        .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn cookie_request(uri: &str, cookies: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-forwarded-for", TEST_IP)
        .header(header::COOKIE, cookies)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// All `Set-Cookie` values of a response.
pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// Turn `Set-Cookie` values into a `Cookie` request header.
pub fn cookie_header(set_cookies: &[String]) -> String {
    set_cookies
        .iter()
        .filter_map(|c| c.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}
