mod common;

use std::num::NonZeroU32;

use authgate::grpc::messages::{
    Empty, LoginRequest, LogoutAllReply, LogoutRequest, RegisterReply, RegisterRequest,
    TokenReply,
};
use authgate::grpc::{LOGIN_PATH, LOGOUT_ALL_PATH, LOGOUT_PATH, REFRESH_PATH, REGISTER_PATH};
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode},
};
use common::{TEST_IP, json_request, test_app, test_app_with};
use prost::Message;
use tower::ServiceExt;
use uuid::Uuid;

const OK: i32 = 0;
const INVALID_ARGUMENT: i32 = 3;
const ALREADY_EXISTS: i32 = 6;
const RESOURCE_EXHAUSTED: i32 = 8;
const UNAUTHENTICATED: i32 = 16;

/// A unary call: one length-prefixed, uncompressed message.
fn grpc_request(path: &str, message: &impl Message, metadata: &[(&str, &str)]) -> Request<Body> {
    let payload = message.encode_to_vec();
    let mut frame = Vec::with_capacity(payload.len() + 5);
    frame.push(0);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);

    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/grpc")
        .header("te", "trailers")
        .header("x-forwarded-for", TEST_IP);
    for (name, value) in metadata {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(frame)).unwrap()
}

/// Status of a call. Failures come back trailers-only, with `grpc-status` in the headers.
fn grpc_status(response: &Response<Body>) -> i32 {
    assert_eq!(response.status(), StatusCode::OK);
    response
        .headers()
        .get("grpc-status")
        .map(|v| v.to_str().unwrap().parse().unwrap())
        .unwrap_or(OK)
}

async fn grpc_reply<M: Message + Default>(response: Response<Body>) -> M {
    assert_eq!(grpc_status(&response), OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(body[0], 0, "reply should not be compressed");
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    M::decode(&body[5..5 + len]).unwrap()
}

fn metadata<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

async fn call(router: &Router, request: Request<Body>) -> Response<Body> {
    router.clone().oneshot(request).await.unwrap()
}

async fn register(router: &Router, username: &str, email: &str) -> Uuid {
    let response = call(
        router,
        grpc_request(
            REGISTER_PATH,
            &RegisterRequest {
                username: username.into(),
                email: email.into(),
                password: "correct horse battery".into(),
            },
            &[],
        ),
    )
    .await;
    let reply: RegisterReply = grpc_reply(response).await;
    Uuid::parse_str(&reply.user_id).unwrap()
}

/// Log in and return the reply plus the refresh token from the response metadata.
async fn login(router: &Router, identifier: &str) -> (TokenReply, String) {
    let response = call(
        router,
        grpc_request(
            LOGIN_PATH,
            &LoginRequest {
                identifier: identifier.into(),
                password: "correct horse battery".into(),
            },
            &[("user-agent", "grpc-test")],
        ),
    )
    .await;
    let refresh_token = metadata(&response, "x-refresh-token").to_string();
    let reply: TokenReply = grpc_reply(response).await;
    (reply, refresh_token)
}

fn refresh_request(token: &str, user_id: &str) -> Request<Body> {
    grpc_request(
        REFRESH_PATH,
        &Empty {},
        &[("x-refresh-token", token), ("x-user-id", user_id)],
    )
}

#[tokio::test]
async fn test_grpc_register_login_and_refresh() {
    let app = test_app().await;
    let user_id = register(&app.router, "alice", "alice@example.com").await;

    let response = call(
        &app.router,
        grpc_request(
            LOGIN_PATH,
            &LoginRequest {
                identifier: "alice@example.com".into(),
                password: "correct horse battery".into(),
            },
            &[],
        ),
    )
    .await;
    assert_eq!(metadata(&response, "x-user-id"), user_id.to_string());
    let first_token = metadata(&response, "x-refresh-token").to_string();
    let reply: TokenReply = grpc_reply(response).await;
    assert_eq!(reply.user_id, user_id.to_string());
    assert!(Uuid::parse_str(&reply.session_id).is_ok());
    assert!(!reply.access_token.is_empty());
    assert!(reply.expires_at > 0);

    let response = call(&app.router, refresh_request(&first_token, &reply.user_id)).await;
    let second_token = metadata(&response, "x-refresh-token").to_string();
    assert_ne!(second_token, first_token);
    let refreshed: TokenReply = grpc_reply(response).await;
    assert_eq!(refreshed.user_id, user_id.to_string());
    assert!(refreshed.session_id.is_empty());

    // The rotated token is spent
    let response = call(&app.router, refresh_request(&first_token, &reply.user_id)).await;
    assert_eq!(grpc_status(&response), UNAUTHENTICATED);
    assert_eq!(app.metrics.snapshot().events.refresh_replay, 1);

    let response = call(&app.router, refresh_request(&second_token, &reply.user_id)).await;
    assert_eq!(grpc_status(&response), OK);
}

#[tokio::test]
async fn test_grpc_refresh_without_metadata() {
    let app = test_app().await;
    let response = call(&app.router, grpc_request(REFRESH_PATH, &Empty {}, &[])).await;
    assert_eq!(grpc_status(&response), UNAUTHENTICATED);
}

#[tokio::test]
async fn test_grpc_wrong_password_is_unauthenticated() {
    let app = test_app().await;
    register(&app.router, "bob", "bob@example.com").await;

    let response = call(
        &app.router,
        grpc_request(
            LOGIN_PATH,
            &LoginRequest {
                identifier: "bob".into(),
                password: "wrong".into(),
            },
            &[],
        ),
    )
    .await;
    assert_eq!(grpc_status(&response), UNAUTHENTICATED);
    assert!(response.headers().get("x-refresh-token").is_none());
}

#[tokio::test]
async fn test_grpc_register_conflict() {
    let app = test_app().await;
    register(&app.router, "carol", "carol@example.com").await;

    let response = call(
        &app.router,
        grpc_request(
            REGISTER_PATH,
            &RegisterRequest {
                username: "CAROL".into(),
                email: "other@example.com".into(),
                password: "pw".into(),
            },
            &[],
        ),
    )
    .await;
    assert_eq!(grpc_status(&response), ALREADY_EXISTS);
}

#[tokio::test]
async fn test_grpc_logout_all_requires_bearer() {
    let app = test_app().await;
    register(&app.router, "dave", "dave@example.com").await;
    let (first, first_refresh) = login(&app.router, "dave").await;
    let (_, second_refresh) = login(&app.router, "dave").await;

    let response = call(&app.router, grpc_request(LOGOUT_ALL_PATH, &Empty {}, &[])).await;
    assert_eq!(grpc_status(&response), UNAUTHENTICATED);

    let response = call(
        &app.router,
        grpc_request(
            LOGOUT_ALL_PATH,
            &Empty {},
            &[("authorization", "Bearer not-a-token")],
        ),
    )
    .await;
    assert_eq!(grpc_status(&response), UNAUTHENTICATED);

    let bearer = format!("Bearer {}", first.access_token);
    let response = call(
        &app.router,
        grpc_request(LOGOUT_ALL_PATH, &Empty {}, &[("authorization", &bearer)]),
    )
    .await;
    let reply: LogoutAllReply = grpc_reply(response).await;
    assert_eq!(reply.revoked, 2);

    for token in [first_refresh, second_refresh] {
        let response = call(&app.router, refresh_request(&token, &first.user_id)).await;
        assert_eq!(grpc_status(&response), UNAUTHENTICATED);
    }
}

#[tokio::test]
async fn test_grpc_logout_ends_one_session() {
    let app = test_app().await;
    register(&app.router, "erin", "erin@example.com").await;
    let (ended, ended_refresh) = login(&app.router, "erin").await;
    let (_, kept_refresh) = login(&app.router, "erin").await;
    let bearer = format!("Bearer {}", ended.access_token);

    let response = call(
        &app.router,
        grpc_request(
            LOGOUT_PATH,
            &LogoutRequest {
                session_id: "not-a-uuid".into(),
            },
            &[("authorization", &bearer)],
        ),
    )
    .await;
    assert_eq!(grpc_status(&response), INVALID_ARGUMENT);

    let response = call(
        &app.router,
        grpc_request(
            LOGOUT_PATH,
            &LogoutRequest {
                session_id: ended.session_id.clone(),
            },
            &[("authorization", &bearer)],
        ),
    )
    .await;
    let _: Empty = grpc_reply(response).await;

    let response = call(&app.router, refresh_request(&ended_refresh, &ended.user_id)).await;
    assert_eq!(grpc_status(&response), UNAUTHENTICATED);
    let response = call(&app.router, refresh_request(&kept_refresh, &ended.user_id)).await;
    assert_eq!(grpc_status(&response), OK);
}

#[tokio::test]
async fn test_grpc_register_shares_http_rate_limit() {
    let app = test_app_with(|config| {
        config.register_per_minute = NonZeroU32::new(1).unwrap();
    })
    .await;

    let response = call(
        &app.router,
        json_request(
            "POST",
            "/api/auth/register",
            r#"{"username":"frank","email":"frank@example.com","password":"pw"}"#,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = call(
        &app.router,
        grpc_request(
            REGISTER_PATH,
            &RegisterRequest {
                username: "grace".into(),
                email: "grace@example.com".into(),
                password: "pw".into(),
            },
            &[],
        ),
    )
    .await;
    assert_eq!(grpc_status(&response), RESOURCE_EXHAUSTED);
}
