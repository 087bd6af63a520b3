//! gRPC surface of the auth service, package `authgate.v1`, service `Auth`.
//!
//! Served on the HTTP port next to the JSON API (HTTP/2 with prior
//! knowledge). `Logout` and `LogoutAll` sit behind [`GateInterceptor`] and
//! need an `authorization: Bearer <token>` entry. `Login` and `Refresh`
//! return the refresh token in the `x-refresh-token` / `x-user-id` response
//! metadata and `Refresh` reads it back from the request metadata.

pub mod messages;

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    Router,
    body::Body,
    extract::{Request as HttpRequest, State},
    http::Response as HttpResponse,
    middleware::{self, Next},
    response::Response as AxumResponse,
};
use tonic::body::BoxBody;
use tonic::codec::ProstCodec;
use tonic::server::Grpc;
use tonic::service::interceptor::InterceptedService;
use tonic::{Request, Response, Status};
use tower::Service;
use uuid::Uuid;

use crate::api::clamp_user_agent;
use crate::auth::AuthGate;
use crate::auth::extract_client_ip;
use crate::auth::rpc::{
    GateInterceptor, authenticated_user, refresh_credentials, set_refresh_credentials,
};
use crate::jwt::AccessToken;
use crate::rate_limit::RegisterLimiter;
use crate::service::{AuthService, LoginRequest};
use messages::{
    Empty, LoginRequest as LoginMessage, LogoutAllReply, LogoutRequest, RegisterReply,
    RegisterRequest, TokenReply,
};

pub const REGISTER_PATH: &str = "/authgate.v1.Auth/Register";
pub const LOGIN_PATH: &str = "/authgate.v1.Auth/Login";
pub const REFRESH_PATH: &str = "/authgate.v1.Auth/Refresh";
pub const LOGOUT_PATH: &str = "/authgate.v1.Auth/Logout";
pub const LOGOUT_ALL_PATH: &str = "/authgate.v1.Auth/LogoutAll";

#[derive(Clone)]
pub struct RpcState {
    pub service: AuthService,
    pub register_limiter: RegisterLimiter,
}

/// Client address resolved by [`attach_client_addr`].
#[derive(Clone, Debug)]
struct ClientAddr(String);

type RpcFuture<T> = Pin<Box<dyn Future<Output = Result<Response<T>, Status>> + Send>>;
type Handler<Req, Resp> = fn(RpcState, Request<Req>) -> RpcFuture<Resp>;

/// One unary method: decodes the framed request, runs the handler, encodes the reply.
struct UnaryMethod<Req, Resp> {
    state: RpcState,
    handler: Handler<Req, Resp>,
}

impl<Req, Resp> UnaryMethod<Req, Resp> {
    fn new(state: RpcState, handler: Handler<Req, Resp>) -> Self {
        Self { state, handler }
    }
}

impl<Req, Resp> Clone for UnaryMethod<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            handler: self.handler,
        }
    }
}

impl<Req, Resp> Service<HttpRequest<Body>> for UnaryMethod<Req, Resp>
where
    Req: prost::Message + Default + Send + 'static,
    Resp: prost::Message + Send + 'static,
{
    type Response = HttpResponse<BoxBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: HttpRequest<Body>) -> Self::Future {
        let state = self.state.clone();
        let handler = self.handler;
        Box::pin(async move {
            let method =
                tower::service_fn(move |request: Request<Req>| handler(state.clone(), request));
            let mut grpc = Grpc::new(ProstCodec::<Resp, Req>::default());
            Ok(grpc.unary(method, request).await)
        })
    }
}

/// Resolve the caller's address the same way the JSON API does.
async fn attach_client_addr(
    State(trust_forwarded_for): State<bool>,
    mut request: HttpRequest,
    next: Next,
) -> AxumResponse {
    match extract_client_ip(&request, trust_forwarded_for) {
        Ok(ip) => {
            request.extensions_mut().insert(ClientAddr(ip));
        }
        Err(reason) => tracing::debug!(reason, "RPC caller address unknown"),
    }
    next.run(request).await
}

fn client_addr<T>(request: &Request<T>) -> Result<String, Status> {
    request
        .extensions()
        .get::<ClientAddr>()
        .map(|addr| addr.0.clone())
        .ok_or_else(|| Status::invalid_argument("Unable to determine client IP"))
}

fn token_reply(user_id: Uuid, session_id: Option<Uuid>, access: AccessToken) -> TokenReply {
    TokenReply {
        user_id: user_id.to_string(),
        session_id: session_id.map(|id| id.to_string()).unwrap_or_default(),
        access_token: access.token,
        expires_at: access.expires_at,
    }
}

fn register(state: RpcState, request: Request<RegisterRequest>) -> RpcFuture<RegisterReply> {
    Box::pin(async move {
        let ip = client_addr(&request)?;
        if !state.register_limiter.check(&ip) {
            tracing::warn!(client_ip = %ip, "Registration rate limit exceeded");
            return Err(Status::resource_exhausted(
                "Too many signup attempts. Please wait before trying again.",
            ));
        }

        let body = request.into_inner();
        let user_id = state
            .service
            .register(&body.username, &body.email, &body.password)
            .await?;
        Ok(Response::new(RegisterReply {
            user_id: user_id.to_string(),
        }))
    })
}

fn login(state: RpcState, request: Request<LoginMessage>) -> RpcFuture<TokenReply> {
    Box::pin(async move {
        let ip = client_addr(&request)?;
        let user_agent = clamp_user_agent(
            request
                .metadata()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default(),
        );

        let body = request.into_inner();
        let outcome = state
            .service
            .login(LoginRequest {
                identifier: &body.identifier,
                password: &body.password,
                user_agent: &user_agent,
                client_addr: &ip,
            })
            .await?;

        let mut response = Response::new(token_reply(
            outcome.user_id,
            Some(outcome.session_id),
            outcome.tokens.access_token,
        ));
        set_refresh_credentials(
            response.metadata_mut(),
            &outcome.tokens.refresh_token,
            outcome.user_id,
        )?;
        Ok(response)
    })
}

fn refresh(state: RpcState, request: Request<Empty>) -> RpcFuture<TokenReply> {
    Box::pin(async move {
        let (token, user_id) = refresh_credentials(request.metadata())?;
        let tokens = state.service.refresh(&token, user_id).await?;

        let mut response = Response::new(token_reply(user_id, None, tokens.access_token));
        set_refresh_credentials(response.metadata_mut(), &tokens.refresh_token, user_id)?;
        Ok(response)
    })
}

fn logout(state: RpcState, request: Request<LogoutRequest>) -> RpcFuture<Empty> {
    Box::pin(async move {
        let user = authenticated_user(&request)?;
        let session_id = Uuid::parse_str(&request.get_ref().session_id)
            .map_err(|_| Status::invalid_argument("session_id is not a UUID"))?;
        state.service.logout(user.user_id, session_id).await?;
        Ok(Response::new(Empty {}))
    })
}

fn logout_all(state: RpcState, request: Request<Empty>) -> RpcFuture<LogoutAllReply> {
    Box::pin(async move {
        let user = authenticated_user(&request)?;
        let revoked = state.service.logout_all(user.user_id).await?;
        Ok(Response::new(LogoutAllReply { revoked }))
    })
}

/// Routes for every method of `authgate.v1.Auth`.
pub fn router(state: RpcState, gate: AuthGate, trust_forwarded_for: bool) -> Router {
    let gated = GateInterceptor::new(gate);

    Router::new()
        .route_service(REGISTER_PATH, UnaryMethod::new(state.clone(), register))
        .route_service(LOGIN_PATH, UnaryMethod::new(state.clone(), login))
        .route_service(REFRESH_PATH, UnaryMethod::new(state.clone(), refresh))
        .route_service(
            LOGOUT_PATH,
            InterceptedService::new(UnaryMethod::new(state.clone(), logout), gated.clone()),
        )
        .route_service(
            LOGOUT_ALL_PATH,
            InterceptedService::new(UnaryMethod::new(state, logout_all), gated),
        )
        .layer(middleware::from_fn_with_state(
            trust_forwarded_for,
            attach_client_addr,
        ))
}
