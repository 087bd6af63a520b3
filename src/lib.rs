pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod clock;
pub mod db;
pub mod error;
pub mod grpc;
pub mod jwt;
pub mod metrics;
pub mod password;
pub mod rate_limit;
pub mod service;

use api::{AuthState, create_api_router, health, metrics_router, track_latency};
use axum::{Router, middleware, routing::get};
use cli::RateBackend;
use db::Database;
use grpc::RpcState;
use jwt::TokenCodec;
use metrics::AuthMetrics;
use rate_limit::{CounterStore, MemoryCounterStore, RateGuard, RatePolicy, RegisterLimiter};
use service::{AuthConfig, AuthService};
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    /// Access token lifetime
    pub access_ttl: Duration,
    /// Session lifetime, storage deadline and replay policy
    pub auth: AuthConfig,
    /// Login attempts per client address per window
    pub login_limit: RatePolicy,
    /// Where login rate counters are kept
    pub rate_backend: RateBackend,
    /// Registrations per client address per minute
    pub register_per_minute: NonZeroU32,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    /// Take the client address from X-Forwarded-For (requires running behind a proxy)
    pub trust_forwarded_for: bool,
}

/// A running application: the router plus the handles tests and the binary need.
pub struct App {
    pub router: Router,
    pub service: AuthService,
    pub metrics: Arc<AuthMetrics>,
}

/// Build the auth service with its JSON API and gRPC surface.
pub fn create_app(config: &ServerConfig) -> App {
    let codec = Arc::new(TokenCodec::new(&config.jwt_secret, config.access_ttl));

    let counters: Arc<dyn CounterStore> = match config.rate_backend {
        RateBackend::Memory => Arc::new(MemoryCounterStore::new()),
        RateBackend::Sqlite => Arc::new(config.db.rate_counters()),
    };
    let guard = RateGuard::new(counters, config.login_limit);

    let metrics = Arc::new(AuthMetrics::new());
    let service = AuthService::new(
        config.db.clone(),
        codec,
        guard,
        metrics.clone(),
        config.auth.clone(),
    );

    let state = AuthState {
        gate: service.gate(),
        service: service.clone(),
        secure_cookies: config.secure_cookies,
        trust_forwarded_for: config.trust_forwarded_for,
    };
    let register_limiter =
        RegisterLimiter::new(config.register_per_minute, config.trust_forwarded_for);

    let rpc = grpc::router(
        RpcState {
            service: service.clone(),
            register_limiter: register_limiter.clone(),
        },
        state.gate.clone(),
        config.trust_forwarded_for,
    );

    let router = Router::new()
        .nest("/api", create_api_router(state, register_limiter))
        .merge(rpc)
        .route("/health", get(health))
        .merge(metrics_router(metrics.clone()))
        .route_layer(middleware::from_fn_with_state(metrics.clone(), track_latency));

    App {
        router,
        service,
        metrics,
    }
}

/// Run cleanup once and spawn the background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(service: &AuthService) {
    cleanup::run_cleanup(service).await;
    cleanup::spawn_cleanup_scheduler(service.clone());
}

/// Run the server on the given listener until Ctrl-C.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(router: Router, listener: TcpListener) -> Result<(), std::io::Error> {
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    let app = create_app(&config);
    init_cleanup(&app.service).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(app.router, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
