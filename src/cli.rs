//! CLI argument parsing, validation, and startup helpers.

use std::num::NonZeroU32;
use std::time::Duration;

use crate::ServerConfig;
use crate::db::Database;
use crate::rate_limit::RatePolicy;
use crate::service::AuthConfig;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Where login rate counters live.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RateBackend {
    /// Per-process counters
    Memory,
    /// Counters in the database, shared by every process using it
    #[default]
    Sqlite,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "authgate",
    about = "Session and token authentication service"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "AUTHGATE_PORT", default_value = "8082")]
    pub port: u16,

    /// Path to SQLite database file (":memory:" for a throwaway database)
    #[arg(short, long, env = "AUTHGATE_DATABASE", default_value = "authgate.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long, env = "AUTHGATE_JWT_SECRET_FILE")]
    pub jwt_secret_file: Option<String>,

    /// Access token lifetime in minutes
    #[arg(long, env = "AUTHGATE_ACCESS_TTL_MINUTES", default_value = "15",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub access_ttl_minutes: u64,

    /// Refresh session lifetime in days
    #[arg(long, env = "AUTHGATE_REFRESH_TTL_DAYS", default_value = "15",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub refresh_ttl_days: u64,

    /// Login attempts allowed per client address per window
    #[arg(long, env = "AUTHGATE_LOGIN_LIMIT", default_value = "100",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub login_limit: u64,

    /// Login rate window in seconds
    #[arg(long, env = "AUTHGATE_LOGIN_WINDOW_SECS", default_value = "60",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub login_window_secs: u64,

    /// Registrations allowed per client address per minute
    #[arg(long, env = "AUTHGATE_REGISTER_PER_MINUTE", default_value = "3")]
    pub register_per_minute: NonZeroU32,

    /// Storage for login rate counters
    #[arg(long, env = "AUTHGATE_RATE_BACKEND", default_value = "sqlite")]
    pub rate_backend: RateBackend,

    /// Deadline for a single storage call, in milliseconds
    #[arg(long, env = "AUTHGATE_STORAGE_TIMEOUT_MS", default_value = "5000",
        value_parser = clap::value_parser!(u64).range(1..))]
    pub storage_timeout_ms: u64,

    /// Take the client address from X-Forwarded-For (only behind a trusted proxy)
    #[arg(long, env = "AUTHGATE_TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    /// Omit the Secure flag on cookies (local development over plain HTTP)
    #[arg(long, env = "AUTHGATE_INSECURE_COOKIES")]
    pub insecure_cookies: bool,

    /// Revoke the whole session when a rotated refresh token is replayed
    #[arg(long, env = "AUTHGATE_REVOKE_ON_REPLAY")]
    pub revoke_on_replay: bool,

    /// Log output format
    #[arg(short, long, env = "AUTHGATE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format. Honors `RUST_LOG`,
/// defaulting to `info`.
pub fn init_logging(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: main calls this before the async runtime starts, so no other
        // thread exists to read or write the environment concurrently.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    validate_jwt_secret(secret)
}

fn validate_jwt_secret(secret: String) -> Option<String> {
    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }
    Some(secret)
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, jwt_secret: String) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        access_ttl: Duration::from_secs(args.access_ttl_minutes * 60),
        auth: AuthConfig {
            refresh_ttl: Duration::from_secs(args.refresh_ttl_days * 24 * 60 * 60),
            storage_timeout: Duration::from_millis(args.storage_timeout_ms),
            revoke_on_replay: args.revoke_on_replay,
        },
        login_limit: RatePolicy {
            limit: args.login_limit,
            window: Duration::from_secs(args.login_window_secs),
        },
        rate_backend: args.rate_backend,
        register_per_minute: args.register_per_minute,
        secure_cookies: !args.insecure_cookies,
        trust_forwarded_for: args.trust_forwarded_for,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["authgate"]).unwrap();
        assert_eq!(args.port, 8082);
        assert_eq!(args.database, "authgate.db");
        assert_eq!(args.access_ttl_minutes, 15);
        assert_eq!(args.refresh_ttl_days, 15);
        assert_eq!(args.login_limit, 100);
        assert_eq!(args.login_window_secs, 60);
        assert_eq!(args.register_per_minute.get(), 3);
        assert_eq!(args.rate_backend, RateBackend::Sqlite);
        assert!(!args.revoke_on_replay);
        assert!(!args.insecure_cookies);
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "authgate",
            "--port",
            "9000",
            "--rate-backend",
            "memory",
            "--revoke-on-replay",
            "--insecure-cookies",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(args.port, 9000);
        assert_eq!(args.rate_backend, RateBackend::Memory);
        assert!(args.revoke_on_replay);
        assert!(args.insecure_cookies);
        assert!(matches!(args.log_format, LogFormat::Json));
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert!(Args::try_parse_from(["authgate", "--login-limit", "0"]).is_err());
        assert!(Args::try_parse_from(["authgate", "--register-per-minute", "0"]).is_err());
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(validate_jwt_secret("short".to_string()).is_none());
        assert!(validate_jwt_secret("x".repeat(32)).is_some());
    }

    #[test]
    fn test_secret_file_is_read_without_a_runtime() {
        // The env path mutates the process environment; only exercise it when unset.
        if std::env::var_os("JWT_SECRET").is_some() {
            return;
        }
        assert!(tokio::runtime::Handle::try_current().is_err());

        let path = std::env::temp_dir().join(format!("authgate-secret-{}", std::process::id()));
        std::fs::write(&path, format!("  {}\n", "s".repeat(40))).unwrap();
        let secret = load_jwt_secret(path.to_str());
        std::fs::remove_file(&path).unwrap();
        assert_eq!(secret, Some("s".repeat(40)));

        assert!(load_jwt_secret(Some("/nonexistent/authgate-secret")).is_none());
    }

    #[tokio::test]
    async fn test_build_config() {
        let args = Args::try_parse_from(["authgate", "--access-ttl-minutes", "5"]).unwrap();
        let db = Database::open(":memory:").await.unwrap();
        let config = build_config(&args, db, "x".repeat(32));

        assert_eq!(config.access_ttl, Duration::from_secs(300));
        assert_eq!(config.auth.refresh_ttl, Duration::from_secs(15 * 86400));
        assert_eq!(config.auth.storage_timeout, Duration::from_millis(5000));
        assert!(config.secure_cookies);
    }
}
