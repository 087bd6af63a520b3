//! Rate limiting for authentication endpoints.
//!
//! Login attempts go through [`RateGuard`], a fixed-window counter per client
//! address whose storage is pluggable (in-process or the shared database).
//! Registration additionally uses a governor token bucket per IP.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::api::ApiError;
use crate::auth::extract_client_ip;
use crate::clock::unix_now;
use crate::error::StoreError;

/// Storage for fixed-window counters.
///
/// `incr` must increment and read atomically: two concurrent callers never
/// observe the same post-increment count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key` and return the post-increment count.
    /// If the key has no live window at `now`, a new window of `window_secs`
    /// is armed and the count starts at 1.
    async fn incr(&self, key: &str, window_secs: i64, now: i64) -> Result<u64, StoreError>;

    /// Drop counters whose window ended at or before `now`.
    async fn purge_elapsed(&self, now: i64) -> Result<u64, StoreError>;
}

/// In-process counters. Only correct when a single process serves all traffic.
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, (u64, i64)>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str, window_secs: i64, now: i64) -> Result<u64, StoreError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| StoreError::Corrupt("rate counter lock poisoned".into()))?;

        let entry = windows
            .entry(key.to_string())
            .or_insert((0, now + window_secs));
        if entry.1 <= now {
            *entry = (0, now + window_secs);
        }
        entry.0 += 1;
        Ok(entry.0)
    }

    async fn purge_elapsed(&self, now: i64) -> Result<u64, StoreError> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| StoreError::Corrupt("rate counter lock poisoned".into()))?;

        let before = windows.len();
        windows.retain(|_, (_, ends_at)| *ends_at > now);
        Ok((before - windows.len()) as u64)
    }
}

/// How many attempts a key gets per window.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub limit: u64,
    pub window: Duration,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u64,
}

/// Fixed-window admission control keyed by client address.
///
/// Errors from the counter store are returned to the caller, who must treat
/// them as a refusal.
#[derive(Clone)]
pub struct RateGuard {
    store: Arc<dyn CounterStore>,
    policy: RatePolicy,
}

impl RateGuard {
    pub fn new(store: Arc<dyn CounterStore>, policy: RatePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RatePolicy {
        self.policy
    }

    pub async fn admit(&self, key: &str) -> Result<Admission, StoreError> {
        self.admit_at(key, unix_now()).await
    }

    pub async fn admit_at(&self, key: &str, now: i64) -> Result<Admission, StoreError> {
        let window_secs = self.policy.window.as_secs().max(1) as i64;
        let count = self.store.incr(key, window_secs, now).await?;
        Ok(Admission {
            allowed: count <= self.policy.limit,
            remaining: self.policy.limit.saturating_sub(count),
        })
    }

    pub async fn purge_elapsed(&self, now: i64) -> Result<u64, StoreError> {
        self.store.purge_elapsed(now).await
    }
}

/// Per-IP token bucket.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Token bucket guarding account creation.
#[derive(Clone)]
pub struct RegisterLimiter {
    limiter: Arc<IpLimiter>,
    trust_forwarded_for: bool,
}

impl RegisterLimiter {
    /// Default: 3 registrations per minute per IP.
    pub const PER_MINUTE: u32 = 3;

    pub fn new(per_minute: NonZeroU32, trust_forwarded_for: bool) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            trust_forwarded_for,
        }
    }

    pub fn check(&self, ip: &str) -> bool {
        self.limiter.check_key(&ip.to_string()).is_ok()
    }
}

/// Middleware for rate limiting user registration.
pub async fn rate_limit_register(
    State(limiter): State<RegisterLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, limiter.trust_forwarded_for) {
        Ok(ip) => ip,
        Err(reason) => return ApiError::bad_request(reason).into_response(),
    };

    if limiter.check(&ip) {
        next.run(request).await
    } else {
        tracing::warn!(client_ip = %ip, "Registration rate limit exceeded");
        ApiError::too_many_requests("Too many signup attempts. Please wait before trying again.")
            .into_response()
    }
}
