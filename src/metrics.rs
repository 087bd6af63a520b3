//! Authentication events and request latency.
//!
//! The orchestrator reports through [`EventSink`], which never fails. The
//! default sink, [`AuthMetrics`], keeps atomic counters and a latency histogram
//! and serves them as a JSON snapshot.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Named events emitted by the auth core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    LoginSuccess,
    LoginFailure,
    RefreshSuccess,
    RefreshFailure,
    /// A rotated refresh token was presented again.
    RefreshReplay,
    RateLimited,
}

impl AuthEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEvent::LoginSuccess => "login_success",
            AuthEvent::LoginFailure => "login_failure",
            AuthEvent::RefreshSuccess => "refresh_success",
            AuthEvent::RefreshFailure => "refresh_failure",
            AuthEvent::RefreshReplay => "refresh_replay",
            AuthEvent::RateLimited => "rate_limited",
        }
    }
}

/// Collector for auth events. Implementations must not panic or block.
pub trait EventSink: Send + Sync {
    fn record(&self, event: AuthEvent);

    fn observe_latency(&self, _method: &str, _route: &str, _status: u16, _elapsed: Duration) {}
}

/// Sink that drops everything.
pub struct NoopSink;

impl EventSink for NoopSink {
    fn record(&self, _event: AuthEvent) {}
}

/// Latency buckets in seconds.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Default)]
struct LatencySeries {
    /// Cumulative count per bucket bound
    buckets: Vec<u64>,
    sum: f64,
    count: u64,
}

/// In-process counters and latency histogram.
pub struct AuthMetrics {
    login_success: AtomicU64,
    login_failure: AtomicU64,
    refresh_success: AtomicU64,
    refresh_failure: AtomicU64,
    refresh_replay: AtomicU64,
    rate_limited: AtomicU64,
    latency: RwLock<HashMap<String, LatencySeries>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EventCounts {
    pub login_success: u64,
    pub login_failure: u64,
    pub refresh_success: u64,
    pub refresh_failure: u64,
    pub refresh_replay: u64,
    pub rate_limited: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    /// `METHOD route status`
    pub series: String,
    pub buckets: Vec<f64>,
    pub counts: Vec<u64>,
    pub sum_seconds: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub events: EventCounts,
    pub request_latency: Vec<LatencySnapshot>,
}

impl Default for AuthMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthMetrics {
    pub fn new() -> Self {
        Self {
            login_success: AtomicU64::new(0),
            login_failure: AtomicU64::new(0),
            refresh_success: AtomicU64::new(0),
            refresh_failure: AtomicU64::new(0),
            refresh_replay: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            latency: RwLock::new(HashMap::new()),
        }
    }

    fn counter(&self, event: AuthEvent) -> &AtomicU64 {
        match event {
            AuthEvent::LoginSuccess => &self.login_success,
            AuthEvent::LoginFailure => &self.login_failure,
            AuthEvent::RefreshSuccess => &self.refresh_success,
            AuthEvent::RefreshFailure => &self.refresh_failure,
            AuthEvent::RefreshReplay => &self.refresh_replay,
            AuthEvent::RateLimited => &self.rate_limited,
        }
    }

    pub fn count(&self, event: AuthEvent) -> u64 {
        self.counter(event).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let events = EventCounts {
            login_success: self.count(AuthEvent::LoginSuccess),
            login_failure: self.count(AuthEvent::LoginFailure),
            refresh_success: self.count(AuthEvent::RefreshSuccess),
            refresh_failure: self.count(AuthEvent::RefreshFailure),
            refresh_replay: self.count(AuthEvent::RefreshReplay),
            rate_limited: self.count(AuthEvent::RateLimited),
        };

        let latency = self.latency.read().unwrap_or_else(|e| e.into_inner());
        let mut request_latency: Vec<LatencySnapshot> = latency
            .iter()
            .map(|(series, data)| LatencySnapshot {
                series: series.clone(),
                buckets: LATENCY_BUCKETS.to_vec(),
                counts: data.buckets.clone(),
                sum_seconds: data.sum,
                count: data.count,
            })
            .collect();
        request_latency.sort_by(|a, b| a.series.cmp(&b.series));

        MetricsSnapshot {
            events,
            request_latency,
        }
    }
}

impl EventSink for AuthMetrics {
    fn record(&self, event: AuthEvent) {
        self.counter(event).fetch_add(1, Ordering::Relaxed);
        tracing::trace!(event = event.as_str(), "auth event");
    }

    fn observe_latency(&self, method: &str, route: &str, status: u16, elapsed: Duration) {
        let key = format!("{} {} {}", method, route, status);
        let seconds = elapsed.as_secs_f64();

        let mut latency = self.latency.write().unwrap_or_else(|e| e.into_inner());
        let series = latency.entry(key).or_insert_with(|| LatencySeries {
            buckets: vec![0; LATENCY_BUCKETS.len()],
            ..Default::default()
        });
        for (i, &bound) in LATENCY_BUCKETS.iter().enumerate() {
            if seconds <= bound {
                series.buckets[i] += 1;
            }
        }
        series.sum += seconds;
        series.count += 1;
    }
}
