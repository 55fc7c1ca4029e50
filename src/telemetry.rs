//! Telemetry: coordinator events and metric name constants.
//!
//! The coordinator reports every decision it makes as a [`GenerationEvent`]
//! to an [`EventSink`]. What happens to the event is up to the sink:
//! [`MetricsSink`] records it through the `metrics` facade, tests collect
//! events in memory. Consumers install their own `metrics` recorder (e.g.
//! prometheus, statsd); without a recorder installed, all metric calls are
//! no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `pictor_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `outcome`: terminal state of a request, one per caller: "rate_limited",
//!   "invalid", "cache_hit", "generated", "failed", "cancelled"
//! - `backend`: backend name (e.g. "openai")

use std::fmt;
use std::time::Duration;

use crate::types::{Fingerprint, UserId};

/// Requests that reached a terminal outcome, counted once per caller.
///
/// Callers that joined another caller's generation are counted too.
///
/// Labels: `outcome`.
pub const REQUESTS_TOTAL: &str = "pictor_requests_total";

/// Requests rejected by the rate limiter.
pub const RATE_LIMITED_TOTAL: &str = "pictor_rate_limited_total";

/// Result cache hits.
pub const CACHE_HITS_TOTAL: &str = "pictor_cache_hits_total";

/// Result cache misses (each starts or joins a backend call).
pub const CACHE_MISSES_TOTAL: &str = "pictor_cache_misses_total";

/// Entries evicted from a full result cache.
pub const CACHE_EVICTIONS_TOTAL: &str = "pictor_cache_evictions_total";

/// Entries dropped from the result cache because their TTL ran out.
pub const CACHE_EXPIRED_TOTAL: &str = "pictor_cache_expired_total";

/// Wall time of a backend generation, retries included, in seconds.
pub const GENERATION_DURATION_SECONDS: &str = "pictor_generation_duration_seconds";

/// Generations that ended in a terminal failure.
pub const GENERATION_FAILURES_TOTAL: &str = "pictor_generation_failures_total";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `backend`.
pub const RETRIES_TOTAL: &str = "pictor_retries_total";

/// What a [`GenerationEvent`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RateLimited,
    CacheHit,
    CacheMiss,
    GenerationSuccess,
    GenerationFailure,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::RateLimited => "rate_limited",
            EventKind::CacheHit => "cache_hit",
            EventKind::CacheMiss => "cache_miss",
            EventKind::GenerationSuccess => "generation_success",
            EventKind::GenerationFailure => "generation_failure",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single caller's request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
    RateLimited,
    Invalid,
    CacheHit,
    /// Served by a backend call, whether started or joined.
    Generated,
    Failed,
    Cancelled,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::RateLimited => "rate_limited",
            RequestOutcome::Invalid => "invalid",
            RequestOutcome::CacheHit => "cache_hit",
            RequestOutcome::Generated => "generated",
            RequestOutcome::Failed => "failed",
            RequestOutcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single coordinator decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationEvent {
    pub kind: EventKind,
    pub user_id: UserId,
    /// Absent for rate-limited requests, which are rejected before the
    /// request is fingerprinted.
    pub fingerprint: Option<Fingerprint>,
    /// Backend wall time, set on `GenerationSuccess` and `GenerationFailure`.
    pub latency: Option<Duration>,
    /// Failure reason, set on `GenerationFailure`.
    pub reason: Option<String>,
}

impl GenerationEvent {
    pub fn new(kind: EventKind, user_id: UserId) -> Self {
        Self {
            kind,
            user_id,
            fingerprint: None,
            latency: None,
            reason: None,
        }
    }

    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Receiver of coordinator events.
///
/// Called synchronously on the request path; implementations must be
/// cheap and must not block.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &GenerationEvent);

    /// Called exactly once per [`Coordinator::handle`](crate::Coordinator::handle)
    /// call, after its result is known.
    fn request_completed(&self, _user_id: UserId, _outcome: RequestOutcome) {}
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn record(&self, _event: &GenerationEvent) {}
}

/// Sink that records events through the `metrics` facade.
///
/// This is the default sink used by the coordinator builder.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsSink;

impl EventSink for MetricsSink {
    fn record(&self, event: &GenerationEvent) {
        match event.kind {
            EventKind::RateLimited => {
                metrics::counter!(RATE_LIMITED_TOTAL).increment(1);
            }
            EventKind::CacheHit => {
                metrics::counter!(CACHE_HITS_TOTAL).increment(1);
            }
            EventKind::CacheMiss => {
                metrics::counter!(CACHE_MISSES_TOTAL).increment(1);
            }
            EventKind::GenerationSuccess => {
                if let Some(latency) = event.latency {
                    metrics::histogram!(GENERATION_DURATION_SECONDS).record(latency.as_secs_f64());
                }
            }
            EventKind::GenerationFailure => {
                metrics::counter!(GENERATION_FAILURES_TOTAL).increment(1);
            }
        }
    }

    fn request_completed(&self, _user_id: UserId, outcome: RequestOutcome) {
        metrics::counter!(REQUESTS_TOTAL, "outcome" => outcome.as_str()).increment(1);
    }
}
