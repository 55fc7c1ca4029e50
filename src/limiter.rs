//! Per-user request admission.
//!
//! Two fixed windows per user (one minute, one day) with a punitive
//! cooldown. Crossing either ceiling arms the cooldown once; every check
//! during the cooldown is rejected without touching the counters, so a user
//! who keeps sending requests while blocked does not extend the block.
//!
//! State is in-memory only and owned by the [`RateLimiter`] instance.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::schedule::ScheduledJob;
use crate::sync::lock;
use crate::types::UserId;
use crate::{PictorError, Result};

const MINUTE: Duration = Duration::from_secs(60);
const DAY: Duration = Duration::from_secs(86_400);

/// Rate limit configuration.
///
/// ```rust
/// # use pictor::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new()
///     .per_minute(10)
///     .per_day(100)
///     .cooldown(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests admitted per user per minute window. Default: 5.
    pub max_requests_per_minute: u32,
    /// Requests admitted per user per day window. Default: 50.
    pub max_requests_per_day: u32,
    /// Block applied after a ceiling is crossed. Default: 1 hour.
    pub cooldown: Duration,
    /// Period of the background sweep that drops idle state. Default: 5 minutes.
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 5,
            max_requests_per_day: 50,
            cooldown: Duration::from_secs(3600),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn per_minute(mut self, n: u32) -> Self {
        self.max_requests_per_minute = n;
        self
    }

    pub fn per_day(mut self, n: u32) -> Self {
        self.max_requests_per_day = n;
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Reject configurations that would admit nobody or never sweep.
    pub fn validate(&self) -> Result<()> {
        if self.max_requests_per_minute == 0 || self.max_requests_per_day == 0 {
            return Err(PictorError::Configuration(
                "rate limits must allow at least one request".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(PictorError::Configuration(
                "rate limiter sweep interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read-only view of the configured limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_day: u32,
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
struct RateState {
    minute_count: u32,
    minute_window_start: Instant,
    day_count: u32,
    day_window_start: Instant,
    cooldown_until: Option<Instant>,
}

impl RateState {
    fn fresh(now: Instant) -> Self {
        Self {
            minute_count: 0,
            minute_window_start: now,
            day_count: 0,
            day_window_start: now,
            cooldown_until: None,
        }
    }

    /// Whether this state behaves exactly like a never-seen user.
    fn is_idle(&self, now: Instant) -> bool {
        self.cooldown_until.is_none_or(|until| now >= until)
            && now.duration_since(self.minute_window_start) >= MINUTE
            && now.duration_since(self.day_window_start) >= DAY
    }
}

/// Per-user two-tier rate limiter with cooldown.
///
/// All state sits behind one mutex per instance. Checks never suspend and
/// never fail; a user with no recorded state is treated as zero-count.
pub struct RateLimiter {
    config: RateLimitConfig,
    users: Mutex<HashMap<UserId, RateState>>,
    sweeper: Mutex<Option<ScheduledJob>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter without background maintenance.
    ///
    /// Fails with [`PictorError::Configuration`] if `config` does not pass
    /// [`RateLimitConfig::validate`].
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            users: Mutex::new(HashMap::new()),
            sweeper: Mutex::new(None),
        })
    }

    /// Create a limiter and start its periodic sweep.
    ///
    /// The sweep holds only a weak reference and stops on its own once the
    /// limiter is dropped; [`shutdown()`](Self::shutdown) stops it early.
    pub fn spawn(config: RateLimitConfig) -> Result<Arc<Self>> {
        let period = config.sweep_interval;
        let limiter = Arc::new(Self::new(config)?);
        let weak: Weak<Self> = Arc::downgrade(&limiter);
        let job = ScheduledJob::spawn("rate-limiter-sweep", period, move || {
            match weak.upgrade() {
                Some(limiter) => {
                    limiter.sweep();
                    ControlFlow::Continue(())
                }
                None => ControlFlow::Break(()),
            }
        })?;
        *lock(&limiter.sweeper) = Some(job);
        Ok(limiter)
    }

    /// Check whether `user_id` may make a request now, recording it if so.
    pub fn can_process(&self, user_id: UserId) -> bool {
        let now = Instant::now();
        let mut users = lock(&self.users);
        let state = users.entry(user_id).or_insert_with(|| RateState::fresh(now));

        if let Some(until) = state.cooldown_until {
            if now < until {
                debug!(user_id, "rejected: cooldown active");
                return false;
            }
            // Cooldown served: start a fresh minute window.
            state.cooldown_until = None;
            state.minute_count = 0;
            state.minute_window_start = now;
        }

        if now.duration_since(state.minute_window_start) >= MINUTE {
            state.minute_count = 0;
            state.minute_window_start = now;
        }
        if now.duration_since(state.day_window_start) >= DAY {
            state.day_count = 0;
            state.day_window_start = now;
        }

        if state.minute_count >= self.config.max_requests_per_minute
            || state.day_count >= self.config.max_requests_per_day
        {
            state.cooldown_until = Some(now + self.config.cooldown);
            debug!(
                user_id,
                minute_count = state.minute_count,
                day_count = state.day_count,
                cooldown_secs = self.config.cooldown.as_secs(),
                "rejected: limit reached, cooldown armed"
            );
            return false;
        }

        state.minute_count += 1;
        state.day_count += 1;
        true
    }

    /// The configured limits.
    pub fn get_limits(&self) -> RateLimits {
        RateLimits {
            per_minute: self.config.max_requests_per_minute,
            per_day: self.config.max_requests_per_day,
            cooldown: self.config.cooldown,
        }
    }

    /// Forget everything about `user_id`, lifting any cooldown.
    pub fn reset_user(&self, user_id: UserId) {
        lock(&self.users).remove(&user_id);
    }

    /// Number of users with recorded state.
    pub fn tracked_users(&self) -> usize {
        lock(&self.users).len()
    }

    /// Drop state that is equivalent to a new user: both windows elapsed
    /// and no cooldown left to serve.
    ///
    /// Returns the number of users dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut users = lock(&self.users);
        let before = users.len();
        users.retain(|_, state| !state.is_idle(now));
        let dropped = before - users.len();
        if dropped > 0 {
            debug!(dropped, remaining = users.len(), "rate limiter sweep");
        }
        dropped
    }

    /// Stop the background sweep, if one is running.
    pub async fn shutdown(&self) {
        let job = lock(&self.sweeper).take();
        if let Some(job) = job {
            job.shutdown().await;
        }
    }
}
