//! Builder for configuring coordinator instances

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{Coordinator, Shared};
use crate::cache::{CacheConfig, ResultCache};
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::providers::{ImageBackend, RetryConfig};
use crate::telemetry::{EventSink, MetricsSink};
use crate::types::GenerationParams;
use crate::validation::{PromptValidator, ValidationRules};
use crate::{PictorError, Result};

/// Default hard deadline for one backend attempt.
const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(300);

/// Main entry point for creating coordinator instances.
pub struct Pictor;

impl Pictor {
    /// Create a new builder for configuring the coordinator.
    pub fn builder() -> PictorBuilder {
        PictorBuilder::new()
    }
}

/// Builder for configuring coordinator instances.
///
/// ```rust,no_run
/// # use pictor::{Pictor, RateLimitConfig, OpenAiImageBackend};
/// # async fn example() -> pictor::Result<()> {
/// let coordinator = Pictor::builder()
///     .backend(OpenAiImageBackend::new("sk-..."))
///     .rate_limits(RateLimitConfig::new().per_minute(3))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct PictorBuilder {
    backend: Option<Arc<dyn ImageBackend>>,
    rate_limits: RateLimitConfig,
    cache: CacheConfig,
    retry: RetryConfig,
    backend_timeout: Duration,
    validation: ValidationRules,
    defaults: GenerationParams,
    sink: Option<Arc<dyn EventSink>>,
    background_maintenance: bool,
}

impl PictorBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            rate_limits: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            backend_timeout: DEFAULT_BACKEND_TIMEOUT,
            validation: ValidationRules::default(),
            defaults: GenerationParams::new(),
            sink: None,
            background_maintenance: true,
        }
    }

    /// Set the image backend (required).
    pub fn backend(self, backend: impl ImageBackend + 'static) -> Self {
        self.shared_backend(Arc::new(backend))
    }

    /// Set an image backend that is shared with other owners.
    pub fn shared_backend(mut self, backend: Arc<dyn ImageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn rate_limits(mut self, config: RateLimitConfig) -> Self {
        self.rate_limits = config;
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Configure retry behaviour for transient backend errors.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Set the hard deadline for each backend attempt (default: 300s).
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn validation(mut self, rules: ValidationRules) -> Self {
        self.validation = rules;
        self
    }

    /// Parameters applied to every request that does not set them.
    pub fn defaults(mut self, defaults: GenerationParams) -> Self {
        self.defaults = defaults;
        self
    }

    /// Receiver for coordinator events (default: [`MetricsSink`]).
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run the cache cleanup and limiter sweep in the background
    /// (default: on). Requires a tokio runtime at build time.
    pub fn background_maintenance(mut self, enabled: bool) -> Self {
        self.background_maintenance = enabled;
        self
    }

    /// Build the coordinator.
    pub fn build(self) -> Result<Coordinator> {
        let backend = self.backend.ok_or(PictorError::NoBackend)?;

        self.rate_limits.validate()?;
        self.cache.validate()?;
        self.retry.validate()?;
        self.validation.validate()?;
        if self.backend_timeout.is_zero() {
            return Err(PictorError::Configuration(
                "backend timeout must be non-zero".to_string(),
            ));
        }
        let validator = PromptValidator::new(self.validation);
        validator
            .validate_params(&self.defaults)
            .map_err(|e| PictorError::Configuration(format!("invalid default parameters: {e}")))?;

        let (limiter, cache) = if self.background_maintenance {
            (
                RateLimiter::spawn(self.rate_limits)?,
                ResultCache::spawn(self.cache)?,
            )
        } else {
            (
                Arc::new(RateLimiter::new(self.rate_limits)?),
                Arc::new(ResultCache::new(self.cache)?),
            )
        };

        let shared = Shared {
            backend,
            cache,
            sink: self.sink.unwrap_or_else(|| Arc::new(MetricsSink)),
            retry: self.retry,
            backend_timeout: self.backend_timeout,
            flights: Mutex::new(HashMap::new()),
        };
        Ok(Coordinator::new(shared, limiter, validator, self.defaults))
    }
}

impl Default for PictorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
