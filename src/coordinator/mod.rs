//! Generation coordinator.
//!
//! [`Coordinator::handle`] runs one chat request through admission,
//! validation, the result cache and, on a miss, a single backend call
//! shared by every concurrent request with the same fingerprint:
//!
//! ```text
//! rate limiter ─▶ validator ─▶ fingerprint ─▶ cache ─(miss)─▶ flight ─▶ cache.set
//!                                                               │
//!                                              all waiters ◀────┘
//! ```
//!
//! The flight runs on its own task. Every caller waits on a oneshot
//! channel, so a caller that gives up (see
//! [`handle_with_cancel`](Coordinator::handle_with_cancel)) only drops its
//! own receiver; the backend call finishes for everyone else and still
//! populates the cache.

mod builder;
mod flight;

pub use builder::{Pictor, PictorBuilder};

use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::oneshot;
use tracing::debug;

use crate::cache::ResultCache;
use crate::limiter::RateLimiter;
use crate::providers::{ImageBackend, RetryConfig};
use crate::sync::lock;
use crate::telemetry::{EventKind, EventSink, GenerationEvent, RequestOutcome};
use crate::types::{Fingerprint, GeneratedImage, GenerationParams, UserId};
use crate::validation::PromptValidator;
use crate::{PictorError, Result};

use flight::{FlightMap, FlightOutcome, InFlightRequest};

/// State shared between the coordinator and its flight tasks.
pub(crate) struct Shared {
    pub(crate) backend: Arc<dyn ImageBackend>,
    pub(crate) cache: Arc<ResultCache<GeneratedImage>>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) retry: RetryConfig,
    pub(crate) backend_timeout: Duration,
    pub(crate) flights: FlightMap,
}

/// Entry point for image requests.
///
/// Cheap to clone; clones share the limiter, cache and in-flight table.
/// Build one with [`Pictor::builder()`].
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
    limiter: Arc<RateLimiter>,
    validator: Arc<PromptValidator>,
    defaults: Arc<GenerationParams>,
}

/// How a cache miss was resolved under the in-flight lock.
enum Admission {
    /// A flight finished between the first cache lookup and taking the lock.
    Cached(GeneratedImage),
    Waiting(oneshot::Receiver<FlightOutcome>),
}

impl Coordinator {
    pub(crate) fn new(
        shared: Shared,
        limiter: Arc<RateLimiter>,
        validator: PromptValidator,
        defaults: GenerationParams,
    ) -> Self {
        Self {
            shared: Arc::new(shared),
            limiter,
            validator: Arc::new(validator),
            defaults: Arc::new(defaults),
        }
    }

    /// Handle one request from `user_id`.
    pub async fn handle(
        &self,
        user_id: UserId,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<GeneratedImage> {
        self.handle_with_cancel(user_id, prompt, params, std::future::pending::<()>())
            .await
    }

    /// Handle one request, giving up when `cancel` completes.
    ///
    /// Cancelling returns [`PictorError::Cancelled`] to this caller only.
    /// The backend call continues for any other waiters and its result is
    /// still cached. No failure event is emitted for a cancellation.
    pub async fn handle_with_cancel<C>(
        &self,
        user_id: UserId,
        prompt: &str,
        params: GenerationParams,
        cancel: C,
    ) -> Result<GeneratedImage>
    where
        C: Future,
    {
        let result = self.serve(user_id, prompt, params, cancel).await;
        let outcome = match &result {
            Ok((_, outcome)) => *outcome,
            Err(err) => failure_outcome(err),
        };
        self.shared.sink.request_completed(user_id, outcome);
        result.map(|(image, _)| image)
    }

    /// Handle several prompts from `user_id` concurrently.
    ///
    /// Each prompt goes through the full request path, rate limiter
    /// included, and results come back in prompt order.
    pub async fn handle_batch<S>(
        &self,
        user_id: UserId,
        prompts: &[S],
        params: GenerationParams,
    ) -> Vec<Result<GeneratedImage>>
    where
        S: AsRef<str>,
    {
        join_all(
            prompts
                .iter()
                .map(|prompt| self.handle(user_id, prompt.as_ref(), params.clone())),
        )
        .await
    }

    async fn serve<C>(
        &self,
        user_id: UserId,
        prompt: &str,
        params: GenerationParams,
        cancel: C,
    ) -> Result<(GeneratedImage, RequestOutcome)>
    where
        C: Future,
    {
        if !self.limiter.can_process(user_id) {
            self.emit(GenerationEvent::new(EventKind::RateLimited, user_id));
            return Err(PictorError::RateLimited);
        }

        let (prompt, params) = match self.validate(prompt, params) {
            Ok(valid) => valid,
            Err(err) => {
                debug!(user_id, error = %err, "request failed validation");
                return Err(err);
            }
        };
        let fingerprint = Fingerprint::of(prompt, &params);

        if let Some(image) = self.shared.cache.get(&fingerprint) {
            debug!(user_id, %fingerprint, "cache hit");
            self.emit(GenerationEvent::new(EventKind::CacheHit, user_id).fingerprint(fingerprint));
            return Ok((image, RequestOutcome::CacheHit));
        }

        let receiver = match self.admit(user_id, fingerprint, prompt, params) {
            Admission::Cached(image) => {
                self.emit(
                    GenerationEvent::new(EventKind::CacheHit, user_id).fingerprint(fingerprint),
                );
                return Ok((image, RequestOutcome::CacheHit));
            }
            Admission::Waiting(receiver) => receiver,
        };
        self.emit(GenerationEvent::new(EventKind::CacheMiss, user_id).fingerprint(fingerprint));

        tokio::select! {
            outcome = receiver => match outcome {
                Ok(result) => result.map(|image| (image, RequestOutcome::Generated)),
                Err(_) => Err(PictorError::Internal(format!(
                    "flight {fingerprint} ended without reporting"
                ))),
            },
            _ = cancel => {
                debug!(user_id, %fingerprint, "caller cancelled");
                Err(PictorError::Cancelled)
            }
        }
    }

    /// Number of backend calls currently running.
    pub fn in_flight(&self) -> usize {
        lock(&self.shared.flights).len()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &ResultCache<GeneratedImage> {
        &self.shared.cache
    }

    /// Stop the limiter and cache background jobs.
    ///
    /// Flights already running finish normally.
    pub async fn shutdown(&self) {
        self.limiter.shutdown().await;
        self.shared.cache.shutdown().await;
    }

    fn validate<'a>(
        &self,
        prompt: &'a str,
        params: GenerationParams,
    ) -> Result<(&'a str, GenerationParams)> {
        let prompt = self.validator.validate_prompt(prompt)?;
        let params = params.merged_over(&self.defaults);
        self.validator.validate_params(&params)?;
        Ok((prompt, params))
    }

    /// Join the running flight for `fingerprint` or start a new one.
    fn admit(
        &self,
        user_id: UserId,
        fingerprint: Fingerprint,
        prompt: &str,
        params: GenerationParams,
    ) -> Admission {
        let mut flights = lock(&self.shared.flights);
        match flights.entry(fingerprint) {
            Entry::Occupied(mut running) => {
                debug!(user_id, %fingerprint, "joining in-flight generation");
                Admission::Waiting(running.get_mut().join())
            }
            Entry::Vacant(slot) => {
                if let Some(image) = self.shared.cache.get(&fingerprint) {
                    return Admission::Cached(image);
                }
                let (flight, receiver) = InFlightRequest::new(user_id);
                slot.insert(flight);
                tokio::spawn(flight::run(
                    self.shared.clone(),
                    fingerprint,
                    user_id,
                    prompt.to_string(),
                    params,
                ));
                Admission::Waiting(receiver)
            }
        }
    }

    fn emit(&self, event: GenerationEvent) {
        self.shared.sink.record(&event);
    }
}

fn failure_outcome(err: &PictorError) -> RequestOutcome {
    match err {
        PictorError::RateLimited => RequestOutcome::RateLimited,
        PictorError::ValidationFailed(_) => RequestOutcome::Invalid,
        PictorError::Cancelled => RequestOutcome::Cancelled,
        _ => RequestOutcome::Failed,
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("backend", &self.shared.backend.name())
            .field("in_flight", &self.in_flight())
            .field("cached", &self.shared.cache.len())
            .finish()
    }
}
