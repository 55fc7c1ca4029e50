//! In-flight generation records and the task that drives them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::Shared;
use crate::providers::with_retry;
use crate::sync::lock;
use crate::telemetry::{EventKind, GenerationEvent};
use crate::types::{Fingerprint, GeneratedImage, GenerationParams, UserId};
use crate::{PictorError, Result};

/// What every waiter on a flight receives.
pub(crate) type FlightOutcome = Result<GeneratedImage>;

pub(crate) type FlightMap = Mutex<HashMap<Fingerprint, InFlightRequest>>;

/// One backend call and the callers waiting on it.
pub(crate) struct InFlightRequest {
    waiters: Vec<oneshot::Sender<FlightOutcome>>,
    started_at: Instant,
    user_id: UserId,
}

impl InFlightRequest {
    /// Start a record with the initiating caller as its first waiter.
    pub(crate) fn new(user_id: UserId) -> (Self, oneshot::Receiver<FlightOutcome>) {
        let (tx, rx) = oneshot::channel();
        let flight = Self {
            waiters: vec![tx],
            started_at: Instant::now(),
            user_id,
        };
        (flight, rx)
    }

    pub(crate) fn join(&mut self) -> oneshot::Receiver<FlightOutcome> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        rx
    }

    /// Hand the outcome to every waiter in registration order.
    ///
    /// Waiters that already gave up are skipped.
    fn notify(self, fingerprint: Fingerprint, outcome: &FlightOutcome) {
        debug!(
            %fingerprint,
            user_id = self.user_id,
            waiters = self.waiters.len(),
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "notifying waiters"
        );
        for waiter in self.waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Removes a flight record that was never completed.
///
/// If the flight task panics or is aborted, dropping this guard drops the
/// waiters' senders, so they observe a closed channel instead of waiting
/// forever.
struct FlightGuard<'a> {
    flights: &'a FlightMap,
    fingerprint: Fingerprint,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if lock(self.flights).remove(&self.fingerprint).is_some() {
            warn!(fingerprint = %self.fingerprint, "flight ended without an outcome");
        }
    }
}

/// Drive one backend call to completion and fan the outcome out.
///
/// Runs as its own task, so callers that stop waiting do not cancel it.
pub(crate) async fn run(
    shared: Arc<Shared>,
    fingerprint: Fingerprint,
    user_id: UserId,
    prompt: String,
    params: GenerationParams,
) {
    let _guard = FlightGuard {
        flights: &shared.flights,
        fingerprint,
    };
    let backend = shared.backend.name();
    info!(%fingerprint, user_id, backend, "generation started");

    let started = Instant::now();
    let result = with_retry(&shared.retry, backend, shared.backend_timeout, || {
        shared
            .backend
            .generate(&prompt, &params, shared.backend_timeout)
    })
    .await;
    let latency = started.elapsed();

    let outcome: FlightOutcome = match result {
        Ok(image) => {
            shared.cache.set(fingerprint, image.clone());
            info!(
                %fingerprint,
                latency_ms = latency.as_millis() as u64,
                bytes = image.len(),
                "generation finished"
            );
            shared.sink.record(
                &GenerationEvent::new(EventKind::GenerationSuccess, user_id)
                    .fingerprint(fingerprint)
                    .latency(latency),
            );
            Ok(image)
        }
        Err(err) => {
            let attempts = err.attempts;
            let err = PictorError::from(err);
            warn!(%fingerprint, attempts, error = %err, "generation failed");
            shared.sink.record(
                &GenerationEvent::new(EventKind::GenerationFailure, user_id)
                    .fingerprint(fingerprint)
                    .latency(latency)
                    .reason(err.to_string()),
            );
            Err(err)
        }
    };

    let flight = lock(&shared.flights).remove(&fingerprint);
    if let Some(flight) = flight {
        flight.notify(fingerprint, &outcome);
    }
}
