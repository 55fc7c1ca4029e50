//! End-to-end coordinator behaviour against mock backends.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pictor::{
    BackendError, BackendResult, CacheConfig, Coordinator, ErrorCategory, EventKind, EventSink,
    GeneratedImage, GenerationEvent, GenerationParams, ImageBackend, Pictor, PictorError,
    RateLimitConfig, RequestOutcome, RetryConfig, UserId,
};

/// Backend that answers after `delay`, or fails with `fail_with` if set.
struct MockBackend {
    calls: AtomicU32,
    delay: Duration,
    fail_with: Option<fn() -> BackendError>,
}

impl MockBackend {
    fn ok() -> Arc<Self> {
        Self::with(Duration::ZERO, None)
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Self::with(delay, None)
    }

    fn failing(fail_with: fn() -> BackendError) -> Arc<Self> {
        Self::with(Duration::ZERO, Some(fail_with))
    }

    fn with(delay: Duration, fail_with: Option<fn() -> BackendError>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            delay,
            fail_with,
        })
    }

    fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
        _timeout: Duration,
    ) -> BackendResult<GeneratedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match self.fail_with {
            Some(fail) => Err(fail()),
            None => Ok(GeneratedImage::new(prompt.as_bytes().to_vec(), "image/png")),
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<GenerationEvent>>,
    outcomes: Mutex<Vec<(UserId, RequestOutcome)>>,
}

impl RecordingSink {
    fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    fn events(&self) -> Vec<GenerationEvent> {
        self.events.lock().unwrap().clone()
    }

    fn outcomes(&self) -> Vec<(UserId, RequestOutcome)> {
        self.outcomes.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &GenerationEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn request_completed(&self, user_id: UserId, outcome: RequestOutcome) {
        self.outcomes.lock().unwrap().push((user_id, outcome));
    }
}

fn coordinator(backend: Arc<MockBackend>, sink: Arc<RecordingSink>) -> Coordinator {
    Pictor::builder()
        .shared_backend(backend)
        .event_sink(sink)
        .background_maintenance(false)
        .build()
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn second_identical_request_is_served_from_cache() {
    let backend = MockBackend::ok();
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(backend.clone(), sink.clone());

    let first = coordinator
        .handle(1, "a cat", GenerationParams::new())
        .await
        .unwrap();
    let second = coordinator
        .handle(1, "a cat", GenerationParams::new())
        .await
        .unwrap();

    assert_eq!(first.bytes(), second.bytes());
    assert_eq!(backend.call_count(), 1);
    assert_eq!(
        sink.kinds(),
        vec![
            EventKind::CacheMiss,
            EventKind::GenerationSuccess,
            EventKind::CacheHit
        ]
    );
    let success = &sink.events()[1];
    assert!(success.latency.is_some());
    assert_eq!(success.fingerprint, sink.events()[2].fingerprint);
}

#[tokio::test(start_paused = true)]
async fn whitespace_differences_share_a_result() {
    let backend = MockBackend::ok();
    let coordinator = coordinator(backend.clone(), Arc::default());

    coordinator
        .handle(1, "a  cat in   space", GenerationParams::new())
        .await
        .unwrap();
    coordinator
        .handle(2, "  a cat in space ", GenerationParams::new())
        .await
        .unwrap();
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_request_never_reaches_backend() {
    let backend = MockBackend::ok();
    let sink = Arc::new(RecordingSink::default());
    let coordinator = Pictor::builder()
        .shared_backend(backend.clone())
        .event_sink(sink.clone())
        .rate_limits(RateLimitConfig::new().per_minute(1))
        .background_maintenance(false)
        .build()
        .unwrap();

    coordinator
        .handle(1, "a cat", GenerationParams::new())
        .await
        .unwrap();
    let err = coordinator
        .handle(1, "a dog", GenerationParams::new())
        .await
        .unwrap_err();

    assert_eq!(err, PictorError::RateLimited);
    assert_eq!(err.category(), ErrorCategory::RateLimited);
    assert_eq!(backend.call_count(), 1);
    let rejected = sink.events().pop().unwrap();
    assert_eq!(rejected.kind, EventKind::RateLimited);
    assert_eq!(rejected.user_id, 1);
    assert_eq!(rejected.fingerprint, None);
}

#[tokio::test(start_paused = true)]
async fn invalid_prompt_never_reaches_backend() {
    let backend = MockBackend::ok();
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(backend.clone(), sink.clone());

    for prompt in ["ab", "a cat <script>", "nsfw cat"] {
        let err = coordinator
            .handle(1, prompt, GenerationParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PictorError::ValidationFailed(_)), "{prompt}");
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
    }
    let err = coordinator
        .handle(1, "a cat", GenerationParams::new().steps(500))
        .await
        .unwrap_err();
    assert!(matches!(err, PictorError::ValidationFailed(_)));

    assert_eq!(backend.call_count(), 0);
    assert!(sink.kinds().is_empty());
}

#[tokio::test(start_paused = true)]
async fn explicit_default_and_omitted_default_collide() {
    let backend = MockBackend::ok();
    let coordinator = Pictor::builder()
        .shared_backend(backend.clone())
        .defaults(GenerationParams::new().steps(30))
        .background_maintenance(false)
        .build()
        .unwrap();

    coordinator
        .handle(1, "a cat", GenerationParams::new())
        .await
        .unwrap();
    coordinator
        .handle(1, "a cat", GenerationParams::new().steps(30))
        .await
        .unwrap();
    assert_eq!(backend.call_count(), 1);

    coordinator
        .handle(1, "a cat", GenerationParams::new().steps(40))
        .await
        .unwrap();
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn terminal_rejection_is_not_retried_or_cached() {
    let backend = MockBackend::failing(|| BackendError::Rejected("content policy".into()));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(backend.clone(), sink.clone());

    let err = coordinator
        .handle(1, "a cat", GenerationParams::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        PictorError::BackendTerminal {
            reason: "content policy".into()
        }
    );
    assert_eq!(err.category(), ErrorCategory::GenerationFailed);
    assert_eq!(backend.call_count(), 1);

    let failure = sink.events().pop().unwrap();
    assert_eq!(failure.kind, EventKind::GenerationFailure);
    assert!(failure.reason.unwrap().contains("content policy"));

    // Failures are not cached.
    let _ = coordinator.handle(1, "a cat", GenerationParams::new()).await;
    assert_eq!(backend.call_count(), 2);
    assert!(coordinator.cache().is_empty());
}

#[tokio::test(start_paused = true)]
async fn backend_timeout_is_retried_then_reported() {
    let backend = MockBackend::slow(Duration::from_secs(60));
    let coordinator = Pictor::builder()
        .shared_backend(backend.clone())
        .backend_timeout(Duration::from_secs(5))
        .retry(RetryConfig::new().max_attempts(2))
        .background_maintenance(false)
        .build()
        .unwrap();

    let err = coordinator
        .handle(1, "a cat", GenerationParams::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PictorError::BackendTransient { attempts: 2, .. }
    ));
    assert_eq!(backend.call_count(), 2);
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_caller_leaves_other_waiters_intact() {
    let backend = MockBackend::slow(Duration::from_secs(10));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(backend.clone(), sink.clone());

    let other = coordinator.clone();
    let waiter =
        tokio::spawn(async move { other.handle(2, "a cat", GenerationParams::new()).await });

    let cancelled = coordinator
        .handle_with_cancel(
            1,
            "a cat",
            GenerationParams::new(),
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await;
    assert_eq!(cancelled.unwrap_err(), PictorError::Cancelled);
    assert_eq!(PictorError::Cancelled.category(), ErrorCategory::Cancelled);

    let image = waiter.await.unwrap().unwrap();
    assert_eq!(image.bytes(), b"a cat");
    assert_eq!(backend.call_count(), 1);
    assert!(!sink.kinds().contains(&EventKind::GenerationFailure));
}

#[tokio::test(start_paused = true)]
async fn cancelled_flight_still_populates_cache() {
    let backend = MockBackend::slow(Duration::from_secs(10));
    let coordinator = coordinator(backend.clone(), Arc::default());

    let result = coordinator
        .handle_with_cancel(
            1,
            "a cat",
            GenerationParams::new(),
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await;
    assert_eq!(result.unwrap_err(), PictorError::Cancelled);
    assert_eq!(coordinator.in_flight(), 1);

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(coordinator.in_flight(), 0);
    assert_eq!(coordinator.cache().len(), 1);

    coordinator
        .handle(1, "a cat", GenerationParams::new())
        .await
        .unwrap();
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn every_caller_reports_one_outcome() {
    let backend = MockBackend::slow(Duration::from_secs(10));
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(backend.clone(), sink.clone());

    let other = coordinator.clone();
    let waiter =
        tokio::spawn(async move { other.handle(2, "a cat", GenerationParams::new()).await });

    let cancelled = coordinator
        .handle_with_cancel(
            1,
            "a cat",
            GenerationParams::new(),
            tokio::time::sleep(Duration::from_secs(1)),
        )
        .await;
    assert!(cancelled.is_err());
    assert!(coordinator.handle(3, "ab", GenerationParams::new()).await.is_err());
    waiter.await.unwrap().unwrap();
    coordinator
        .handle(4, "a cat", GenerationParams::new())
        .await
        .unwrap();

    assert_eq!(backend.call_count(), 1);
    assert_eq!(
        sink.outcomes(),
        vec![
            (1, RequestOutcome::Cancelled),
            (3, RequestOutcome::Invalid),
            (2, RequestOutcome::Generated),
            (4, RequestOutcome::CacheHit),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn batch_results_follow_prompt_order() {
    let backend = MockBackend::ok();
    let sink = Arc::new(RecordingSink::default());
    let coordinator = Pictor::builder()
        .shared_backend(backend.clone())
        .event_sink(sink.clone())
        .rate_limits(RateLimitConfig::new().per_minute(2))
        .background_maintenance(false)
        .build()
        .unwrap();

    let results = coordinator
        .handle_batch(1, &["a cat", "a dog", "a fox"], GenerationParams::new())
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().bytes(), b"a cat");
    assert_eq!(results[1].as_ref().unwrap().bytes(), b"a dog");
    assert_eq!(results[2], Err(PictorError::RateLimited));
    assert_eq!(backend.call_count(), 2);
    assert_eq!(sink.outcomes().len(), 3);
}

#[tokio::test]
async fn build_requires_backend() {
    let result = Pictor::builder().build();
    assert!(matches!(result, Err(PictorError::NoBackend)));
}

#[tokio::test]
async fn build_rejects_invalid_configuration() {
    let invalid = [
        Pictor::builder().cache(CacheConfig::new().max_size(0)),
        Pictor::builder().rate_limits(RateLimitConfig::new().per_day(0)),
        Pictor::builder().retry(RetryConfig::new().max_attempts(0)),
        Pictor::builder().backend_timeout(Duration::ZERO),
        Pictor::builder().defaults(GenerationParams::new().cfg_scale(99.0)),
    ];
    for builder in invalid {
        let result = builder.shared_backend(MockBackend::ok()).build();
        assert!(matches!(result, Err(PictorError::Configuration(_))));
    }
}

#[test]
fn background_maintenance_needs_a_runtime() {
    let result = Pictor::builder().shared_backend(MockBackend::ok()).build();
    assert!(matches!(result, Err(PictorError::Configuration(_))));

    let result = Pictor::builder()
        .shared_backend(MockBackend::ok())
        .background_maintenance(false)
        .build();
    assert!(result.is_ok());
}

#[tokio::test]
async fn shutdown_stops_background_jobs() {
    let coordinator = Pictor::builder()
        .shared_backend(MockBackend::ok())
        .build()
        .unwrap();
    coordinator
        .handle(1, "a cat", GenerationParams::new())
        .await
        .unwrap();
    coordinator.shutdown().await;
    assert_eq!(coordinator.limiter().tracked_users(), 1);
    assert_eq!(coordinator.cache().len(), 1);
}
