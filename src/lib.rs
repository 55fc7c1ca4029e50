//! Pictor - request coordination for image-generation bots
//!
//! Sits between a chat front-end and an image backend and decides, for each
//! incoming prompt, whether the user may ask right now, whether the answer
//! is already cached, and whether an identical request is already being
//! generated. Only the first of any number of identical concurrent
//! requests reaches the backend; everyone else shares its result.
//!
//! # Example
//!
//! ```rust,no_run
//! use pictor::{GenerationParams, OpenAiImageBackend, Pictor};
//!
//! #[tokio::main]
//! async fn main() -> pictor::Result<()> {
//!     let coordinator = Pictor::builder()
//!         .backend(OpenAiImageBackend::new("sk-your-key"))
//!         .build()?;
//!
//!     let image = coordinator
//!         .handle(42, "a cat in a spacesuit", GenerationParams::new().quality("hd"))
//!         .await?;
//!
//!     println!("{} bytes of {}", image.len(), image.content_type);
//!     Ok(())
//! }
//! ```
//!
//! # Errors
//!
//! Every failure is a [`PictorError`]; [`PictorError::category()`] reduces
//! it to the handful of replies a chat bot actually sends.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod limiter;
pub mod providers;
pub mod schedule;
mod sync;
pub mod telemetry;
pub mod types;
pub mod validation;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, ResultCache};
pub use config::{Config, Secrets};
pub use coordinator::{Coordinator, Pictor, PictorBuilder};
pub use error::{BackendError, BackendResult, ErrorCategory, PictorError, Result};
pub use limiter::{RateLimitConfig, RateLimiter, RateLimits};
pub use providers::{ImageBackend, RetryConfig};
pub use telemetry::{
    EventKind, EventSink, GenerationEvent, MetricsSink, NoopSink, RequestOutcome,
};
pub use types::{Fingerprint, GeneratedImage, GenerationParams, UserId};
pub use validation::{PromptValidator, ValidationRules};
pub use version::{PKG_VERSION, version_string};

#[cfg(feature = "openai")]
pub use providers::OpenAiImageBackend;
