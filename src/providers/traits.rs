//! The image backend seam.
//!
//! The coordinator knows nothing about diffusion pipelines or hosted APIs;
//! it only calls [`ImageBackend::generate`]. Implementations classify their
//! own failures:
//!
//! - [`BackendError::Timeout`] and [`BackendError::Unavailable`] are
//!   transient and retried with backoff
//! - [`BackendError::Rejected`] is terminal and returned to every waiter
//!   immediately
//!
//! # Example
//!
//! ```ignore
//! async fn generate(&self, prompt: &str, params: &GenerationParams, timeout: Duration)
//!     -> BackendResult<GeneratedImage>
//! {
//!     if self.queue_full() {
//!         return Err(BackendError::Unavailable("queue full".into()));
//!     }
//!     // ... run the pipeline
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;

use crate::error::BackendResult;
use crate::types::{GeneratedImage, GenerationParams};

/// Asynchronous image generator.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Backend name for logging/metrics.
    fn name(&self) -> &str;

    /// Generate one image for `prompt`.
    ///
    /// `params` are already merged with the configured defaults. `timeout`
    /// is the deadline for this attempt; the coordinator enforces it as
    /// well, so honouring it is about releasing resources early rather
    /// than correctness.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
        timeout: Duration,
    ) -> BackendResult<GeneratedImage>;
}
