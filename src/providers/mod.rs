//! Image backends and the retry policy wrapped around them.
//!
//! [`ImageBackend`] is the seam the coordinator calls through. The hosted
//! [`OpenAiImageBackend`] is compiled with the `openai` feature; anything
//! else (a local pipeline, a test double) implements the trait directly.

pub mod retry;
pub mod traits;

#[cfg(feature = "openai")]
pub mod openai;

pub use retry::{RetryConfig, RetryError, with_retry};
pub use traits::ImageBackend;

#[cfg(feature = "openai")]
pub use openai::OpenAiImageBackend;
