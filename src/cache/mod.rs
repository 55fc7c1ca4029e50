//! Caching subsystem.
//!
//! - [`ResultCache`]: bounded TTL cache of generation results keyed on
//!   request [`Fingerprint`](crate::Fingerprint). The coordinator consults
//!   it before starting a backend call and fills it on success. See
//!   [`result`] module docs for the expiry and eviction rules.

pub mod result;

pub use result::{CacheConfig, ResultCache};
