//! Public types for the Pictor API.

mod fingerprint;
mod image;
mod params;

pub use fingerprint::Fingerprint;
pub use image::GeneratedImage;
pub use params::GenerationParams;

/// Chat-platform user identifier.
pub type UserId = i64;
