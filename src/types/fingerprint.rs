//! Request fingerprints used as cache and single-flight keys.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use super::GenerationParams;

/// Content hash of a normalized generation request.
///
/// Two requests share a fingerprint when their prompts match after
/// whitespace normalization and their (already default-merged) parameter
/// maps have the same canonical form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint a prompt and its parameters.
    ///
    /// Uses `DefaultHasher` (SipHash). The hash is deterministic within a
    /// process lifetime, which is all an in-memory cache needs.
    pub fn of(prompt: &str, params: &GenerationParams) -> Self {
        let mut hasher = DefaultHasher::new();
        normalize_prompt(prompt).hash(&mut hasher);
        params.canonical_json().hash(&mut hasher);
        Self(hasher.finish())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Trim and collapse internal whitespace runs to a single space.
fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}
