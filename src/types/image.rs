//! Generated image payload.

use std::sync::Arc;

/// Result of a successful generation.
///
/// Image bytes are reference counted: every waiter on a shared request and
/// every cache hit gets a cheap clone of the same buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// Encoded image bytes.
    pub data: Arc<[u8]>,
    /// MIME type of `data` (e.g. `image/png`).
    pub content_type: String,
    /// Prompt as rewritten by the backend, when it reports one.
    pub revised_prompt: Option<String>,
}

impl GeneratedImage {
    pub fn new(data: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            data: Arc::from(data.into()),
            content_type: content_type.into(),
            revised_prompt: None,
        }
    }

    pub fn with_revised_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.revised_prompt = Some(prompt.into());
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
