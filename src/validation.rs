//! Structural checks on prompts and generation parameters.
//!
//! Validation runs after admission and before fingerprinting, so malformed
//! requests never reach the cache or the backend. Failures map to
//! [`PictorError::ValidationFailed`] and are never retried.

use serde::Deserialize;

use crate::types::GenerationParams;
use crate::{PictorError, Result};

/// Punctuation accepted in prompts besides ASCII letters, digits and whitespace.
const ALLOWED_PUNCTUATION: &str = "-_.,!?()'\"";

/// Prompt validation rules.
///
/// ```rust
/// # use pictor::ValidationRules;
/// let rules = ValidationRules::new()
///     .length(1, 200)
///     .forbid("gore");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ValidationRules {
    /// Minimum prompt length in characters, after trimming. Default: 3.
    pub min_length: usize,
    /// Maximum prompt length in characters, after trimming. Default: 500.
    pub max_length: usize,
    /// Case-insensitive substrings that make a prompt invalid.
    pub forbidden_words: Vec<String>,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_length: 3,
            max_length: 500,
            forbidden_words: vec!["hack".into(), "exploit".into(), "nsfw".into()],
        }
    }
}

impl ValidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn length(mut self, min: usize, max: usize) -> Self {
        self.min_length = min;
        self.max_length = max;
        self
    }

    pub fn forbid(mut self, word: impl Into<String>) -> Self {
        self.forbidden_words.push(word.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_length > self.max_length {
            return Err(PictorError::Configuration(format!(
                "validation min_length ({}) exceeds max_length ({})",
                self.min_length, self.max_length
            )));
        }
        Ok(())
    }
}

/// Validates prompts and parameter ranges against [`ValidationRules`].
#[derive(Debug, Clone)]
pub struct PromptValidator {
    rules: ValidationRules,
    forbidden_lower: Vec<String>,
}

impl PromptValidator {
    pub fn new(rules: ValidationRules) -> Self {
        let forbidden_lower = rules
            .forbidden_words
            .iter()
            .map(|w| w.to_lowercase())
            .collect();
        Self {
            rules,
            forbidden_lower,
        }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Check a prompt and return it trimmed.
    pub fn validate_prompt<'a>(&self, prompt: &'a str) -> Result<&'a str> {
        let prompt = prompt.trim();
        let len = prompt.chars().count();
        if len < self.rules.min_length || len > self.rules.max_length {
            return Err(PictorError::ValidationFailed(format!(
                "prompt length must be between {} and {} characters",
                self.rules.min_length, self.rules.max_length
            )));
        }

        if let Some(bad) = prompt.chars().find(|c| !is_allowed_char(*c)) {
            return Err(PictorError::ValidationFailed(format!(
                "prompt contains invalid character {bad:?}"
            )));
        }

        let lower = prompt.to_lowercase();
        if let Some(word) = self.forbidden_lower.iter().find(|w| lower.contains(w.as_str())) {
            return Err(PictorError::ValidationFailed(format!(
                "prompt contains forbidden word: {word}"
            )));
        }

        Ok(prompt)
    }

    /// Check numeric parameter ranges. Absent parameters are not checked.
    pub fn validate_params(&self, params: &GenerationParams) -> Result<()> {
        check_range(params, "steps", 1.0, 50.0)?;
        check_range(params, "cfg_scale", 1.0, 20.0)?;
        check_range(params, "width", 64.0, 1024.0)?;
        check_range(params, "height", 64.0, 1024.0)?;
        Ok(())
    }
}

impl Default for PromptValidator {
    fn default() -> Self {
        Self::new(ValidationRules::default())
    }
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c.is_whitespace() || ALLOWED_PUNCTUATION.contains(c)
}

fn check_range(params: &GenerationParams, key: &str, min: f64, max: f64) -> Result<()> {
    let Some(value) = params.get(key) else {
        return Ok(());
    };
    match value.as_f64() {
        Some(v) if (min..=max).contains(&v) => Ok(()),
        Some(_) => Err(PictorError::ValidationFailed(format!(
            "{key} must be between {min} and {max}"
        ))),
        None => Err(PictorError::ValidationFailed(format!(
            "{key} must be a number"
        ))),
    }
}
