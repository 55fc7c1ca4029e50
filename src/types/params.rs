//! Generation parameters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters forwarded to the image backend alongside the prompt.
///
/// Backed by a `BTreeMap`, so two parameter sets with the same entries are
/// equal (and fingerprint identically) regardless of insertion order.
///
/// ```rust
/// # use pictor::GenerationParams;
/// let params = GenerationParams::new()
///     .model("flux")
///     .steps(30)
///     .cfg_scale(7.5)
///     .size(512, 512);
/// assert_eq!(params.get_u64("width"), Some(512));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationParams(BTreeMap<String, Value>);

impl GenerationParams {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an arbitrary parameter.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert an arbitrary parameter in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Set the model identifier.
    pub fn model(self, model: impl Into<String>) -> Self {
        self.set("model", model.into())
    }

    /// Set the number of inference steps.
    pub fn steps(self, steps: u32) -> Self {
        self.set("steps", steps)
    }

    /// Set the classifier-free guidance scale.
    pub fn cfg_scale(self, scale: f64) -> Self {
        self.set("cfg_scale", scale)
    }

    /// Set output width and height in pixels.
    pub fn size(self, width: u32, height: u32) -> Self {
        self.set("width", width).set("height", height)
    }

    /// Set the negative prompt.
    pub fn negative_prompt(self, prompt: impl Into<String>) -> Self {
        self.set("negative_prompt", prompt.into())
    }

    /// Set the quality tier understood by hosted APIs (e.g. `"standard"`, `"hd"`).
    pub fn quality(self, quality: impl Into<String>) -> Self {
        self.set("quality", quality.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fill every key missing from `self` with the value from `defaults`.
    ///
    /// Explicit values win. The result is what gets fingerprinted and sent
    /// to the backend, so spelling out a default and omitting it are the
    /// same request.
    pub fn merged_over(&self, defaults: &GenerationParams) -> GenerationParams {
        let mut merged = defaults.0.clone();
        merged.extend(self.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        GenerationParams(merged)
    }

    /// Canonical JSON text of the parameters.
    ///
    /// Keys are sorted, and floats with no fractional part are written as
    /// integers so `30` and `30.0` agree.
    pub(crate) fn canonical_json(&self) -> String {
        let map: serde_json::Map<String, Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), canonical_value(v)))
            .collect();
        Value::Object(map).to_string()
    }
}

impl FromIterator<(String, Value)> for GenerationParams {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::from(f as i64),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonical_value(v)))
                .collect(),
        ),
        _ => value.clone(),
    }
}
