//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag)
//! 2. `~/.pictor/config.toml` (user)
//! 3. `/etc/pictor/config.toml` (system)
//!
//! Every section and key is optional; missing values take the defaults of
//! the corresponding component config.
//!
//! Secrets are loaded separately with mandatory permission checks:
//! 1. `~/.pictor/secrets.toml` (user, must be 0600)
//! 2. `/etc/pictor/secrets.toml` (system, must be 0600)
//!
//! ```toml
//! [limits]
//! max_requests_per_minute = 5
//! max_requests_per_day = 50
//! cooldown_period_secs = 3600
//!
//! [cache]
//! max_size = 100
//! ttl_secs = 3600
//!
//! [generation]
//! max_retry_attempts = 3
//! retry_base_delay_ms = 1000
//! backend_timeout_secs = 300
//!
//! [generation.defaults]
//! quality = "standard"
//!
//! [backend]
//! model = "dall-e-3"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::coordinator::{Pictor, PictorBuilder};
use crate::limiter::RateLimitConfig;
use crate::providers::RetryConfig;
use crate::types::GenerationParams;
use crate::validation::ValidationRules;
use crate::{PictorError, Result};

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub validation: ValidationRules,
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Rate limits (`[limits]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Requests per user per minute (default: 5).
    pub max_requests_per_minute: u32,
    /// Requests per user per day (default: 50).
    pub max_requests_per_day: u32,
    /// Block length after a limit is crossed, in seconds (default: 3600).
    pub cooldown_period_secs: u64,
    /// Period of the idle-state sweep, in seconds (default: 300).
    pub sweep_interval_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            max_requests_per_minute: defaults.max_requests_per_minute,
            max_requests_per_day: defaults.max_requests_per_day,
            cooldown_period_secs: defaults.cooldown.as_secs(),
            sweep_interval_secs: defaults.sweep_interval.as_secs(),
        }
    }
}

/// Result cache (`[cache]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Maximum cached results (default: 100).
    pub max_size: usize,
    /// Result lifetime in seconds (default: 3600).
    pub ttl_secs: u64,
    /// Period of the expiry sweep, in seconds (default: 300).
    pub cleanup_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            max_size: defaults.max_size,
            ttl_secs: defaults.ttl.as_secs(),
            cleanup_interval_secs: defaults.cleanup_interval.as_secs(),
        }
    }
}

/// Backend call policy (`[generation]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Attempts per generation, first call included (default: 3).
    pub max_retry_attempts: u32,
    /// Delay before the first retry, in milliseconds (default: 1000).
    pub retry_base_delay_ms: u64,
    /// Upper bound for any retry delay, in milliseconds (default: 60000).
    pub retry_max_delay_ms: u64,
    /// Hard deadline per backend attempt, in seconds (default: 300).
    pub backend_timeout_secs: u64,
    /// Parameters applied to requests that do not set them.
    pub defaults: GenerationParams,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_retry_attempts: retry.max_attempts,
            retry_base_delay_ms: retry.initial_delay.as_millis() as u64,
            retry_max_delay_ms: retry.max_delay.as_millis() as u64,
            backend_timeout_secs: 300,
            defaults: GenerationParams::new(),
        }
    }
}

/// Hosted backend settings (`[backend]`). The API key lives in secrets.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
    /// API base URL (default: the OpenAI API).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Default image size, `WIDTHxHEIGHT`.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub quality: Option<String>,
}

/// Secrets configuration (API keys).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Secrets {
    #[serde(default)]
    pub backend: Option<ApiKeySecret>,
}

/// A single API key secret.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeySecret {
    pub api_key: String,
}

/// Environment variables consulted, in order, when no key is on file.
const API_KEY_ENV_VARS: &[&str] = &["PICTOR_API_KEY", "OPENAI_API_KEY"];

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.pictor/config.toml`
    /// 3. `/etc/pictor/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    /// Load and validate a specific config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PictorError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            PictorError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but falls back to defaults when no path
    /// is given and no config file exists in the standard locations.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        if explicit_path.is_none() && Self::find_standard_path().is_none() {
            return Ok(Self::default());
        }
        Self::load(explicit_path)
    }

    /// Resolve the config file path.
    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(PictorError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        Self::find_standard_path().ok_or_else(|| {
            PictorError::Configuration(
                "No config file found. Create ~/.pictor/config.toml or /etc/pictor/config.toml"
                    .to_string(),
            )
        })
    }

    fn find_standard_path() -> Option<PathBuf> {
        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".pictor").join("config.toml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/pictor/config.toml");
        system_config.exists().then_some(system_config)
    }

    /// Check every section the way the builder would.
    pub fn validate(&self) -> Result<()> {
        self.rate_limits().validate()?;
        self.cache_config().validate()?;
        self.retry().validate()?;
        self.validation.validate()?;
        if self.generation.backend_timeout_secs == 0 {
            return Err(PictorError::Configuration(
                "backend_timeout_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rate_limits(&self) -> RateLimitConfig {
        RateLimitConfig::new()
            .per_minute(self.limits.max_requests_per_minute)
            .per_day(self.limits.max_requests_per_day)
            .cooldown(Duration::from_secs(self.limits.cooldown_period_secs))
            .sweep_interval(Duration::from_secs(self.limits.sweep_interval_secs))
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .max_size(self.cache.max_size)
            .ttl(Duration::from_secs(self.cache.ttl_secs))
            .cleanup_interval(Duration::from_secs(self.cache.cleanup_interval_secs))
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new()
            .max_attempts(self.generation.max_retry_attempts)
            .initial_delay(Duration::from_millis(self.generation.retry_base_delay_ms))
            .max_delay(Duration::from_millis(self.generation.retry_max_delay_ms))
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.generation.backend_timeout_secs)
    }

    /// A coordinator builder with every setting from this file applied.
    ///
    /// The backend is left to the caller.
    pub fn builder(&self) -> PictorBuilder {
        Pictor::builder()
            .rate_limits(self.rate_limits())
            .cache(self.cache_config())
            .retry(self.retry())
            .backend_timeout(self.backend_timeout())
            .validation(self.validation.clone())
            .defaults(self.generation.defaults.clone())
    }

    /// Build the hosted backend from `[backend]` and the API key in `secrets`.
    #[cfg(feature = "openai")]
    pub fn openai_backend(&self, secrets: &Secrets) -> Result<crate::OpenAiImageBackend> {
        let api_key = secrets.api_key().ok_or_else(|| {
            PictorError::Configuration(format!(
                "No API key found. Set [backend] api_key in secrets.toml or {}",
                API_KEY_ENV_VARS.join(" / ")
            ))
        })?;
        let mut backend = match &self.backend.base_url {
            Some(url) => crate::OpenAiImageBackend::with_base_url(api_key, url),
            None => crate::OpenAiImageBackend::new(api_key),
        };
        if let Some(model) = &self.backend.model {
            backend = backend.model(model);
        }
        if let Some(size) = &self.backend.size {
            backend = backend.size(size);
        }
        if let Some(quality) = &self.backend.quality {
            backend = backend.quality(quality);
        }
        Ok(backend)
    }
}

impl Secrets {
    /// Load secrets from the standard locations with permission checks.
    ///
    /// Resolution order:
    /// 1. `~/.pictor/secrets.toml` (if exists, must be 0600)
    /// 2. `/etc/pictor/secrets.toml` (if exists, must be 0600)
    ///
    /// Returns empty secrets if no file exists (the key may come from env vars).
    pub fn load() -> Result<Self> {
        // Try user secrets first
        if let Some(home) = dirs::home_dir() {
            let user_secrets = home.join(".pictor").join("secrets.toml");
            if user_secrets.exists() {
                return Self::load_from_file(&user_secrets);
            }
        }

        // Try system secrets
        let system_secrets = PathBuf::from("/etc/pictor/secrets.toml");
        if system_secrets.exists() {
            return Self::load_from_file(&system_secrets);
        }

        Ok(Secrets::default())
    }

    /// Load a specific secrets file, rejecting group/world-readable files.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        Self::check_permissions(path)?;
        let content = fs::read_to_string(path).map_err(|e| {
            PictorError::Configuration(format!("Failed to read secrets file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            PictorError::Configuration(format!("Failed to parse secrets file {path:?}: {e}"))
        })
    }

    /// Check that the secrets file has secure permissions (0600 or 0400).
    #[cfg(unix)]
    fn check_permissions(path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path).map_err(|e| {
            PictorError::Configuration(format!("Failed to stat secrets file {path:?}: {e}"))
        })?;

        let mode = metadata.permissions().mode();
        // Reject if group or other bits are set
        if mode & 0o077 != 0 {
            return Err(PictorError::Configuration(format!(
                "Secrets file {path:?} has insecure permissions {:o}. Must be 0600 or 0400.",
                mode & 0o777
            )));
        }

        Ok(())
    }

    #[cfg(not(unix))]
    fn check_permissions(_path: &Path) -> Result<()> {
        Ok(())
    }

    /// API key from the secrets file, falling back to `PICTOR_API_KEY`
    /// then `OPENAI_API_KEY`.
    pub fn api_key(&self) -> Option<String> {
        self.resolve_api_key(|name| std::env::var(name).ok())
    }

    fn resolve_api_key(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        self.backend
            .as_ref()
            .map(|s| s.api_key.clone())
            .or_else(|| API_KEY_ENV_VARS.iter().find_map(|name| env(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_config_has_component_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.rate_limits(), RateLimitConfig::default());
        assert_eq!(config.cache_config(), CacheConfig::default());
        assert_eq!(config.retry(), RetryConfig::default());
        assert_eq!(config.backend_timeout(), Duration::from_secs(300));
        assert_eq!(config.validation, ValidationRules::default());
        assert!(config.generation.defaults.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [limits]
            max_requests_per_minute = 3
            max_requests_per_day = 20
            cooldown_period_secs = 600

            [cache]
            max_size = 10
            ttl_secs = 60

            [generation]
            max_retry_attempts = 5
            retry_base_delay_ms = 250
            backend_timeout_secs = 30

            [generation.defaults]
            steps = 30
            quality = "hd"

            [validation]
            max_length = 200
            forbidden_words = ["gore"]

            [backend]
            base_url = "http://localhost:8080"
            model = "gpt-image-1"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());

        let limits = config.rate_limits();
        assert_eq!(limits.max_requests_per_minute, 3);
        assert_eq!(limits.max_requests_per_day, 20);
        assert_eq!(limits.cooldown, Duration::from_secs(600));
        // Defaults preserved
        assert_eq!(limits.sweep_interval, Duration::from_secs(300));

        assert_eq!(config.cache_config().max_size, 10);
        assert_eq!(config.retry().max_attempts, 5);
        assert_eq!(config.retry().initial_delay, Duration::from_millis(250));
        assert_eq!(config.backend_timeout(), Duration::from_secs(30));
        assert_eq!(config.generation.defaults.get_u64("steps"), Some(30));
        assert_eq!(config.generation.defaults.get_str("quality"), Some("hd"));
        assert_eq!(config.validation.min_length, 3);
        assert_eq!(config.validation.forbidden_words, vec!["gore".to_string()]);
        assert_eq!(config.backend.model.as_deref(), Some("gpt-image-1"));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let config: Config = toml::from_str("[cache]\nmax_size = 0").unwrap();
        assert!(matches!(config.validate(), Err(PictorError::Configuration(_))));

        let config: Config = toml::from_str("[generation]\nbackend_timeout_secs = 0").unwrap();
        assert!(config.validate().is_err());

        let config: Config = toml::from_str("[generation]\nretry_max_delay_ms = 0").unwrap();
        assert!(matches!(config.validate(), Err(PictorError::Configuration(_))));
    }

    #[test]
    fn config_not_found_returns_error() {
        let result = Config::load(Some(Path::new("/nonexistent/config.toml")));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Config file not found"));
    }

    #[test]
    fn load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\nmax_requests_per_minute = 9").unwrap();
        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.limits.max_requests_per_minute, 9);
    }

    #[test]
    fn parse_secrets() {
        let secrets: Secrets = toml::from_str("[backend]\napi_key = \"sk-test\"").unwrap();
        assert_eq!(secrets.backend.unwrap().api_key, "sk-test");
    }

    #[test]
    fn api_key_prefers_file_then_env_order() {
        let env = |name: &str| match name {
            "OPENAI_API_KEY" => Some("from-openai-env".to_string()),
            _ => None,
        };
        assert_eq!(
            Secrets::default().resolve_api_key(env),
            Some("from-openai-env".to_string())
        );

        let secrets = Secrets {
            backend: Some(ApiKeySecret {
                api_key: "from-file".to_string(),
            }),
        };
        assert_eq!(secrets.resolve_api_key(env), Some("from-file".to_string()));
        assert_eq!(Secrets::default().resolve_api_key(|_| None), None);
    }

    #[cfg(unix)]
    #[test]
    fn secrets_permissions_are_enforced() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backend]\napi_key = \"sk-test\"").unwrap();

        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o644)).unwrap();
        let err = Secrets::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("insecure permissions"));

        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600)).unwrap();
        let secrets = Secrets::load_from_file(file.path()).unwrap();
        assert_eq!(secrets.api_key(), Some("sk-test".to_string()));
    }
}
