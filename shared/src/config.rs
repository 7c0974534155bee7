use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::container::DEFAULT_TRANSITION_BUFFER;

// =============================================================================
// Constants
// =============================================================================

pub const ENV_API_URL: &str = "MANGROVE_API_URL";
pub const ENV_ML_URL: &str = "MANGROVE_ML_URL";
pub const ENV_TIMEOUT_SECS: &str = "MANGROVE_TIMEOUT_SECS";
pub const ENV_MODEL_PATH: &str = "MANGROVE_MODEL_PATH";

pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";
pub const DEFAULT_ML_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
/// Remote inference uploads a photo and runs a model; give it longer.
pub const DEFAULT_PREDICTION_TIMEOUT_MS: u64 = 60_000;
pub const MAX_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_LEADERBOARD_LIMIT: u32 = 50;
pub const MAX_LEADERBOARD_LIMIT: u32 = 500;
pub const DEFAULT_MANGROVE_THRESHOLD: f32 = 0.5;
pub const MAX_URL_LENGTH: usize = 2048;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

// =============================================================================
// BaseUrl
// =============================================================================

/// An http(s) base URL with a host and no embedded credentials.
///
/// Stored without a trailing slash so endpoint paths can be appended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BaseUrl(String);

impl BaseUrl {
    pub fn new(url: impl Into<String>) -> Result<Self, ConfigError> {
        let url = url.into();
        let trimmed = url.trim();

        if trimmed.is_empty() {
            return Err(invalid_url(&url, "URL cannot be empty"));
        }
        if trimmed.len() > MAX_URL_LENGTH {
            return Err(invalid_url(
                &url,
                format!("URL exceeds maximum length of {MAX_URL_LENGTH} bytes"),
            ));
        }

        let parsed = Url::parse(trimmed).map_err(|e| invalid_url(&url, e.to_string()))?;

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(invalid_url(
                &url,
                format!("invalid scheme '{scheme}', only 'http' and 'https' are allowed"),
            ));
        }
        if parsed.host_str().is_none() {
            return Err(invalid_url(&url, "URL must have a host"));
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(invalid_url(&url, "credentials in URL are not allowed"));
        }
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(invalid_url(&url, "base URL cannot carry a query or fragment"));
        }

        Ok(Self(parsed.as_str().trim_end_matches('/').to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `path` is appended verbatim; it should start with `/`.
    #[must_use]
    pub fn join(&self, path: &str) -> String {
        format!("{}{}", self.0, path)
    }
}

impl TryFrom<String> for BaseUrl {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<BaseUrl> for String {
    fn from(value: BaseUrl) -> Self {
        value.0
    }
}

fn invalid_url(url: &str, reason: impl Into<String>) -> ConfigError {
    let url = if url.len() <= 100 {
        url.to_owned()
    } else {
        // Cut on a char boundary.
        let cut = (0..=100).rev().find(|i| url.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &url[..cut])
    };
    ConfigError::InvalidUrl {
        url,
        reason: reason.into(),
    }
}

// =============================================================================
// ClientConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: BaseUrl,
    pub prediction_base_url: BaseUrl,
    pub request_timeout_ms: u64,
    pub prediction_timeout_ms: u64,
    pub leaderboard_limit: u32,
    /// ONNX model for on-device analysis. `None` disables the local path.
    pub model_path: Option<PathBuf>,
    pub mangrove_threshold: f32,
    pub transition_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: BaseUrl(DEFAULT_API_URL.to_owned()),
            prediction_base_url: BaseUrl(DEFAULT_ML_URL.to_owned()),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            prediction_timeout_ms: DEFAULT_PREDICTION_TIMEOUT_MS,
            leaderboard_limit: DEFAULT_LEADERBOARD_LIMIT,
            model_path: None,
            mangrove_threshold: DEFAULT_MANGROVE_THRESHOLD,
            transition_buffer: DEFAULT_TRANSITION_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `MANGROVE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_API_URL) {
            config.api_base_url = BaseUrl::new(url)?;
        }
        if let Some(url) = lookup(ENV_ML_URL) {
            config.prediction_base_url = BaseUrl::new(url)?;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            let secs: u64 = secs.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: format!("{ENV_TIMEOUT_SECS} must be a whole number of seconds"),
            })?;
            config.request_timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(path) = lookup(ENV_MODEL_PATH).filter(|p| !p.trim().is_empty()) {
            config.model_path = Some(PathBuf::from(path));
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Deserialized values bypass BaseUrl::new's trimming; re-check them.
        BaseUrl::new(self.api_base_url.as_str())?;
        BaseUrl::new(self.prediction_base_url.as_str())?;

        for (field, value) in [
            ("request_timeout_ms", self.request_timeout_ms),
            ("prediction_timeout_ms", self.prediction_timeout_ms),
        ] {
            if value == 0 || value > MAX_TIMEOUT_MS {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("must be between 1 and {MAX_TIMEOUT_MS}"),
                });
            }
        }
        if self.leaderboard_limit == 0 || self.leaderboard_limit > MAX_LEADERBOARD_LIMIT {
            return Err(ConfigError::InvalidValue {
                field: "leaderboard_limit",
                reason: format!("must be between 1 and {MAX_LEADERBOARD_LIMIT}"),
            });
        }
        if !(0.0..=1.0).contains(&self.mangrove_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "mangrove_threshold",
                reason: "must be within [0, 1]".into(),
            });
        }
        if self.transition_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "transition_buffer",
                reason: "must be > 0".into(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub const fn prediction_timeout(&self) -> Duration {
        Duration::from_millis(self.prediction_timeout_ms)
    }
}
