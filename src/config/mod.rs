use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{AppError, Result};

pub mod loader;
pub mod validator;

pub use loader::{expand_env_vars, load_config_file};

pub const DEFAULT_BASE_URL: &str = "https://api.polygon.io";
/// Free-tier quota: five calls per rolling minute.
pub const DEFAULT_MAX_REQUESTS: usize = 5;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const API_KEY_VAR: &str = "POLYGON_API_KEY";
const BASE_URL_VAR: &str = "POLYGON_BASE_URL";
const MAX_REQUESTS_VAR: &str = "POLYGON_MAX_REQUESTS";
const WINDOW_SECS_VAR: &str = "POLYGON_WINDOW_SECS";
const TIMEOUT_SECS_VAR: &str = "POLYGON_TIMEOUT_SECS";

/// Sliding-window quota enforced by the request dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: usize, window: Duration) -> Result<Self> {
        let config = Self {
            max_requests,
            window,
        };
        validator::validate_rate_limit(&config)?;
        Ok(config)
    }

    pub fn free_tier() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window: DEFAULT_WINDOW,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::free_tier()
    }
}

#[derive(Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key_set", &!self.api_key.is_empty())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    pub rate_limit: RateLimitConfig,
}

impl Config {
    pub fn builtin(api_key: impl Into<String>) -> Self {
        Self {
            provider: ProviderConfig::new(api_key),
            rate_limit: RateLimitConfig::free_tier(),
        }
    }

    /// Build a configuration from `POLYGON_*` environment variables on top of the builtin defaults.
    ///
    /// A missing API key is not reported here; the data client refuses to start without one.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::builtin(std::env::var(API_KEY_VAR).unwrap_or_default());

        if let Some(base_url) = env_override(BASE_URL_VAR) {
            config.provider.base_url = base_url;
        }
        if let Some(raw) = env_override(TIMEOUT_SECS_VAR) {
            config.provider.timeout = Duration::from_secs(parse_env_number(TIMEOUT_SECS_VAR, &raw)?);
        }
        if let Some(raw) = env_override(MAX_REQUESTS_VAR) {
            config.rate_limit.max_requests = parse_env_number(MAX_REQUESTS_VAR, &raw)? as usize;
        }
        if let Some(raw) = env_override(WINDOW_SECS_VAR) {
            config.rate_limit.window = Duration::from_secs(parse_env_number(WINDOW_SECS_VAR, &raw)?);
        }

        validator::validate_config(&config)?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_config_file(path.as_ref())
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env_number(name: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>()
        .map_err(|_| AppError::config(format!("{name} must be a whole number, got `{raw}`")))
}
