use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AppError, Context, Result};

use super::{validator, Config, ProviderConfig, RateLimitConfig};

/// Load a JSON configuration file. String values may reference `${VAR}` environment placeholders.
pub fn load_config_file(path: &Path) -> Result<Config> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read config JSON at {}", path.display()))?;

    let raw: RawConfig = serde_json::from_str(&json)
        .with_context(|| format!("failed to parse config JSON at {}", path.display()))?;

    let config = raw.into_config()?;
    validator::validate_config(&config)?;
    Ok(config)
}

/// Replace every `${NAME}` in `value` with the contents of the environment variable `NAME`.
pub fn expand_env_vars(value: &str) -> Result<String> {
    let mut expanded = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| AppError::config(format!("unterminated placeholder in `{value}`")))?;

        let name = after[..end].trim();
        if name.is_empty() {
            return Err(AppError::config(format!("empty placeholder in `{value}`")));
        }
        let resolved = std::env::var(name).map_err(|_| {
            AppError::config(format!("environment variable {name} used in config is not set"))
        })?;
        expanded.push_str(&resolved);
        rest = &after[end + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    rate_limit: Option<RawRateLimit>,
}

impl RawConfig {
    fn into_config(self) -> Result<Config> {
        let api_key = match self.api_key {
            Some(template) => expand_env_vars(&template)?,
            None => String::new(),
        };

        let mut provider = ProviderConfig::new(api_key);
        if let Some(base_url) = self.base_url {
            provider.base_url = expand_env_vars(&base_url)?;
        }
        if let Some(secs) = self.timeout_secs {
            provider.timeout = Duration::from_secs(secs);
        }

        let rate_limit = self
            .rate_limit
            .map(RawRateLimit::into_rate_limit)
            .unwrap_or_default();

        Ok(Config {
            provider,
            rate_limit,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawRateLimit {
    max_requests: usize,
    window_secs: u64,
}

impl RawRateLimit {
    fn into_rate_limit(self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.max_requests,
            window: Duration::from_secs(self.window_secs),
        }
    }
}
