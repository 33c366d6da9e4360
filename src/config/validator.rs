use std::time::Duration;

use crate::error::{AppError, Result};

use super::{Config, RateLimitConfig};

/// Validate a full configuration and surface every problem at once.
pub fn validate_config(config: &Config) -> Result<()> {
    let mut issues = Vec::new();

    check_rate_limit(&config.rate_limit, &mut issues);

    let base_url = config.provider.base_url.trim();
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        issues.push(format!(
            "base_url `{}` must start with http:// or https://",
            config.provider.base_url
        ));
    }
    if config.provider.timeout.is_zero() {
        issues.push("timeout must be greater than zero".to_string());
    }

    finish(issues)
}

pub fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<()> {
    let mut issues = Vec::new();
    check_rate_limit(rate_limit, &mut issues);
    finish(issues)
}

fn check_rate_limit(rate_limit: &RateLimitConfig, issues: &mut Vec<String>) {
    if rate_limit.max_requests == 0 {
        issues.push("rate_limit.max_requests must be at least 1".to_string());
    }
    if rate_limit.window == Duration::ZERO {
        issues.push("rate_limit.window must be greater than zero".to_string());
    }
}

fn finish(issues: Vec<String>) -> Result<()> {
    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::config(format!(
            "\n  - {}",
            issues.join("\n  - ")
        )))
    }
}
