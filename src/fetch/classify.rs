//! Maps provider and transport failures onto [`ErrorKind`].

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::error::{ClassifiedError, ErrorKind};

/// Error fields the provider includes in failing (and some succeeding) bodies.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ProviderEnvelope {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

impl ProviderEnvelope {
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    fn reason(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
    }
}

pub fn classify_transport(err: reqwest::Error) -> ClassifiedError {
    let err = err.without_url();
    let message = if err.is_timeout() {
        "Request to market data provider timed out".to_string()
    } else if err.is_connect() {
        "Could not connect to market data provider".to_string()
    } else {
        format!("Network request failed: {err}")
    };

    ClassifiedError::new(ErrorKind::NetworkError, message).with_details(json!({
        "timeout": err.is_timeout(),
        "cause": err.to_string(),
    }))
}

pub fn classify_status(status: StatusCode, body: &str) -> ClassifiedError {
    let envelope = ProviderEnvelope::parse(body);
    let kind = match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimit,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::Unauthorized,
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        _ => ErrorKind::ApiError,
    };

    let message = envelope
        .reason()
        .map(str::to_string)
        .unwrap_or_else(|| default_message(kind, status));

    ClassifiedError::new(kind, message).with_details(json!({
        "http_status": status.as_u16(),
        "provider_status": envelope.status,
        "request_id": envelope.request_id,
    }))
}

/// Classify a 2xx body whose `status` field reports a failure.
pub(crate) fn classify_body_status(status: &str, envelope: &ProviderEnvelope) -> ClassifiedError {
    let kind = if status.eq_ignore_ascii_case("NOT_FOUND") {
        ErrorKind::NotFound
    } else {
        ErrorKind::ApiError
    };

    let message = envelope
        .reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("Provider reported status {status}"));

    ClassifiedError::new(kind, message).with_details(json!({
        "provider_status": status,
        "request_id": envelope.request_id,
    }))
}

pub fn malformed_body(err: &serde_json::Error) -> ClassifiedError {
    ClassifiedError::new(
        ErrorKind::ApiError,
        format!("Unexpected response from market data provider: {err}"),
    )
}

fn default_message(kind: ErrorKind, status: StatusCode) -> String {
    match kind {
        ErrorKind::RateLimit => "API rate limit exceeded; wait before retrying".to_string(),
        ErrorKind::Unauthorized => "Invalid or missing API key".to_string(),
        ErrorKind::NotFound => "Ticker or resource not found".to_string(),
        _ => format!("Request failed with status {status}"),
    }
}
