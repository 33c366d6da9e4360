use serde_json::Value;

use crate::error::{ClassifiedError, ErrorKind};

use super::classify::{classify_body_status, malformed_body, ProviderEnvelope};

/// Outcome signalled by the `status` field of a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStatus {
    Ok,
    /// Success, but the provider is serving delayed data for this plan.
    Delayed,
}

/// Parse `body`, check its `status` field and hand back the `results` rows.
///
/// A missing or `null` `results` field is an empty result, not an error.
pub(crate) fn split_results(body: &str) -> Result<(Value, BodyStatus, Vec<Value>), ClassifiedError> {
    let mut root: Value = serde_json::from_str(body).map_err(|err| malformed_body(&err))?;
    if !root.is_object() {
        return Err(ClassifiedError::new(
            ErrorKind::ApiError,
            "Unexpected response from market data provider: body is not a JSON object",
        ));
    }

    let status = body_status(&root)?;
    let rows = match root.get_mut("results").map(Value::take) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(rows)) => rows,
        Some(other) => {
            return Err(ClassifiedError::new(
                ErrorKind::ApiError,
                format!("Unexpected `results` field in provider response: {other}"),
            ))
        }
    };

    Ok((root, status, rows))
}

fn body_status(root: &Value) -> Result<BodyStatus, ClassifiedError> {
    let Some(status) = root.get("status").and_then(Value::as_str) else {
        return Ok(BodyStatus::Ok);
    };

    if status.eq_ignore_ascii_case("OK") {
        Ok(BodyStatus::Ok)
    } else if status.eq_ignore_ascii_case("DELAYED") {
        Ok(BodyStatus::Delayed)
    } else {
        let envelope: ProviderEnvelope =
            serde_json::from_value(root.clone()).unwrap_or_default();
        Err(classify_body_status(status, &envelope))
    }
}
