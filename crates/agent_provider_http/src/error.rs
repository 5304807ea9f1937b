use agent_provider::ProviderError;
use reqwest::StatusCode;
use serde_json::Value;

use crate::transport::HttpResponse;

/// Maps a failed exchange (or a success carrying an error payload) to a
/// `ProviderError` that keeps the raw body.
pub(crate) fn error_from_response(response: &HttpResponse) -> ProviderError {
    let raw = serde_json::from_str::<Value>(&response.body).ok();
    let message = raw
        .as_ref()
        .and_then(error_message_from_payload)
        .unwrap_or_else(|| fallback_message(response));

    ProviderError::new(message)
        .with_status(response.status)
        .with_raw(raw.unwrap_or_else(|| Value::String(response.body.clone())))
}

/// Extracts the message of an API error payload.
///
/// Understands `{"type":"error","error":{"type","message"}}` and
/// `{"error":"message"}`.
pub(crate) fn error_message_from_payload(payload: &Value) -> Option<String> {
    match payload.get("error")? {
        Value::String(message) => non_empty(message),
        Value::Object(error) => {
            let message = error.get("message").and_then(Value::as_str).and_then(non_empty);
            let kind = error.get("type").and_then(Value::as_str).and_then(non_empty);
            match (kind, message) {
                (Some(kind), Some(message)) => Some(format!("{kind}: {message}")),
                (None, Some(message)) => Some(message),
                (Some(kind), None) => Some(kind),
                (None, None) => None,
            }
        }
        _ => None,
    }
}

fn fallback_message(response: &HttpResponse) -> String {
    let body = response.body.trim();
    if !body.is_empty() {
        return body.to_string();
    }

    StatusCode::from_u16(response.status)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("request failed")
        .to_string()
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
