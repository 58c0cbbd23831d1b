//! Shared error types.

use serde::Deserialize;
use thiserror::Error;

/// Why an inbound push frame was dropped.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`{0}` frame has no snapshot")]
    MissingSnapshot(&'static str),
    #[error("`{0}` frame has no poll_id")]
    MissingPollId(&'static str),
    #[error("snapshot does not match the poll schema: {0}")]
    Schema(String),
}

/// Error body returned by the API, e.g. `{"detail": "Poll not found"}`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub detail: serde_json::Value,
}

/// Attempt to parse an error body into a user-facing message.
/// Validation errors carry a list in `detail`; those are rendered as JSON.
pub fn try_error_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok()?;
    match parsed.detail {
        serde_json::Value::String(detail) if !detail.trim().is_empty() => Some(detail),
        serde_json::Value::Null => None,
        serde_json::Value::String(_) => None,
        other => Some(other.to_string()),
    }
}

/// API error type for client-side use
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
    #[error("Invalid request: {0}")]
    Invalid(String),
}

impl ApiError {
    /// Message suitable for showing next to the failed action.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { status, body } => {
                try_error_detail(body).unwrap_or_else(|| format!("HTTP {status}"))
            }
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_is_preferred_for_http_errors() {
        let err = ApiError::Http {
            status: 400,
            body: r#"{"detail":"Poll expiry cannot exceed 1 day (86400 seconds)"}"#.into(),
        };
        assert_eq!(
            err.user_message(),
            "Poll expiry cannot exceed 1 day (86400 seconds)"
        );

        let opaque = ApiError::Http {
            status: 502,
            body: "<html>bad gateway</html>".into(),
        };
        assert_eq!(opaque.user_message(), "HTTP 502");
    }
}
