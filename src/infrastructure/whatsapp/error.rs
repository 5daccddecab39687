//! Calling API errors

use serde::Deserialize;
use thiserror::Error;

/// Structured error returned by the Graph API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: u16,
    pub code: i64,
    pub message: String,
    pub user_message: Option<String>,
    pub details: Option<String>,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "API error {}: {}", self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, " - Details: {}", details)?;
        }
        if let Some(user_message) = &self.user_message {
            write!(f, " - {}", user_message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    Api(ApiError),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Text recorded on the call log when this error fails a call
    pub fn failure_reason(&self) -> String {
        match self {
            ProviderError::Api(api) => api.user_message.clone().unwrap_or_else(|| api.message.clone()),
            other => other.to_string(),
        }
    }

    pub fn api_code(&self) -> Option<i64> {
        match self {
            ProviderError::Api(api) => Some(api.code),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
    #[serde(default)]
    error_user_msg: Option<String>,
    #[serde(default)]
    error_data: Option<ErrorData>,
}

#[derive(Debug, Deserialize)]
struct ErrorData {
    #[serde(default)]
    details: Option<String>,
}

/// Decode a non-success response body.
///
/// Bodies that don't carry a Graph error object are kept verbatim as the message.
pub fn parse_api_error(status: u16, body: &str) -> ApiError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.error.message.is_empty() => ApiError {
            status,
            code: envelope.error.code,
            message: envelope.error.message,
            user_message: envelope.error.error_user_msg.filter(|m| !m.is_empty()),
            details: envelope
                .error
                .error_data
                .and_then(|d| d.details)
                .filter(|d| !d.is_empty()),
        },
        _ => ApiError {
            status,
            code: i64::from(status),
            message: format!("API returned status {}: {}", status, body),
            user_message: None,
            details: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_graph_error() {
        let body = r#"{"error":{"message":"Invalid parameter","type":"OAuthException","code":100,
            "error_subcode":2494010,"error_user_title":"Call failed","error_user_msg":"User is not reachable",
            "error_data":{"details":"call_id does not exist"}}}"#;
        let err = parse_api_error(400, body);
        assert_eq!(err.code, 100);
        assert_eq!(err.message, "Invalid parameter");
        assert_eq!(err.user_message.as_deref(), Some("User is not reachable"));
        assert_eq!(err.details.as_deref(), Some("call_id does not exist"));
        assert_eq!(
            err.to_string(),
            "API error 100: Invalid parameter - Details: call_id does not exist - User is not reachable"
        );

        let provider = ProviderError::Api(err);
        assert_eq!(provider.failure_reason(), "User is not reachable");
        assert_eq!(provider.api_code(), Some(100));
    }

    #[test]
    fn test_parse_non_graph_body() {
        let err = parse_api_error(502, "Bad Gateway");
        assert_eq!(err.code, 502);
        assert_eq!(err.message, "API returned status 502: Bad Gateway");
        assert!(err.user_message.is_none());
        assert_eq!(ProviderError::Api(err).failure_reason(), "API returned status 502: Bad Gateway");
    }
}
