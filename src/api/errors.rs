//! API error types for the scores REST client.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("HTTP error: {status_code} - {message}")]
    Http {
        status_code: u16,
        error_code: String,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limited (retry after {retry_after}s)")]
    RateLimited { retry_after: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl ApiError {
    /// Parse error from an API response body.
    ///
    /// The backend answers failures with `{"error": "<message>"}` or
    /// `{"error": {"code": .., "message": ..}}`; anything else is kept raw.
    pub fn from_response(status_code: u16, body: &str) -> Self {
        let (code, message) = match serde_json::from_str::<serde_json::Value>(body) {
            Ok(json) => {
                let error = json.get("error").unwrap_or(&json);
                match error {
                    serde_json::Value::String(message) => ("UNKNOWN".to_string(), message.clone()),
                    _ => (
                        error
                            .get("code")
                            .and_then(|v| v.as_str())
                            .unwrap_or("UNKNOWN")
                            .to_string(),
                        error
                            .get("message")
                            .and_then(|v| v.as_str())
                            .unwrap_or(body)
                            .to_string(),
                    ),
                }
            }
            Err(_) => ("UNKNOWN".to_string(), body.to_string()),
        };

        match status_code {
            401 | 403 => Self::Unauthorized(message),
            404 => Self::NotFound(message),
            429 => Self::RateLimited { retry_after: 1 },
            _ => Self::Http {
                status_code,
                error_code: code,
                message,
            },
        }
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Network(_)
                | Self::Timeout(_)
                | Self::Http {
                    status_code: 500..=599,
                    ..
                }
        )
    }
}
