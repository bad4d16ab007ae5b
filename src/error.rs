use thiserror::Error;

/// Error type for calls to external HTTP providers (market data, generation).
///
/// Every external dependency maps its failures into this taxonomy so the
/// retry loops and rate limiters can classify them uniformly.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Whether the in-stage retry loop should retry this call.
    ///
    /// Connection failures (timeouts, resets, 5xx) and rate limits are
    /// transient; parse and request errors will not improve on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Connection(_) | ApiError::RateLimited(_))
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Connection(_) => "connection_error",
            ApiError::RateLimited(_) => "rate_limit",
            ApiError::Parse(_) => "parse_error",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// HTTP-style status hint used when recording the failure against a
    /// rate limiter (429 drives adaptive backoff).
    pub fn status_hint(&self) -> Option<u16> {
        match self {
            ApiError::RateLimited(_) => Some(429),
            ApiError::Connection(_) => Some(503),
            ApiError::Internal(_) => Some(500),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Connection("request timed out".to_string())
        } else if err.is_connect() {
            ApiError::Connection("failed to connect to upstream service".to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                429 => ApiError::RateLimited(
                    "too many requests to upstream service".to_string(),
                ),
                403 => ApiError::Connection(
                    "request rejected by upstream firewall".to_string(),
                ),
                500..=599 => ApiError::Connection(format!(
                    "upstream server error (HTTP {})",
                    status.as_u16()
                )),
                _ => ApiError::Internal(format!("HTTP error: {}", status)),
            }
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(format!("JSON parsing failed: {}", err))
    }
}
