//! Error types for the Tradera client.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.

use std::time::Duration;

use crate::middleware::RetryError;

/// Raised when a caller-supplied cancellation token fires while the client is
/// suspended.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    /// Cancelled while waiting on the rate limiter, before any attempt was made.
    #[error("cancelled while waiting for a rate limit token")]
    Admission,

    /// Cancelled before the retry loop made its first attempt.
    #[error("cancelled before the first attempt")]
    BeforeAttempt,

    /// Cancelled while sleeping between retries.
    #[error("cancelled during retry backoff after {attempts} attempt(s)")]
    Backoff {
        /// Attempts completed before the cancellation.
        attempts: u32,
    },
}

/// Errors from the client layer.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// Transport failure (connection, DNS, TLS, broken body, etc.)
    #[error("network error during {op}: {source}")]
    Network {
        /// Operation that failed
        op: String,
        /// Underlying error
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Rate limited by the Tradera API
    #[error("rate limit exceeded{}", .retry_after.map(|d| format!(", retry after {d:?}")).unwrap_or_default())]
    RateLimited {
        /// Suggested wait time before retry, if the server sent one
        retry_after: Option<Duration>,
    },

    /// Request timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Server error (5xx response) without a SOAP fault body
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },

    /// SOAP fault returned by the service (malformed or rejected request)
    #[error("SOAP fault [{code}]: {message}{}", .detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    SoapFault {
        /// `faultcode` element
        code: String,
        /// `faultstring` element
        message: String,
        /// `detail` element, if present
        detail: Option<String>,
    },

    /// Application-level error reported by the Tradera API
    #[error("tradera API error [{code}]: {message}{}", .details.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Api {
        /// Error code from the API
        code: String,
        /// Error message from the API
        message: String,
        /// Additional details, if available
        details: Option<String>,
    },

    /// Resource not found (404 response)
    #[error("resource not found: {resource}")]
    NotFound {
        /// Description of the missing resource
        resource: String,
    },

    /// Unexpected HTTP status
    #[error("unexpected status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },

    /// `app_id` is not set or invalid
    #[error("invalid or missing AppId")]
    InvalidAppId,

    /// `app_key` is not set or invalid
    #[error("invalid or missing AppKey")]
    InvalidAppKey,

    /// The service requires user authorization but none is configured
    #[error("user authentication required (user_id and token)")]
    AuthRequired,

    /// Invalid configuration value
    #[error("invalid configuration for '{field}': {message}")]
    InvalidConfig {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        message: String,
    },

    /// The caller cancelled the request while it was suspended
    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    /// Every attempt failed with a retryable error
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Total attempts made, including the first
        attempts: u32,
        /// Error returned by the last attempt
        #[source]
        source: Box<ClientError>,
    },

    /// A resource was shut down twice
    #[error("{0} is already closed")]
    AlreadyClosed(&'static str),

    /// Any other error raised by binding code
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ClientError {
    /// Create a network error for the given operation.
    #[must_use]
    pub fn network(
        op: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Network { op: op.into(), source: source.into() }
    }

    /// Create a rate limited error with an optional retry-after hint in seconds.
    #[must_use]
    pub fn rate_limited(seconds: Option<u64>) -> Self {
        Self::RateLimited { retry_after: seconds.map(Duration::from_secs) }
    }

    /// Create a SOAP fault error.
    #[must_use]
    pub fn soap_fault(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SoapFault { code: code.into(), message: message.into(), detail: None }
    }

    /// Create an API error.
    #[must_use]
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api { code: code.into(), message: message.into(), details: None }
    }

    /// Create an API error with additional details.
    #[must_use]
    pub fn api_with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::Api { code: code.into(), message: message.into(), details: Some(details.into()) }
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// Create a server error.
    #[must_use]
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server { status, message: message.into() }
    }

    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig { field, message: message.into() }
    }

    /// Wrap an arbitrary binding-layer error. It is never retried.
    #[must_use]
    pub fn other(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(source.into())
    }

    /// Returns true if this error is retryable. See [`is_retryable`].
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Server { .. } | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }

    /// Returns true if the request was cancelled by the caller.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Get the retry-after duration if this is a rate limit error.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// The error of the final attempt, looking through [`ClientError::RetriesExhausted`].
    #[must_use]
    pub fn last_attempt(&self) -> &Self {
        match self {
            Self::RetriesExhausted { source, .. } => source.last_attempt(),
            other => other,
        }
    }
}

impl From<RetryError<Self>> for ClientError {
    fn from(err: RetryError<Self>) -> Self {
        match err {
            RetryError::Permanent { attempt, source } => {
                if attempt > 1 {
                    tracing::debug!(attempt, error = %source, "Non-retryable error after retries");
                }
                source
            }
            RetryError::Exhausted { attempts, source } => {
                Self::RetriesExhausted { attempts, source: Box::new(source) }
            }
            RetryError::Cancelled(cancelled) => Self::Cancelled(cancelled),
        }
    }
}

/// Classify an error for the retry policy.
///
/// Transport failures, remote rate limiting and timeouts are retryable.
/// SOAP faults, API errors and anything unrecognised are not.
#[must_use]
pub fn is_retryable(err: &ClientError) -> bool {
    err.is_retryable()
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_retryable() {
        assert!(is_retryable(&ClientError::network("GetItem", "connection reset")));
        assert!(is_retryable(&ClientError::rate_limited(Some(60))));
        assert!(is_retryable(&ClientError::Timeout(Duration::from_secs(30))));
        assert!(is_retryable(&ClientError::server(503, "Service Unavailable")));

        assert!(!is_retryable(&ClientError::soap_fault("soap:Client", "bad request")));
        assert!(!is_retryable(&ClientError::api("1001", "item not found")));
        assert!(!is_retryable(&ClientError::not_found("item 42")));
        assert!(!is_retryable(&ClientError::other("something odd")));
        assert!(!is_retryable(&ClientError::AuthRequired));
        assert!(!is_retryable(&ClientError::Cancelled(Cancelled::Admission)));
    }

    #[test]
    fn test_exhausted_is_terminal() {
        let err = ClientError::RetriesExhausted {
            attempts: 4,
            source: Box::new(ClientError::Timeout(Duration::from_secs(1))),
        };
        assert!(!err.is_retryable());
        assert!(matches!(err.last_attempt(), ClientError::Timeout(_)));
        assert!(err.to_string().contains("gave up after 4 attempts"));
    }

    #[test]
    fn test_client_error_retry_after() {
        let err = ClientError::rate_limited(Some(60));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
        assert_eq!(ClientError::rate_limited(None).retry_after(), None);
        assert_eq!(ClientError::not_found("item").retry_after(), None);
    }

    #[test]
    fn test_display_includes_optional_parts() {
        let err = ClientError::api_with_details("42", "Invalid item", "item is closed");
        assert_eq!(err.to_string(), "tradera API error [42]: Invalid item (item is closed)");

        let err = ClientError::soap_fault("soap:Server", "Object reference not set");
        assert_eq!(err.to_string(), "SOAP fault [soap:Server]: Object reference not set");
    }

    #[test]
    fn test_cancelled_is_distinguishable() {
        let err = ClientError::from(Cancelled::Backoff { attempts: 2 });
        assert!(err.is_cancelled());
        assert!(err.to_string().contains("backoff"));

        let err = ClientError::from(Cancelled::BeforeAttempt);
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "cancelled before the first attempt");
    }

    #[test]
    fn test_late_permanent_error_is_returned_unchanged() {
        let err = ClientError::from(RetryError::Permanent {
            attempt: 3,
            source: ClientError::soap_fault("soap:Client", "bad envelope"),
        });
        assert!(matches!(err, ClientError::SoapFault { .. }));
    }
}
