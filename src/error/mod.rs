//! Pipeline Error Types
//!
//! Error hierarchy for the authenticated request pipeline, plus normalization
//! and message sanitization for surfacing errors to callers.

mod sanitize;

pub use sanitize::{sanitize_message, MAX_SANITIZED_MESSAGE_LEN};

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::types::Environment;

/// Root error type for the request pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("Refresh error: {0}")]
    Refresh(#[from] RefreshError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl PipelineError {
    /// Get error code for telemetry and normalized responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Token(TokenError::Missing) => "MISSING_TOKEN",
            Self::Token(TokenError::Malformed { .. }) => "MALFORMED_TOKEN",
            Self::Token(TokenError::Expired) => "EXPIRED_TOKEN",
            Self::Token(TokenError::MissingTenant) => "MISSING_GYM_ID",
            Self::Authorization(_) => "AUTHORIZATION_DENIED",
            Self::Refresh(RefreshError::TenantMismatch { .. }) => "GYM_ID_MISMATCH",
            Self::Refresh(_) => "REFRESH_FAILURE",
            Self::Network(NetworkError::RateLimited { .. }) => "RATE_LIMITED",
            Self::Network(_) => "NETWORK_ERROR",
            Self::Api(ApiError::Validation { .. }) => "VALIDATION_ERROR",
            Self::Api(ApiError::ServerError { .. }) => "SERVER_ERROR",
            Self::Api(ApiError::BusinessFailure { .. }) => "BUSINESS_FAILURE",
            Self::Api(ApiError::Unauthorized { .. }) => "INVALID_CREDENTIALS",
            Self::Api(ApiError::Unexpected { .. }) => "UNEXPECTED_RESPONSE",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// HTTP-like status associated with the error.
    pub fn status(&self) -> u16 {
        match self {
            Self::Token(_) | Self::Refresh(_) => 401,
            Self::Authorization(_) => 403,
            Self::Network(NetworkError::RateLimited { .. }) => 429,
            Self::Network(NetworkError::Timeout { .. }) => 408,
            Self::Network(_) => 0,
            Self::Api(ApiError::Validation { status, .. }) => *status,
            Self::Api(ApiError::ServerError { status, .. }) => *status,
            Self::Api(ApiError::BusinessFailure { .. }) => 200,
            Self::Api(ApiError::Unauthorized { .. }) => 401,
            Self::Api(ApiError::Unexpected { status, .. }) => *status,
            Self::Configuration(_) | Self::Storage(_) => 500,
        }
    }

    /// Check if error is transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::Api(ApiError::ServerError { .. }) => true,
            _ => false,
        }
    }

    /// Get retry-after duration if applicable.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Network(NetworkError::RateLimited { retry_after }) => *retry_after,
            _ => None,
        }
    }

    /// Check if error requires the user to sign in again.
    pub fn needs_reauth(&self) -> bool {
        matches!(
            self,
            Self::Token(TokenError::Missing)
                | Self::Token(TokenError::Malformed { .. })
                | Self::Token(TokenError::MissingTenant)
                | Self::Refresh(_)
        )
    }

    fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::Token(_) | Self::Refresh(_))
    }

    /// Normalize into a single caller-facing shape.
    ///
    /// In production the message is sanitized; development keeps full detail.
    pub fn normalize(&self, environment: Environment) -> NormalizedError {
        let raw = self.to_string();
        let message = match environment {
            Environment::Development => raw,
            Environment::Production if self.is_authentication_failure() => {
                "Authentication failed. Please sign in again.".to_string()
            }
            Environment::Production => sanitize_message(&raw),
        };

        NormalizedError {
            status: self.status(),
            code: self.error_code(),
            message,
        }
    }
}

/// Caller-facing error carrying status, code, and a (possibly sanitized) message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedError {
    pub status: u16,
    pub code: &'static str,
    pub message: String,
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },
}

/// Local token failures. None of these reach the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("No session token available")]
    Missing,

    #[error("Malformed token: {reason}")]
    Malformed { reason: String },

    #[error("Token expired")]
    Expired,

    #[error("Token carries no gym id")]
    MissingTenant,
}

/// Authorization failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("Administrator privileges required for {path}")]
    Denied { path: String },

    #[error("Forbidden by server: {message}")]
    Forbidden { message: String },
}

/// Refresh failure. Cloneable so one outcome can be fanned out to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Refresh request failed: {message}")]
    Network { message: String },

    #[error("Invalid refresh response: {message}")]
    InvalidResponse { message: String },

    #[error("Gym id changed during refresh (expected {expected}, received {received})")]
    TenantMismatch { expected: String, received: String },

    #[error("Refreshed session could not be persisted: {message}")]
    Storage { message: String },

    #[error("Refresh coordinator dropped the request")]
    Abandoned,
}

/// Network/transport error.
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },
}

impl NetworkError {
    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::Timeout { .. })
    }
}

/// Errors reported by the backend API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation failed: {message}")]
    Validation { status: u16, message: String },

    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Request failed: {message}")]
    BusinessFailure { message: String },

    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Unexpected response (HTTP {status}): {message}")]
    Unexpected { status: u16, message: String },
}

/// Storage error.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Read failed: {message}")]
    ReadFailed { message: String },

    #[error("Write failed: {message}")]
    WriteFailed { message: String },

    #[error("Corrupted data: {message}")]
    CorruptedData { message: String },
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Error body the backend may return instead of an envelope.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Parse the best available message out of an error body.
pub fn parse_error_message(body: &str) -> Option<String> {
    let parsed: ApiErrorBody = serde_json::from_str(body).ok()?;
    parsed.message.or(parsed.error)
}

/// Create error from a non-success HTTP response.
///
/// 401 is not mapped here; the client routes it to the refresh coordinator.
pub fn create_error_from_response(
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> PipelineError {
    let message = parse_error_message(body).unwrap_or_else(|| format!("HTTP {}", status));

    match status {
        400 | 422 => ApiError::Validation { status, message }.into(),
        401 => TokenError::Expired.into(),
        403 => AuthorizationError::Forbidden { message }.into(),
        429 => NetworkError::RateLimited { retry_after }.into(),
        500..=599 => ApiError::ServerError { status, message }.into(),
        _ => ApiError::Unexpected { status, message }.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_is_retryable() {
        assert!(PipelineError::Network(NetworkError::ConnectionFailed {
            message: "reset".to_string()
        })
        .is_retryable());
        assert!(PipelineError::Api(ApiError::ServerError {
            status: 503,
            message: "down".to_string()
        })
        .is_retryable());
        assert!(!PipelineError::Network(NetworkError::RateLimited { retry_after: None })
            .is_retryable());
        assert!(!PipelineError::Authorization(AuthorizationError::Forbidden {
            message: "no".to_string()
        })
        .is_retryable());
    }

    #[test]
    fn test_create_error_from_response() {
        let error = create_error_from_response(422, r#"{"message":"email is required"}"#, None);
        assert_eq!(error.error_code(), "VALIDATION_ERROR");
        assert!(error.to_string().contains("email is required"));

        let error = create_error_from_response(429, "", Some(Duration::from_secs(5)));
        assert_eq!(error.retry_after(), Some(Duration::from_secs(5)));

        let error = create_error_from_response(502, "<html>", None);
        assert_eq!(error.status(), 502);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_needs_reauth() {
        assert!(PipelineError::Token(TokenError::Missing).needs_reauth());
        assert!(PipelineError::Refresh(RefreshError::NoRefreshToken).needs_reauth());
        assert!(!PipelineError::Token(TokenError::Expired).needs_reauth());
    }

    #[test]
    fn test_normalize_production_hides_auth_detail() {
        let error = PipelineError::Refresh(RefreshError::TenantMismatch {
            expected: "g1".to_string(),
            received: "g2".to_string(),
        });

        let normalized = error.normalize(Environment::Production);
        assert_eq!(normalized.status, 401);
        assert_eq!(normalized.code, "GYM_ID_MISMATCH");
        assert!(!normalized.message.contains("g2"));

        let normalized = error.normalize(Environment::Development);
        assert!(normalized.message.contains("g2"));
    }
}
