//! Configuration Types
//!
//! Pipeline configuration and environment selection.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::RouteTable;
use crate::error::{ConfigurationError, PipelineError};
use crate::resilience::RetryConfig;

/// Deployment environment. Controls error message sanitization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Full error detail is preserved.
    #[default]
    Development,
    /// Messages are sanitized before reaching callers.
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    /// Parse from an environment-variable style string.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Request pipeline configuration.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Backend base URL, e.g. `https://api.gym.example.com/api`.
    pub base_url: String,
    /// Value of the `X-API-Version` header.
    pub api_version: String,
    /// Value of the `X-Client-Version` header.
    pub client_version: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Deployment environment.
    pub environment: Environment,
    /// Substitute the in-process mock backend at the transport boundary.
    pub mock_backend: bool,
    /// Retry behaviour for dispatchable requests.
    pub retry: RetryConfig,
    /// Endpoint classification table.
    pub routes: RouteTable,
    /// Number of security events retained in memory.
    pub event_history_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            environment: Environment::Development,
            mock_backend: false,
            retry: RetryConfig::default(),
            routes: RouteTable::default(),
            event_history_capacity: DEFAULT_EVENT_HISTORY_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Create configuration from environment variables.
    ///
    /// Unset variables keep their defaults; unparsable values are rejected.
    pub fn from_env() -> Result<Self, PipelineError> {
        let mut config = Self::default();

        if let Ok(base_url) = std::env::var("GYM_API_BASE_URL") {
            config.base_url = base_url;
        }

        if let Ok(api_version) = std::env::var("GYM_API_VERSION") {
            config.api_version = api_version;
        }

        if let Ok(client_version) = std::env::var("GYM_CLIENT_VERSION") {
            config.client_version = client_version;
        }

        if let Ok(timeout) = std::env::var("GYM_API_TIMEOUT_SECS") {
            let secs = timeout.parse::<u64>().map_err(|_| {
                ConfigurationError::InvalidConfig {
                    message: format!("GYM_API_TIMEOUT_SECS must be an integer, got {}", timeout),
                }
            })?;
            config.timeout = Duration::from_secs(secs);
        }

        if let Ok(environment) = std::env::var("GYM_ENV") {
            config.environment = Environment::parse(&environment).ok_or_else(|| {
                ConfigurationError::InvalidConfig {
                    message: format!("Unknown GYM_ENV value: {}", environment),
                }
            })?;
        }

        if let Ok(flag) = std::env::var("GYM_USE_MOCK_BACKEND") {
            config.mock_backend = parse_flag(&flag);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let parsed = url::Url::parse(&self.base_url).map_err(|_| {
            ConfigurationError::InvalidEndpoint {
                url: self.base_url.clone(),
            }
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigurationError::InvalidEndpoint {
                url: self.base_url.clone(),
            }
            .into());
        }

        if self.timeout.is_zero() {
            return Err(ConfigurationError::InvalidConfig {
                message: "timeout must be greater than zero".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Default configuration values.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_API_VERSION: &str = "1";
pub const DEFAULT_TIMEOUT_MS: u64 = 30000;
pub const DEFAULT_EVENT_HISTORY_CAPACITY: usize = 500;
