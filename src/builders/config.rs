//! Configuration Builder
//!
//! Fluent builder for pipeline configuration.

use std::time::Duration;

use crate::core::RouteTable;
use crate::error::{ConfigurationError, PipelineError};
use crate::resilience::RetryConfig;
use crate::types::{Environment, PipelineConfig};

/// Pipeline configuration builder.
#[derive(Default)]
pub struct PipelineConfigBuilder {
    base_url: Option<String>,
    api_version: Option<String>,
    client_version: Option<String>,
    timeout: Option<Duration>,
    environment: Environment,
    mock_backend: bool,
    retry: Option<RetryConfig>,
    routes: Option<RouteTable>,
    event_history_capacity: Option<usize>,
}

impl PipelineConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set backend base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the `X-API-Version` header value.
    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Set the `X-Client-Version` header value.
    pub fn client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = Some(version.into());
        self
    }

    /// Set request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set deployment environment.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Use the in-process mock backend.
    pub fn mock_backend(mut self, enable: bool) -> Self {
        self.mock_backend = enable;
        self
    }

    /// Set retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Set the endpoint classification table.
    pub fn routes(mut self, routes: RouteTable) -> Self {
        self.routes = Some(routes);
        self
    }

    pub fn event_history_capacity(mut self, capacity: usize) -> Self {
        self.event_history_capacity = Some(capacity);
        self
    }

    /// Build the pipeline configuration.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let base_url = self.base_url.ok_or_else(|| {
            PipelineError::Configuration(ConfigurationError::MissingRequired {
                field: "base_url".to_string(),
            })
        })?;

        let defaults = PipelineConfig::default();
        let config = PipelineConfig {
            base_url,
            api_version: self.api_version.unwrap_or(defaults.api_version),
            client_version: self.client_version.unwrap_or(defaults.client_version),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            environment: self.environment,
            mock_backend: self.mock_backend,
            retry: self.retry.unwrap_or(defaults.retry),
            routes: self.routes.unwrap_or(defaults.routes),
            event_history_capacity: self
                .event_history_capacity
                .unwrap_or(defaults.event_history_capacity),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Create a new pipeline configuration builder.
pub fn pipeline_config() -> PipelineConfigBuilder {
    PipelineConfigBuilder::new()
}
