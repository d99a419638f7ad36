//! Gym Admin Request Pipeline
//!
//! Authenticated request pipeline for the multi-tenant gym admin dashboard.
//!
//! # Features
//!
//! - Structural JWT decoding with tolerant claim extraction
//! - Endpoint classification with local, fail-closed admin and tenant checks
//! - Identity headers (`Authorization`, `X-Gym-Id`) derived from the token at send time
//! - Single-flight token refresh per gym with refresh-token rotation
//! - Hard logout when a refresh changes the gym id
//! - Bounded exponential backoff for idempotent requests, `Retry-After` aware
//! - Fixed-taxonomy security event log with pluggable sinks
//! - In-process mock backend for local development
//!
//! # Example
//!
//! ```rust,ignore
//! use gym_auth_integration::{pipeline_config, GymApiClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = pipeline_config()
//!         .base_url("https://api.gym.example.com/api")
//!         .mock_backend(true)
//!         .build()?;
//!
//!     let client = GymApiClient::new(config)?;
//!     client.login("admin@gym.test", "admin-password").await?;
//!
//!     let customers: serde_json::Value = client.get("/customers").await?;
//!     println!("{}", customers);
//!
//!     client.logout().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: Claims, session, envelope, request and configuration types
//! - `error`: Error hierarchy, response mapping and message sanitization
//! - `core`: Transport, request interceptor, session events, tenant cache, mock backend
//! - `token`: Token codec, session storage and the refresh coordinator
//! - `resilience`: Retry with exponential backoff
//! - `telemetry`: Security events and logging setup
//! - `builders`: Fluent builder for configuration
//! - `client`: High-level client combining all of the above

pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod resilience;
pub mod telemetry;
pub mod token;
pub mod types;

// Re-export main client
pub use client::{gym_api_client, GymApiClient};

// Re-export builders
pub use builders::{pipeline_config, PipelineConfigBuilder};

// Re-export errors
pub use error::{
    create_error_from_response, sanitize_message, ApiError,
    AuthorizationError, ConfigurationError, NetworkError, NormalizedError, PipelineError,
    PipelineResult, RefreshError, StorageError, TokenError,
};

// Re-export types
pub use types::{
    // Config
    Environment, PipelineConfig,
    // Claims & session
    Claims, Session, SessionInfo, TokenPair,
    // Wire
    ApiEnvelope, ApiRequest, EnvelopeStatus,
};

// Re-export core components
pub use crate::core::{
    // Transport
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport, MockReply,
    ReqwestHttpTransport,
    // Interceptor
    EndpointClass, Interception, RequestInterceptor, RouteTable,
    // Session plumbing
    LogoutReason, SessionEvent, SessionEventBus, TenantCache,
};

#[cfg(feature = "mock-backend")]
pub use crate::core::{create_pipeline_transport, MockAccount, MockBackendTransport};

// Re-export token management
pub use token::{
    FileSessionStore, InMemorySessionStore, MockSessionStore, RefreshCoordinator, SessionStore,
    TokenCodec, TokenValidity,
};

// Re-export resilience
pub use resilience::{RetryConfig, RetryDecision, RetryExecutor, RetryPolicy, RetryStats};

// Re-export telemetry
pub use telemetry::{
    ChannelSink, InMemorySink, LogFormat, LogLevel, LoggingConfig, SecurityEvent,
    SecurityEventKind, SecurityEventLogger, SecurityEventSink, Severity, TracingSink,
};
