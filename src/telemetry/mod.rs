//! Telemetry
//!
//! Observability components for the request pipeline.
//!
//! This module provides:
//!
//! - **Security Events**: Fixed-taxonomy security event log with pluggable sinks
//! - **Logging**: `tracing-subscriber` initialization

pub mod logging;
pub mod security_events;

// Security Events
pub use security_events::{
    ChannelSink, InMemorySink, SecurityEvent, SecurityEventKind, SecurityEventLogger,
    SecurityEventSink, Severity, SinkError, TracingSink,
};

// Logging
pub use logging::{LogFormat, LogLevel, LoggingConfig};
