//! Security Events
//!
//! Append-only security event log with a closed taxonomy. Events fan out to
//! registered sinks on a best-effort basis; a failing sink never affects the
//! request that produced the event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::core::HttpMethod;

/// Event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SecurityEventKind {
    SecurityViolation,
    AuthFailure,
    AuthzFailure,
    SuspiciousActivity,
    GymIdMismatch,
    RefreshFailure,
    RefreshSuccess,
    /// Audit trail for administrative actions.
    AdminAction,
}

impl SecurityEventKind {
    /// Default severity for the kind.
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::SecurityViolation => Severity::High,
            Self::AuthFailure => Severity::Warn,
            Self::AuthzFailure => Severity::High,
            Self::SuspiciousActivity => Severity::Critical,
            Self::GymIdMismatch => Severity::Critical,
            Self::RefreshFailure => Severity::Error,
            Self::RefreshSuccess => Severity::Info,
            Self::AdminAction => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SecurityViolation => "security_violation",
            Self::AuthFailure => "auth_failure",
            Self::AuthzFailure => "authz_failure",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::GymIdMismatch => "gym_id_mismatch",
            Self::RefreshFailure => "refresh_failure",
            Self::RefreshSuccess => "refresh_success",
            Self::AdminAction => "admin_action",
        }
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warn,
    Error,
    High,
    Critical,
}

/// Security event.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub detail: String,
}

impl SecurityEvent {
    /// Create an event with the kind's default severity.
    pub fn new(kind: SecurityEventKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            timestamp: Utc::now(),
            tenant_id: None,
            url: None,
            method: None,
            detail: detail.into(),
        }
    }

    pub fn tenant(mut self, tenant_id: Option<String>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn request(mut self, method: HttpMethod, url: impl Into<String>) -> Self {
        self.method = Some(method.as_str().to_string());
        self.url = Some(url.into());
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// Sink failure. Reported to the logger, never to callers.
#[derive(Debug, thiserror::Error)]
#[error("security event sink failed: {0}")]
pub struct SinkError(pub String);

/// Destination for security events.
pub trait SecurityEventSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: &SecurityEvent) -> Result<(), SinkError>;
}

/// Console sink writing through `tracing` under the `security` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl SecurityEventSink for TracingSink {
    fn record(&self, event: &SecurityEvent) -> Result<(), SinkError> {
        let kind = event.kind.as_str();
        let tenant_id = event.tenant_id.as_deref().unwrap_or("");
        let url = event.url.as_deref().unwrap_or("");
        let method = event.method.as_deref().unwrap_or("");

        match event.severity {
            Severity::Info => tracing::info!(
                target: "security",
                event = kind,
                tenant_id,
                method,
                url,
                detail = %event.detail
            ),
            Severity::Warn => tracing::warn!(
                target: "security",
                event = kind,
                tenant_id,
                method,
                url,
                detail = %event.detail
            ),
            Severity::Error | Severity::High | Severity::Critical => tracing::error!(
                target: "security",
                event = kind,
                severity = ?event.severity,
                tenant_id,
                method,
                url,
                detail = %event.detail
            ),
        }
        Ok(())
    }
}

/// Remote-forwarding sink backed by a bounded queue.
///
/// `try_send` never waits; when the queue is full or the receiver is gone the
/// event is dropped for this sink.
pub struct ChannelSink {
    sender: mpsc::Sender<SecurityEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver a forwarding task drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SecurityEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl SecurityEventSink for ChannelSink {
    fn record(&self, event: &SecurityEvent) -> Result<(), SinkError> {
        self.sender
            .try_send(event.clone())
            .map_err(|e| SinkError(e.to_string()))
    }
}

/// In-memory sink for testing.
#[derive(Default)]
pub struct InMemorySink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SecurityEventSink for InMemorySink {
    fn record(&self, event: &SecurityEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

/// Security event logger shared by every pipeline component.
pub struct SecurityEventLogger {
    history: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
    sinks: Vec<Arc<dyn SecurityEventSink>>,
}

impl SecurityEventLogger {
    /// Logger with the console sink.
    pub fn new(capacity: usize) -> Self {
        Self::with_sinks(capacity, vec![Arc::new(TracingSink)])
    }

    /// Logger with explicit sinks.
    pub fn with_sinks(capacity: usize, sinks: Vec<Arc<dyn SecurityEventSink>>) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            sinks,
        }
    }

    /// Add a sink.
    pub fn add_sink(mut self, sink: Arc<dyn SecurityEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Append an event.
    pub fn log(&self, event: SecurityEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.record(&event) {
                tracing::debug!(error = %e, event = event.kind.as_str(), "Dropped security event");
            }
        }

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> Vec<SecurityEvent> {
        self.lock_history().iter().cloned().collect()
    }

    /// Retained events of one kind.
    pub fn events_of(&self, kind: SecurityEventKind) -> Vec<SecurityEvent> {
        self.lock_history()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, VecDeque<SecurityEvent>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SecurityEventLogger {
    fn default() -> Self {
        Self::new(crate::types::DEFAULT_EVENT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl SecurityEventSink for FailingSink {
        fn record(&self, _event: &SecurityEvent) -> Result<(), SinkError> {
            Err(SinkError("remote unreachable".to_string()))
        }
    }

    #[test]
    fn test_default_severities() {
        assert_eq!(SecurityEventKind::GymIdMismatch.default_severity(), Severity::Critical);
        assert_eq!(SecurityEventKind::AuthFailure.default_severity(), Severity::Warn);
        assert_eq!(SecurityEventKind::RefreshFailure.default_severity(), Severity::Error);
        assert_eq!(SecurityEventKind::AdminAction.default_severity(), Severity::Info);
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn test_failing_sink_does_not_stop_others() {
        let memory = Arc::new(InMemorySink::new());
        let logger =
            SecurityEventLogger::with_sinks(10, vec![Arc::new(FailingSink), memory.clone()]);

        logger.log(SecurityEvent::new(SecurityEventKind::AuthFailure, "expired"));

        assert_eq!(memory.events().len(), 1);
        assert_eq!(logger.events().len(), 1);
    }

    #[test]
    fn test_memory_sink_survives_poisoned_lock() {
        let sink = Arc::new(InMemorySink::new());
        let holder = sink.clone();
        let _ = std::thread::spawn(move || {
            let _guard = holder.events.lock().unwrap();
            panic!("sink holder crashed");
        })
        .join();

        sink.record(&SecurityEvent::new(SecurityEventKind::AuthFailure, "expired")).unwrap();
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let logger = SecurityEventLogger::with_sinks(2, Vec::new());
        for detail in ["a", "b", "c"] {
            logger.log(SecurityEvent::new(SecurityEventKind::AdminAction, detail));
        }

        let details: Vec<String> = logger.events().into_iter().map(|e| e.detail).collect();
        assert_eq!(details, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_channel_sink_drops_when_full() {
        let (sink, mut receiver) = ChannelSink::new(1);
        let event = SecurityEvent::new(SecurityEventKind::RefreshSuccess, "ok")
            .tenant(Some("g1".to_string()))
            .request(HttpMethod::Post, "/admin/refresh-token");

        assert!(sink.record(&event).is_ok());
        assert!(sink.record(&event).is_err());

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.tenant_id.as_deref(), Some("g1"));
        assert_eq!(received.method.as_deref(), Some("POST"));
    }

    #[test]
    fn test_event_serializes() {
        let event = SecurityEvent::new(SecurityEventKind::GymIdMismatch, "changed");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "GymIdMismatch");
        assert_eq!(value["severity"], "critical");
        assert!(value.get("url").is_none());
    }
}
