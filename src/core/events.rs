//! Session Events
//!
//! Publish-subscribe notifications for session lifecycle changes. UI layers
//! subscribe to learn about forced logouts instead of polling the store.

use tokio::sync::broadcast;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutReason {
    /// The user signed out.
    UserRequested,
    /// The refresh token was rejected or the refresh call failed.
    RefreshFailed,
    /// A refresh returned a token for a different gym.
    GymIdMismatch,
}

/// Session lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { tenant_id: Option<String> },
    Refreshed { tenant_id: Option<String> },
    LoggedOut {
        tenant_id: Option<String>,
        reason: LogoutReason,
    },
}

/// Broadcast bus for [`SessionEvent`]s.
#[derive(Clone)]
pub struct SessionEventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl SessionEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: SessionEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Session event published with no subscribers");
        }
    }
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
