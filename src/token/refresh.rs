//! Refresh Coordinator
//!
//! Single-flight token refresh. Every caller that hits an expired token for
//! a gym joins the same refresh; the first one starts it, the rest queue.
//! When it settles, queued requests are handed back in arrival order with
//! the refreshed session, or all rejected together.
//!
//! The coordinator is also the only writer of the session store: login,
//! refresh and logout all go through it.

use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::core::{
    HttpMethod, HttpTransport, LogoutReason, RequestInterceptor, SessionEvent, SessionEventBus,
    TenantCache,
};
use crate::error::{parse_error_message, PipelineError, RefreshError};
use crate::telemetry::{SecurityEvent, SecurityEventKind, SecurityEventLogger};
use crate::token::SessionStore;
use crate::types::{ApiEnvelope, ApiRequest, PipelineConfig, Session, TokenPair};

/// Refresh endpoint path.
pub const REFRESH_PATH: &str = "/admin/refresh-token";

type TenantKey = Option<String>;

/// What a suspended caller gets back: its request and the session to
/// re-issue it with.
pub type RefreshOutcome = Result<(ApiRequest, Session), RefreshError>;

struct PendingRequest {
    request: ApiRequest,
    responder: oneshot::Sender<RefreshOutcome>,
}

struct RefreshState {
    in_flight: JoinHandle<()>,
    waiters: VecDeque<PendingRequest>,
}

enum Settled {
    /// A new token pair was issued and stored.
    Refreshed(Session),
    /// The store already held a newer token than the one observed.
    Current(Session),
}

struct Shared<T, S> {
    transport: Arc<T>,
    store: Arc<S>,
    interceptor: RequestInterceptor,
    events: Arc<SecurityEventLogger>,
    bus: SessionEventBus,
    cache: Arc<TenantCache>,
    timeout: Duration,
    states: Mutex<HashMap<TenantKey, RefreshState>>,
    refresh_calls: AtomicUsize,
}

/// Per-gym single-flight refresh coordinator.
pub struct RefreshCoordinator<T, S> {
    shared: Arc<Shared<T, S>>,
}

impl<T, S> Clone for RefreshCoordinator<T, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T, S> RefreshCoordinator<T, S>
where
    T: HttpTransport + 'static,
    S: SessionStore + 'static,
{
    /// Create new coordinator.
    pub fn new(
        config: &PipelineConfig,
        transport: Arc<T>,
        store: Arc<S>,
        events: Arc<SecurityEventLogger>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                store,
                interceptor: RequestInterceptor::new(config, events.clone()),
                events,
                bus: SessionEventBus::default(),
                cache: Arc::new(TenantCache::new()),
                timeout: config.timeout,
                states: Mutex::new(HashMap::new()),
                refresh_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a refreshed session, starting a refresh for the gym unless
    /// one is already running.
    pub async fn refresh(
        &self,
        tenant_id: Option<String>,
        observed_access_token: &str,
        request: ApiRequest,
    ) -> RefreshOutcome {
        if !self.is_refreshing(&tenant_id) {
            if let Some(current) = self.shared.current_session().await {
                if current.access_token() != observed_access_token
                    && !current.is_expired_at(Utc::now())
                {
                    tracing::debug!(
                        tenant_id = ?tenant_id,
                        "Session already rotated; reusing current token"
                    );
                    return Ok((request, current));
                }
            }
        }

        let (responder, receiver) = oneshot::channel();
        let pending = PendingRequest { request, responder };

        {
            let mut states = self.shared.lock_states();
            match states.get_mut(&tenant_id) {
                Some(state) => {
                    state.waiters.push_back(pending);
                    tracing::debug!(
                        tenant_id = ?tenant_id,
                        waiters = state.waiters.len(),
                        "Joined in-flight refresh"
                    );
                }
                None => {
                    let shared = self.shared.clone();
                    let tenant = tenant_id.clone();
                    let observed = observed_access_token.to_string();
                    let in_flight = tokio::spawn(async move { shared.run(tenant, observed).await });

                    states.insert(
                        tenant_id.clone(),
                        RefreshState {
                            in_flight,
                            waiters: VecDeque::from([pending]),
                        },
                    );
                    tracing::debug!(tenant_id = ?tenant_id, "Started token refresh");
                }
            }
        }

        match receiver.await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.shared.discard_finished(&tenant_id);
                Err(RefreshError::Abandoned)
            }
        }
    }

    /// Store a freshly issued session after login.
    pub async fn establish(&self, session: Session) -> Result<(), PipelineError> {
        session.claims()?;
        let tenant_id = session.tenant_id();

        self.shared.store.set(session).await?;
        self.shared.bus.publish(SessionEvent::LoggedIn {
            tenant_id: tenant_id.clone(),
        });
        tracing::info!(tenant_id = ?tenant_id, "Session established");
        Ok(())
    }

    /// End the local session. In-flight refreshes are cancelled and their
    /// waiters rejected.
    pub async fn terminate(&self, reason: LogoutReason) -> Result<(), PipelineError> {
        let tenant_id = self
            .shared
            .current_session()
            .await
            .and_then(|s| s.tenant_id());

        let abandoned: Vec<RefreshState> =
            self.shared.lock_states().drain().map(|(_, s)| s).collect();
        for state in abandoned {
            state.in_flight.abort();
            for waiter in state.waiters {
                let _ = waiter.responder.send(Err(RefreshError::Abandoned));
            }
            // A task mid-poll on another worker only stops at its next yield;
            // it must not write the store after the clear below.
            let _ = state.in_flight.await;
        }

        self.shared.store.clear().await?;
        self.shared.cache.clear();
        self.shared.bus.publish(SessionEvent::LoggedOut {
            tenant_id: tenant_id.clone(),
            reason: reason.clone(),
        });
        tracing::info!(tenant_id = ?tenant_id, reason = ?reason, "Session terminated");
        Ok(())
    }

    /// Whether a refresh is running for the gym.
    pub fn is_refreshing(&self, tenant_id: &Option<String>) -> bool {
        self.shared.lock_states().contains_key(tenant_id)
    }

    /// Number of refresh calls sent to the backend.
    pub fn refresh_calls(&self) -> usize {
        self.shared.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.shared.store
    }

    pub fn cache(&self) -> &Arc<TenantCache> {
        &self.shared.cache
    }

    pub fn events(&self) -> &Arc<SecurityEventLogger> {
        &self.shared.events
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.bus.subscribe()
    }
}

impl<T, S> Shared<T, S>
where
    T: HttpTransport + 'static,
    S: SessionStore + 'static,
{
    fn lock_states(&self) -> std::sync::MutexGuard<'_, HashMap<TenantKey, RefreshState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn current_session(&self) -> Option<Session> {
        match self.store.get().await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read session store");
                None
            }
        }
    }

    async fn run(self: Arc<Self>, tenant_id: TenantKey, observed: String) {
        match self.perform(&tenant_id, &observed).await {
            Ok(Settled::Refreshed(session)) => {
                self.log(SecurityEventKind::RefreshSuccess, &tenant_id, "Access token refreshed");
                self.bus.publish(SessionEvent::Refreshed {
                    tenant_id: tenant_id.clone(),
                });
                self.settle(&tenant_id, Ok(session));
            }
            Ok(Settled::Current(session)) => {
                tracing::debug!(tenant_id = ?tenant_id, "Refresh skipped; store already current");
                self.settle(&tenant_id, Ok(session));
            }
            Err(error) => {
                self.fail(&tenant_id, &error).await;
                self.settle(&tenant_id, Err(error));
            }
        }
    }

    async fn perform(
        &self,
        tenant_id: &TenantKey,
        observed: &str,
    ) -> Result<Settled, RefreshError> {
        let current = self.current_session().await;

        if let Some(session) = &current {
            if session.access_token() != observed && !session.is_expired_at(Utc::now()) {
                return Ok(Settled::Current(session.clone()));
            }
        }

        let refresh_token = current
            .as_ref()
            .and_then(Session::refresh_token)
            .map(str::to_string)
            .ok_or(RefreshError::NoRefreshToken)?;

        let request = ApiRequest::post(REFRESH_PATH).json(json!({ "refreshToken": refresh_token }));
        let http = self
            .interceptor
            .anonymous(&request)
            .map_err(|e| RefreshError::InvalidResponse {
                message: e.to_string(),
            })?;

        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        let response = match tokio::time::timeout(self.timeout, self.transport.send(http)).await {
            Err(_) => {
                return Err(RefreshError::Network {
                    message: format!("timed out after {:?}", self.timeout),
                })
            }
            Ok(Err(e)) => {
                return Err(RefreshError::Network {
                    message: e.to_string(),
                })
            }
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status,
                message: parse_error_message(&response.body)
                    .unwrap_or_else(|| format!("HTTP {}", response.status)),
            });
        }

        let envelope: ApiEnvelope<TokenPair> = serde_json::from_str(&response.body)
            .map_err(|e| RefreshError::InvalidResponse {
                message: e.to_string(),
            })?;
        let pair = envelope
            .into_result()
            .map_err(|e| RefreshError::Rejected {
                status: response.status,
                message: e.to_string(),
            })?
            .ok_or_else(|| RefreshError::InvalidResponse {
                message: "response carried no token pair".to_string(),
            })?;

        let session = Session::from(pair);
        session.claims().map_err(|e| RefreshError::InvalidResponse {
            message: e.to_string(),
        })?;

        let received = session.tenant_id();
        if received != *tenant_id {
            return Err(RefreshError::TenantMismatch {
                expected: tenant_id.clone().unwrap_or_default(),
                received: received.unwrap_or_default(),
            });
        }

        self.store
            .set(session.clone())
            .await
            .map_err(|e| RefreshError::Storage {
                message: e.to_string(),
            })?;

        Ok(Settled::Refreshed(session))
    }

    async fn fail(&self, tenant_id: &TenantKey, error: &RefreshError) {
        let reason = match error {
            RefreshError::TenantMismatch { expected, received } => {
                self.log(
                    SecurityEventKind::GymIdMismatch,
                    tenant_id,
                    &format!("Refresh returned gym {:?}, expected {:?}", received, expected),
                );
                self.log(
                    SecurityEventKind::SuspiciousActivity,
                    tenant_id,
                    "Token refresh attempted to switch gym; session terminated",
                );
                LogoutReason::GymIdMismatch
            }
            _ => LogoutReason::RefreshFailed,
        };

        if let Err(e) = self.store.clear().await {
            tracing::error!(error = %e, "Failed to clear session after refresh failure");
        }
        self.cache.clear();

        self.log(SecurityEventKind::RefreshFailure, tenant_id, &error.to_string());
        self.bus.publish(SessionEvent::LoggedOut {
            tenant_id: tenant_id.clone(),
            reason,
        });
        tracing::warn!(tenant_id = ?tenant_id, error = %error, "Token refresh failed; logged out");
    }

    /// Remove the gym's state and answer its waiters in arrival order.
    fn settle(&self, tenant_id: &TenantKey, outcome: Result<Session, RefreshError>) {
        let Some(state) = self.lock_states().remove(tenant_id) else {
            return;
        };

        for PendingRequest { request, responder } in state.waiters {
            let reply = outcome.clone().map(|session| (request, session));
            if responder.send(reply).is_err() {
                tracing::trace!("Refresh waiter went away before settle");
            }
        }
    }

    fn discard_finished(&self, tenant_id: &TenantKey) {
        let mut states = self.lock_states();
        if states.get(tenant_id).is_some_and(|s| s.in_flight.is_finished()) {
            states.remove(tenant_id);
        }
    }

    fn log(&self, kind: SecurityEventKind, tenant_id: &TenantKey, detail: &str) {
        self.events.log(
            SecurityEvent::new(kind, detail)
                .tenant(tenant_id.clone())
                .request(HttpMethod::Post, REFRESH_PATH),
        );
    }
}
