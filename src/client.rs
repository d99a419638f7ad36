//! Gym API Client
//!
//! High-level client that runs every call through the request pipeline:
//! interceptor, transport with retry, refresh on expiry, envelope parsing.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::core::{
    EndpointClass, HttpMethod, HttpRequest, HttpTransport, Interception, LogoutReason,
    RequestInterceptor, SessionEvent, TenantCache,
};
use crate::error::{
    create_error_from_response, parse_error_message, ApiError, ConfigurationError,
    NormalizedError, PipelineError, TokenError,
};
use crate::resilience::{parse_retry_after, RetryExecutor, RetryPolicy, RetryStats};
use crate::telemetry::{SecurityEvent, SecurityEventKind, SecurityEventLogger};
use crate::token::{InMemorySessionStore, RefreshCoordinator, SessionStore};
use crate::types::{ApiEnvelope, ApiRequest, PipelineConfig, Session, SessionInfo, TokenPair};

/// Client for the gym admin API.
pub struct GymApiClient<T = Box<dyn HttpTransport>, S = InMemorySessionStore>
where
    T: HttpTransport + 'static,
    S: SessionStore + 'static,
{
    config: PipelineConfig,
    transport: Arc<T>,
    interceptor: RequestInterceptor,
    retry: RetryPolicy,
    coordinator: RefreshCoordinator<T, S>,
}

impl GymApiClient<Box<dyn HttpTransport>, InMemorySessionStore> {
    /// Create a client with the configured transport and in-memory session
    /// storage.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let transport = default_transport(&config)?;
        Ok(Self::with_components(config, transport, InMemorySessionStore::new()))
    }
}

#[cfg(feature = "mock-backend")]
fn default_transport(config: &PipelineConfig) -> Result<Box<dyn HttpTransport>, PipelineError> {
    crate::core::create_pipeline_transport(config)
}

#[cfg(not(feature = "mock-backend"))]
fn default_transport(config: &PipelineConfig) -> Result<Box<dyn HttpTransport>, PipelineError> {
    if config.mock_backend {
        tracing::warn!("Mock backend requested but the mock-backend feature is disabled");
    }
    Ok(Box::new(crate::core::ReqwestHttpTransport::with_options(
        config.timeout,
        crate::core::DEFAULT_MAX_RESPONSE_SIZE,
    )?))
}

impl<T, S> GymApiClient<T, S>
where
    T: HttpTransport + 'static,
    S: SessionStore + 'static,
{
    /// Create a client with custom implementations.
    pub fn with_components(config: PipelineConfig, transport: T, store: S) -> Self {
        let events = Arc::new(SecurityEventLogger::new(config.event_history_capacity));
        Self::from_parts(config, Arc::new(transport), Arc::new(store), events)
    }

    /// Create a client from shared components.
    pub fn from_parts(
        config: PipelineConfig,
        transport: Arc<T>,
        store: Arc<S>,
        events: Arc<SecurityEventLogger>,
    ) -> Self {
        Self {
            interceptor: RequestInterceptor::new(&config, events.clone()),
            retry: RetryPolicy::new(config.retry.clone()),
            coordinator: RefreshCoordinator::new(&config, transport.clone(), store, events),
            transport,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn store(&self) -> &Arc<S> {
        self.coordinator.store()
    }

    pub fn events(&self) -> &Arc<SecurityEventLogger> {
        self.coordinator.events()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator<T, S> {
        &self.coordinator
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.get_stats()
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.coordinator.subscribe()
    }

    /// Current session, if any.
    pub async fn current_session(&self) -> Result<Option<Session>, PipelineError> {
        self.store().get().await
    }

    /// Caller-facing form of an error, sanitized for the configured environment.
    pub fn normalize(&self, error: &PipelineError) -> NormalizedError {
        error.normalize(self.config.environment)
    }

    // ========== Session Management ==========

    /// Sign in and establish a session.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, PipelineError> {
        let request = ApiRequest::post("/admin/login")
            .json(json!({ "email": email, "password": password }));

        let pair: Option<TokenPair> = match self.send(request).await {
            Ok(pair) => pair,
            Err(e) => {
                let detail = format!("Login failed: {}", e);
                self.events().log(
                    SecurityEvent::new(SecurityEventKind::AuthFailure, detail)
                        .request(HttpMethod::Post, "/admin/login"),
                );
                return Err(e);
            }
        };

        let session: Session = pair
            .ok_or_else(|| ApiError::Unexpected {
                status: 200,
                message: "Login response carried no token pair".to_string(),
            })?
            .into();

        self.coordinator.establish(session.clone()).await?;
        Ok(session)
    }

    /// Active sessions for the signed-in user.
    pub async fn list_sessions(&self) -> Result<Vec<SessionInfo>, PipelineError> {
        let sessions: Option<Vec<SessionInfo>> = self.get("/admin/sessions").await?;
        Ok(sessions.unwrap_or_default())
    }

    /// Revoke one server-side session.
    pub async fn revoke_session(&self, session_id: &str) -> Result<(), PipelineError> {
        let path = format!("/admin/sessions/{}", path_segment(session_id)?);
        let _: Value = self.delete(&path).await?;
        self.audit(HttpMethod::Delete, &path, format!("Revoked session {}", session_id)).await;
        Ok(())
    }

    /// Revoke every session except the current one.
    pub async fn revoke_all_sessions(&self) -> Result<(), PipelineError> {
        let path = "/admin/sessions/revoke-all";
        let _: Value = self.send(ApiRequest::post(path)).await?;
        self.audit(HttpMethod::Post, path, "Revoked all other sessions".to_string()).await;
        Ok(())
    }

    /// Sign out. The server-side revoke is best effort; local state is
    /// always cleared.
    pub async fn logout(&self) -> Result<(), PipelineError> {
        if self.current_session().await?.is_some() {
            if let Err(e) = self.send::<Value>(ApiRequest::post("/admin/logout")).await {
                tracing::warn!(error = %e, "Server-side logout failed; clearing local session");
            }
        }
        self.coordinator.terminate(LogoutReason::UserRequested).await
    }

    // ========== Tenant Cache ==========

    /// Cache a value under the current session's gym.
    pub async fn cache_insert<V: Serialize>(
        &self,
        key: &str,
        value: &V,
    ) -> Result<(), PipelineError> {
        let tenant_id = self.current_tenant().await?.ok_or(TokenError::MissingTenant)?;
        self.coordinator.cache().insert(&tenant_id, key, value);
        Ok(())
    }

    /// Read a value cached for the current session's gym.
    pub async fn cache_get<V: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<V>, PipelineError> {
        Ok(self
            .current_tenant()
            .await?
            .and_then(|tenant_id| self.coordinator.cache().get(&tenant_id, key)))
    }

    pub fn cache(&self) -> &Arc<TenantCache> {
        self.coordinator.cache()
    }

    // ========== Requests ==========

    /// GET and return the envelope's data.
    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, PipelineError> {
        self.send(ApiRequest::get(path)).await
    }

    /// POST a JSON body and return the envelope's data.
    pub async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, PipelineError> {
        self.send(ApiRequest::post(path).json(to_body(body)?)).await
    }

    /// PUT a JSON body and return the envelope's data.
    pub async fn put<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, PipelineError> {
        self.send(ApiRequest::put(path).json(to_body(body)?)).await
    }

    /// PATCH a JSON body and return the envelope's data.
    pub async fn patch<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, PipelineError> {
        self.send(ApiRequest::patch(path).json(to_body(body)?)).await
    }

    /// DELETE and return the envelope's data.
    pub async fn delete<R: DeserializeOwned>(&self, path: &str) -> Result<R, PipelineError> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Send a request through the pipeline and decode the envelope's data.
    ///
    /// A request that meets an expired or rejected token is suspended until
    /// the refresh settles and then re-issued once with the new token.
    pub async fn send<R: DeserializeOwned>(&self, request: ApiRequest) -> Result<R, PipelineError> {
        let data = self.execute(request).await?;
        serde_json::from_value(data).map_err(|e| {
            ApiError::Unexpected {
                status: 200,
                message: format!("Response data did not match the expected shape: {}", e),
            }
            .into()
        })
    }

    async fn execute(&self, mut request: ApiRequest) -> Result<Value, PipelineError> {
        let class = self.interceptor.classify(&request.path);
        let mut refreshed = false;

        loop {
            let session = self.current_session().await?;

            let http = match self.interceptor.intercept(&request, session.as_ref())? {
                Interception::Dispatch(http) => http,
                Interception::Suspend { .. } if refreshed => return Err(TokenError::Expired.into()),
                Interception::Suspend {
                    tenant_id,
                    observed_token,
                } => {
                    let (resumed, _) = self
                        .coordinator
                        .refresh(tenant_id, &observed_token, request)
                        .await?;
                    request = resumed;
                    refreshed = true;
                    continue;
                }
            };

            match self.dispatch(http, class, request.is_retry_eligible()).await {
                Err(PipelineError::Token(TokenError::Expired)) if !refreshed => {
                    let Some(session) = session else {
                        return Err(TokenError::Missing.into());
                    };
                    tracing::debug!(path = %request.path, "Server rejected token; refreshing");
                    let (resumed, _) = self
                        .coordinator
                        .refresh(session.tenant_id(), session.access_token(), request)
                        .await?;
                    request = resumed;
                    refreshed = true;
                }
                Err(e @ PipelineError::Authorization(_)) => {
                    self.events().log(
                        SecurityEvent::new(SecurityEventKind::AuthzFailure, e.to_string())
                            .tenant(session.as_ref().and_then(Session::tenant_id))
                            .request(request.method, request.path.clone()),
                    );
                    return Err(e);
                }
                other => return other,
            }
        }
    }

    async fn dispatch(
        &self,
        http: HttpRequest,
        class: EndpointClass,
        eligible: bool,
    ) -> Result<Value, PipelineError> {
        self.retry
            .execute(eligible, || self.send_once(http.clone(), class))
            .await
    }

    async fn send_once(
        &self,
        http: HttpRequest,
        class: EndpointClass,
    ) -> Result<Value, PipelineError> {
        let method = http.method;
        let path = http.path();
        let response = self.transport.send(http).await?;

        tracing::debug!(
            method = %method,
            path = %path,
            status = response.status,
            "Response received"
        );

        if !response.is_success() {
            if response.status == 401 && class == EndpointClass::Public {
                return Err(ApiError::Unauthorized {
                    message: parse_error_message(&response.body)
                        .unwrap_or_else(|| "HTTP 401".to_string()),
                }
                .into());
            }

            let retry_after = response
                .header("Retry-After")
                .and_then(|v| parse_retry_after(v, Utc::now()));
            return Err(create_error_from_response(response.status, &response.body, retry_after));
        }

        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }

        let envelope: ApiEnvelope<Value> =
            serde_json::from_str(&response.body).map_err(|e| ApiError::Unexpected {
                status: response.status,
                message: format!("Invalid response envelope: {}", e),
            })?;

        Ok(envelope.into_result()?.unwrap_or(Value::Null))
    }

    async fn current_tenant(&self) -> Result<Option<String>, PipelineError> {
        Ok(self.current_session().await?.and_then(|s| s.tenant_id()))
    }

    async fn audit(&self, method: HttpMethod, path: &str, detail: String) {
        let tenant_id = self.current_tenant().await.ok().flatten();
        self.events().log(
            SecurityEvent::new(SecurityEventKind::AdminAction, detail)
                .tenant(tenant_id)
                .request(method, path),
        );
    }
}

/// Percent-encode a caller-supplied value for use as one path segment.
fn path_segment(value: &str) -> Result<String, PipelineError> {
    let invalid = || -> PipelineError {
        ApiError::Validation {
            status: 400,
            message: format!("Invalid path segment: {:?}", value),
        }
        .into()
    };

    if value.is_empty() || value.chars().all(|c| c == '.') {
        return Err(invalid());
    }

    let mut url = url::Url::parse("http://segment.invalid/").map_err(|_| invalid())?;
    url.path_segments_mut().map_err(|_| invalid())?.push(value);
    Ok(url.path().trim_start_matches('/').to_string())
}

fn to_body<B: Serialize>(body: &B) -> Result<Value, PipelineError> {
    serde_json::to_value(body).map_err(|e| {
        ConfigurationError::InvalidConfig {
            message: format!("Request body could not be serialized: {}", e),
        }
        .into()
    })
}

/// Create a client from configuration.
pub fn gym_api_client(
    config: PipelineConfig,
) -> Result<GymApiClient<Box<dyn HttpTransport>, InMemorySessionStore>, PipelineError> {
    GymApiClient::new(config)
}
