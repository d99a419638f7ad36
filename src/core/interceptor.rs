//! Request Interceptor
//!
//! Pre-flight gate for outbound calls: classifies the endpoint, checks the
//! current session against the route's trust level and attaches identity
//! headers. Policy violations fail here without a network round-trip.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::HttpRequest;
use crate::error::{AuthorizationError, ConfigurationError, PipelineError, TokenError};
use crate::telemetry::{SecurityEvent, SecurityEventKind, SecurityEventLogger};
use crate::token::TokenCodec;
use crate::types::{ApiRequest, PipelineConfig, Session};

pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_GYM_ID: &str = "X-Gym-Id";
pub const HEADER_CLIENT_VERSION: &str = "X-Client-Version";
pub const HEADER_API_VERSION: &str = "X-API-Version";
pub const HEADER_CSRF: &str = "X-Requested-With";
pub const HEADER_IDEMPOTENCY_KEY: &str = "Idempotency-Key";

const CSRF_VALUE: &str = "XMLHttpRequest";

/// Headers only the pipeline may set.
const RESERVED_HEADERS: &[&str] = &[
    HEADER_AUTHORIZATION,
    HEADER_GYM_ID,
    HEADER_CLIENT_VERSION,
    HEADER_API_VERSION,
    HEADER_CSRF,
    HEADER_IDEMPOTENCY_KEY,
];

/// Trust level of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointClass {
    /// No identity attached.
    Public,
    /// Bearer token required.
    Authenticated,
    /// Bearer token, admin claim and gym id required.
    AdminOnly,
    /// Bearer token and gym id required.
    TenantScoped,
}

impl EndpointClass {
    fn requires_tenant(&self) -> bool {
        matches!(self, Self::AdminOnly | Self::TenantScoped)
    }
}

/// Static endpoint classification table.
///
/// Prefixes match whole path segments: `/customers` covers `/customers/7`
/// but not `/customers-export`.
#[derive(Clone, Debug)]
pub struct RouteTable {
    public: Vec<String>,
    admin: Vec<String>,
    tenant_scoped: Vec<String>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::builder()
            .public("/admin/login")
            .public("/admin/refresh-token")
            .public("/admin/forgot-password")
            .public("/admin/reset-password")
            .public("/admin/register")
            .admin("/admin")
            .tenant_scoped("/customers")
            .tenant_scoped("/sessions")
            .tenant_scoped("/payments")
            .tenant_scoped("/packages")
            .tenant_scoped("/equipment")
            .build()
    }
}

impl RouteTable {
    /// Start an empty table.
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    /// Classify a path. Public entries win over admin ones; any path under
    /// an admin prefix not listed as public is admin-only.
    pub fn classify(&self, path: &str) -> EndpointClass {
        let path = normalize_path(path);

        if self.public.iter().any(|p| matches_prefix(&path, p)) {
            EndpointClass::Public
        } else if self.admin.iter().any(|p| matches_prefix(&path, p)) {
            EndpointClass::AdminOnly
        } else if self.tenant_scoped.iter().any(|p| matches_prefix(&path, p)) {
            EndpointClass::TenantScoped
        } else {
            EndpointClass::Authenticated
        }
    }
}

/// Builder for [`RouteTable`].
#[derive(Default)]
pub struct RouteTableBuilder {
    public: Vec<String>,
    admin: Vec<String>,
    tenant_scoped: Vec<String>,
}

impl RouteTableBuilder {
    pub fn public(mut self, prefix: impl AsRef<str>) -> Self {
        self.public.push(normalize_path(prefix.as_ref()));
        self
    }

    pub fn admin(mut self, prefix: impl AsRef<str>) -> Self {
        self.admin.push(normalize_path(prefix.as_ref()));
        self
    }

    pub fn tenant_scoped(mut self, prefix: impl AsRef<str>) -> Self {
        self.tenant_scoped.push(normalize_path(prefix.as_ref()));
        self
    }

    pub fn build(self) -> RouteTable {
        RouteTable {
            public: self.public,
            admin: self.admin,
            tenant_scoped: self.tenant_scoped,
        }
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let trimmed = path.trim_matches('/').to_ascii_lowercase();
    format!("/{}", trimmed)
}

fn matches_prefix(path: &str, prefix: &str) -> bool {
    prefix == "/"
        || path == prefix
        || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

/// Outcome of intercepting a call.
#[derive(Debug)]
pub enum Interception {
    /// Ready to send.
    Dispatch(HttpRequest),
    /// The token is expired; wait for the refresh coordinator.
    Suspend {
        tenant_id: Option<String>,
        observed_token: String,
    },
}

/// Pre-flight request gate.
pub struct RequestInterceptor {
    routes: RouteTable,
    base_url: String,
    api_version: String,
    client_version: String,
    timeout: Duration,
    events: Arc<SecurityEventLogger>,
}

impl RequestInterceptor {
    pub fn new(config: &PipelineConfig, events: Arc<SecurityEventLogger>) -> Self {
        Self {
            routes: config.routes.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version: config.api_version.clone(),
            client_version: config.client_version.clone(),
            timeout: config.timeout,
            events,
        }
    }

    pub fn classify(&self, path: &str) -> EndpointClass {
        self.routes.classify(path)
    }

    /// Gate a request against the current session.
    pub fn intercept(
        &self,
        request: &ApiRequest,
        session: Option<&Session>,
    ) -> Result<Interception, PipelineError> {
        self.intercept_at(request, session, Utc::now())
    }

    /// [`intercept`](Self::intercept) against an explicit clock.
    pub fn intercept_at(
        &self,
        request: &ApiRequest,
        session: Option<&Session>,
        now: DateTime<Utc>,
    ) -> Result<Interception, PipelineError> {
        let class = self.classify(&request.path);

        if class == EndpointClass::Public {
            return Ok(Interception::Dispatch(self.build(request, None)?));
        }

        let session = match session {
            Some(session) if !session.access_token().trim().is_empty() => session,
            _ => {
                self.deny(
                    request,
                    None,
                    SecurityEventKind::SecurityViolation,
                    "No session token for protected endpoint",
                );
                return Err(TokenError::Missing.into());
            }
        };

        let claims = match TokenCodec::decode(session.access_token()) {
            Ok(claims) => claims,
            Err(e) => {
                self.deny(
                    request,
                    None,
                    SecurityEventKind::SecurityViolation,
                    &format!("Refused to send malformed token: {}", e),
                );
                return Err(e.into());
            }
        };
        let tenant_id = TokenCodec::extract_tenant_id(&claims);

        if TokenCodec::validate_at(&claims, now).expired {
            self.deny(
                request,
                tenant_id.clone(),
                SecurityEventKind::AuthFailure,
                "Access token expired; awaiting refresh",
            );
            return Ok(Interception::Suspend {
                tenant_id,
                observed_token: session.access_token().to_string(),
            });
        }

        if class == EndpointClass::AdminOnly && !TokenCodec::extract_is_admin(&claims) {
            self.deny(
                request,
                tenant_id,
                SecurityEventKind::AuthzFailure,
                "Non-admin session on admin-only endpoint",
            );
            return Err(AuthorizationError::Denied {
                path: request.path.clone(),
            }
            .into());
        }

        if class.requires_tenant() && tenant_id.is_none() {
            self.deny(
                request,
                None,
                SecurityEventKind::SecurityViolation,
                "Token carries no gym id for tenant-scoped endpoint",
            );
            return Err(TokenError::MissingTenant.into());
        }

        let identity = Identity {
            authorization: session.authorization_header(),
            tenant_id: if class.requires_tenant() { tenant_id } else { None },
        };

        Ok(Interception::Dispatch(self.build(request, Some(identity))?))
    }

    /// Build a request that carries no identity, whatever its route class.
    pub(crate) fn anonymous(&self, request: &ApiRequest) -> Result<HttpRequest, PipelineError> {
        self.build(request, None)
    }

    fn deny(
        &self,
        request: &ApiRequest,
        tenant_id: Option<String>,
        kind: SecurityEventKind,
        detail: &str,
    ) {
        self.events.log(
            SecurityEvent::new(kind, detail)
                .tenant(tenant_id)
                .request(request.method, request.path.clone()),
        );
    }

    fn build(
        &self,
        request: &ApiRequest,
        identity: Option<Identity>,
    ) -> Result<HttpRequest, PipelineError> {
        let mut headers: HashMap<String, String> = request
            .headers
            .iter()
            .filter(|(name, _)| !RESERVED_HEADERS.iter().any(|r| r.eq_ignore_ascii_case(name)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert(HEADER_CLIENT_VERSION.to_string(), self.client_version.clone());
        headers.insert(HEADER_API_VERSION.to_string(), self.api_version.clone());
        headers.insert(HEADER_CSRF.to_string(), CSRF_VALUE.to_string());

        if let Some(key) = &request.idempotency_key {
            headers.insert(HEADER_IDEMPOTENCY_KEY.to_string(), key.clone());
        }

        if let Some(identity) = identity {
            headers.insert(HEADER_AUTHORIZATION.to_string(), identity.authorization);
            if let Some(tenant_id) = identity.tenant_id {
                headers.insert(HEADER_GYM_ID.to_string(), tenant_id);
            }
        }

        let body = match &request.body {
            Some(body) => {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
                Some(body.to_string())
            }
            None => None,
        };

        Ok(HttpRequest {
            method: request.method,
            url: self.url_for(request)?,
            headers,
            body,
            timeout: Some(self.timeout),
        })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<String, PipelineError> {
        let raw = format!("{}/{}", self.base_url, request.path.trim_start_matches('/'));
        let mut url = url::Url::parse(&raw)
            .map_err(|_| ConfigurationError::InvalidEndpoint { url: raw.clone() })?;

        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url.to_string())
    }
}

struct Identity {
    authorization: String,
    tenant_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HttpMethod;
    use crate::types::Claims;
    use serde_json::json;

    fn interceptor() -> (RequestInterceptor, Arc<SecurityEventLogger>) {
        let events = Arc::new(SecurityEventLogger::with_sinks(100, Vec::new()));
        let config = PipelineConfig {
            base_url: "https://api.gym.test/api/".to_string(),
            api_version: "2".to_string(),
            client_version: "9.9.9".to_string(),
            ..Default::default()
        };
        (RequestInterceptor::new(&config, events.clone()), events)
    }

    fn session(payload: serde_json::Value) -> Session {
        Session::new(
            TokenCodec::encode_unsigned(&Claims::from(payload)),
            Some("refresh".to_string()),
        )
    }

    fn future_exp() -> i64 {
        Utc::now().timestamp() + 3600
    }

    fn dispatched(result: Result<Interception, PipelineError>) -> HttpRequest {
        match result {
            Ok(Interception::Dispatch(request)) => request,
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    #[test]
    fn test_route_classification() {
        let routes = RouteTable::default();
        assert_eq!(routes.classify("/admin/login"), EndpointClass::Public);
        assert_eq!(routes.classify("/admin/refresh-token?x=1"), EndpointClass::Public);
        assert_eq!(routes.classify("/admin/register/"), EndpointClass::Public);
        assert_eq!(routes.classify("/admin/sessions"), EndpointClass::AdminOnly);
        assert_eq!(routes.classify("/admin/sessions/abc"), EndpointClass::AdminOnly);
        assert_eq!(routes.classify("/admin/unlisted/deep/path"), EndpointClass::AdminOnly);
        assert_eq!(routes.classify("/admin"), EndpointClass::AdminOnly);
        assert_eq!(routes.classify("/customers/12"), EndpointClass::TenantScoped);
        assert_eq!(routes.classify("/Equipment"), EndpointClass::TenantScoped);
        assert_eq!(routes.classify("/customers-export"), EndpointClass::Authenticated);
        assert_eq!(routes.classify("/administrators"), EndpointClass::Authenticated);
        assert_eq!(routes.classify("/profile"), EndpointClass::Authenticated);
    }

    #[test]
    fn test_public_endpoint_has_no_identity() {
        let (interceptor, events) = interceptor();
        let request = ApiRequest::post("/admin/login")
            .json(json!({"email": "a@b.c"}))
            .header("Authorization", "Bearer smuggled");

        let http = dispatched(interceptor.intercept(&request, None));
        assert!(http.header(HEADER_AUTHORIZATION).is_none());
        assert!(http.header(HEADER_GYM_ID).is_none());
        assert_eq!(http.header(HEADER_CSRF), Some("XMLHttpRequest"));
        assert_eq!(http.url, "https://api.gym.test/api/admin/login");
        assert!(events.events().is_empty());
    }

    #[test]
    fn test_tenant_scoped_headers_come_from_token() {
        let (interceptor, _) = interceptor();
        let session = session(json!({"gymId": "g1", "exp": future_exp()}));
        let request = ApiRequest::get("/customers")
            .query("gymId", "g2")
            .header("x-gym-id", "g2");

        let http = dispatched(interceptor.intercept(&request, Some(&session)));
        assert_eq!(http.header(HEADER_GYM_ID), Some("g1"));
        assert_eq!(
            http.headers
                .keys()
                .filter(|k| k.eq_ignore_ascii_case(HEADER_GYM_ID))
                .count(),
            1
        );
        assert_eq!(
            http.header(HEADER_AUTHORIZATION),
            Some(session.authorization_header().as_str())
        );
        assert_eq!(http.header(HEADER_CLIENT_VERSION), Some("9.9.9"));
        assert_eq!(http.header(HEADER_API_VERSION), Some("2"));
        assert_eq!(http.url, "https://api.gym.test/api/customers?gymId=g2");
    }

    #[test]
    fn test_authenticated_route_omits_gym_header() {
        let (interceptor, _) = interceptor();
        let session = session(json!({"gymId": "g1", "exp": future_exp()}));

        let http = dispatched(interceptor.intercept(&ApiRequest::get("/profile"), Some(&session)));
        assert!(http.header(HEADER_AUTHORIZATION).is_some());
        assert!(http.header(HEADER_GYM_ID).is_none());
    }

    #[test]
    fn test_missing_session_is_violation() {
        let (interceptor, events) = interceptor();

        let result = interceptor.intercept(&ApiRequest::get("/customers"), None);
        assert!(matches!(result, Err(PipelineError::Token(TokenError::Missing))));

        let logged = events.events();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].kind, SecurityEventKind::SecurityViolation);
        assert_eq!(logged[0].url.as_deref(), Some("/customers"));
    }

    #[test]
    fn test_malformed_token_is_never_sent() {
        let (interceptor, events) = interceptor();
        let session = Session::new("only.two", None);

        let result = interceptor.intercept(&ApiRequest::get("/profile"), Some(&session));
        assert!(matches!(result, Err(PipelineError::Token(TokenError::Malformed { .. }))));
        assert_eq!(events.events_of(SecurityEventKind::SecurityViolation).len(), 1);
    }

    #[test]
    fn test_expired_token_suspends() {
        let (interceptor, events) = interceptor();
        let session = session(json!({"gymId": "g1", "exp": Utc::now().timestamp() - 5}));

        match interceptor.intercept(&ApiRequest::get("/payments"), Some(&session)) {
            Ok(Interception::Suspend { tenant_id, observed_token }) => {
                assert_eq!(tenant_id.as_deref(), Some("g1"));
                assert_eq!(observed_token, session.access_token());
            }
            other => panic!("expected suspend, got {:?}", other),
        }

        let logged = events.events();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].kind, SecurityEventKind::AuthFailure);
    }

    #[test]
    fn test_non_admin_denied_on_admin_route() {
        let (interceptor, events) = interceptor();
        let session = session(json!({"gymId": "g1", "isAdmin": "maybe", "exp": future_exp()}));

        let result = interceptor.intercept(&ApiRequest::get("/admin/sessions"), Some(&session));
        assert!(matches!(
            result,
            Err(PipelineError::Authorization(AuthorizationError::Denied { .. }))
        ));
        assert_eq!(events.events_of(SecurityEventKind::AuthzFailure).len(), 1);
    }

    #[test]
    fn test_admin_route_requires_gym_id() {
        let (interceptor, _) = interceptor();
        let admin_without_gym = session(json!({"isAdmin": true, "exp": future_exp()}));

        let result = interceptor.intercept(&ApiRequest::get("/admin/sessions"), Some(&admin_without_gym));
        assert!(matches!(result, Err(PipelineError::Token(TokenError::MissingTenant))));

        let admin = session(json!({"gymId": "g1", "isAdmin": 1, "exp": future_exp()}));
        let http = dispatched(interceptor.intercept(&ApiRequest::delete("/admin/sessions/s1"), Some(&admin)));
        assert_eq!(http.method, HttpMethod::Delete);
        assert_eq!(http.header(HEADER_GYM_ID), Some("g1"));
    }

    #[test]
    fn test_idempotency_key_and_body() {
        let (interceptor, _) = interceptor();
        let session = session(json!({"gymId": "g1"}));
        let request = ApiRequest::post("/payments")
            .json(json!({"amount": 10}))
            .idempotency_key("pay-1");

        let http = dispatched(interceptor.intercept(&request, Some(&session)));
        assert_eq!(http.header(HEADER_IDEMPOTENCY_KEY), Some("pay-1"));
        assert_eq!(http.header("content-type"), Some("application/json"));
        assert_eq!(http.body.as_deref(), Some(r#"{"amount":10}"#));
    }
}
