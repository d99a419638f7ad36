//! End-to-end tests for the request pipeline.

use async_trait::async_trait;
use chrono::Utc;
use gym_auth_integration::{
    ApiRequest, Claims, GymApiClient, HttpMethod, HttpRequest, HttpResponse, HttpTransport,
    InMemorySessionStore, LogoutReason, MockHttpTransport, MockSessionStore, NetworkError,
    PipelineConfig, PipelineError, RefreshError, SecurityEventKind, SecurityEventLogger, Session,
    SessionEvent, Severity, TokenCodec, TokenError,
};
use gym_auth_integration::token::SessionWrite;
use gym_auth_integration::{AuthorizationError, ChannelSink, SecurityEventSink};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const REFRESH: &str = "/admin/refresh-token";

fn config() -> PipelineConfig {
    PipelineConfig {
        base_url: "http://gym.test".to_string(),
        ..Default::default()
    }
}

fn token(claims: Value) -> String {
    TokenCodec::encode_unsigned(&Claims::from(claims))
}

fn gym_token(gym: &str, exp_offset: i64) -> String {
    token(json!({
        "gymId": gym,
        "isAdmin": true,
        "exp": Utc::now().timestamp() + exp_offset,
    }))
}

fn envelope(data: Value) -> HttpResponse {
    HttpResponse::json(200, &json!({ "status": "SUCCESS", "message": "", "data": data }))
}

fn token_pair(access: &str, refresh: &str) -> HttpResponse {
    envelope(json!({ "accessToken": access, "refreshToken": refresh }))
}

fn client_with_mock_store(
    session: Session,
) -> GymApiClient<MockHttpTransport, MockSessionStore> {
    let store = MockSessionStore::new();
    store.add_session(session);
    GymApiClient::with_components(config(), MockHttpTransport::new(), store)
}

/// Transport that records when each call arrives and always answers with
/// the same response.
struct ClockedTransport {
    response: HttpResponse,
    arrivals: Mutex<Vec<tokio::time::Instant>>,
}

impl ClockedTransport {
    fn new(response: HttpResponse) -> Self {
        Self {
            response,
            arrivals: Mutex::new(Vec::new()),
        }
    }

    fn gaps(&self) -> Vec<Duration> {
        let arrivals = self.arrivals.lock().unwrap();
        arrivals.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn calls(&self) -> usize {
        self.arrivals.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for ClockedTransport {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, PipelineError> {
        self.arrivals.lock().unwrap().push(tokio::time::Instant::now());
        Ok(self.response.clone())
    }
}

fn clocked_client(response: HttpResponse) -> GymApiClient<ClockedTransport, InMemorySessionStore> {
    GymApiClient::with_components(
        config(),
        ClockedTransport::new(response),
        InMemorySessionStore::with_session(Session::new(gym_token("g1", 600), None)),
    )
}

// ============================================================================
// Single-flight refresh
// ============================================================================

#[tokio::test]
async fn test_concurrent_expired_requests_share_one_refresh() {
    let client = client_with_mock_store(Session::new(gym_token("g1", -30), Some("r1".to_string())));
    let fresh = gym_token("g1", 900);
    let transport = client.transport();
    transport
        .set_delay(Duration::from_millis(20))
        .queue_for(REFRESH, token_pair(&fresh, "r2"))
        .set_default_for("/customers", envelope(json!({"ok": true})));

    let calls = (0..10).map(|_| client.send::<Value>(ApiRequest::get("/customers")));
    let results = futures::future::join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(transport.requests_to(REFRESH).len(), 1);

    let data_requests = transport.requests_to("/customers");
    assert_eq!(data_requests.len(), 10);
    let expected = format!("Bearer {}", fresh);
    assert!(data_requests
        .iter()
        .all(|r| r.header("Authorization") == Some(expected.as_str())));

    let writes = client.store().get_write_history();
    assert_eq!(writes.len(), 1);
    assert!(matches!(&writes[0], SessionWrite::Set(s) if s.refresh_token() == Some("r2")));
}

#[tokio::test]
async fn test_tenant_change_on_refresh_is_hard_logout() {
    let client = client_with_mock_store(Session::new(gym_token("g1", -30), Some("r1".to_string())));
    let mut session_events = client.subscribe();
    client
        .transport()
        .set_delay(Duration::from_millis(10))
        .queue_for(REFRESH, token_pair(&gym_token("g2", 900), "r2"));

    let calls = (0..3).map(|_| client.send::<Value>(ApiRequest::get("/payments")));
    for result in futures::future::join_all(calls).await {
        assert!(matches!(
            result,
            Err(PipelineError::Refresh(RefreshError::TenantMismatch { .. }))
        ));
    }

    assert!(client.store().current().is_none());
    assert!(client.transport().requests_to("/payments").is_empty());

    let mismatches = client.events().events_of(SecurityEventKind::GymIdMismatch);
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].severity, Severity::Critical);
    assert_eq!(mismatches[0].tenant_id.as_deref(), Some("g1"));

    assert_eq!(
        session_events.recv().await.unwrap(),
        SessionEvent::LoggedOut {
            tenant_id: Some("g1".to_string()),
            reason: LogoutReason::GymIdMismatch,
        }
    );
}

#[tokio::test]
async fn test_queued_requests_use_rotated_token_and_stale_observers_do_not_refresh() {
    let stale = gym_token("g1", -30);
    let client = client_with_mock_store(Session::new(stale.clone(), Some("r1".to_string())));
    let fresh = gym_token("g1", 900);
    client
        .transport()
        .queue_for(REFRESH, token_pair(&fresh, "r2"))
        .set_default_for("/equipment", envelope(json!([])));

    let _: Value = client.get("/equipment").await.unwrap();

    // A caller that saw the old token only after the cycle settled.
    let (_, session) = client
        .coordinator()
        .refresh(Some("g1".to_string()), &stale, ApiRequest::get("/equipment"))
        .await
        .unwrap();

    assert_eq!(session.access_token(), fresh);
    assert_eq!(client.transport().requests_to(REFRESH).len(), 1);

    let body: Value =
        serde_json::from_str(client.transport().requests_to(REFRESH)[0].body.as_deref().unwrap())
            .unwrap();
    assert_eq!(body["refreshToken"], "r1");
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_idempotent_retry_is_bounded_with_increasing_delays() {
    let client = clocked_client(HttpResponse::json(503, &json!({"message": "unavailable"})));

    let result: Result<Value, _> = client.get("/customers").await;
    assert!(matches!(result, Err(PipelineError::Api(_))));

    let transport = client.transport();
    assert_eq!(transport.calls(), 3);

    let gaps = transport.gaps();
    assert!(gaps[0] >= Duration::from_millis(1000) && gaps[0] < Duration::from_millis(1100));
    assert!(gaps[1] >= Duration::from_millis(2000) && gaps[1] < Duration::from_millis(2200));
    assert!(gaps[1] > gaps[0]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_capped() {
    let client = clocked_client(
        HttpResponse::json(429, &json!({"message": "slow down"})).with_header("Retry-After", "120"),
    );

    let result: Result<Value, _> = client.get("/customers").await;
    assert!(matches!(
        result,
        Err(PipelineError::Network(NetworkError::RateLimited { .. }))
    ));
    assert_eq!(client.transport().calls(), 3);
    assert!(client
        .transport()
        .gaps()
        .iter()
        .all(|gap| *gap == Duration::from_secs(60)));
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_http_date_is_honored() {
    let retry_at = (Utc::now() + chrono::Duration::seconds(20))
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string();
    let client = clocked_client(
        HttpResponse::json(429, &json!({"message": "slow down"}))
            .with_header("Retry-After", retry_at),
    );

    let result: Result<Value, _> = client.get("/customers").await;
    assert!(matches!(
        result,
        Err(PipelineError::Network(NetworkError::RateLimited { .. }))
    ));
    assert_eq!(client.transport().calls(), 3);
    for gap in client.transport().gaps() {
        assert!(gap > Duration::from_secs(17) && gap <= Duration::from_secs(20), "gap {:?}", gap);
    }
}

#[tokio::test(start_paused = true)]
async fn test_non_idempotent_rate_limit_surfaces_immediately() {
    let client = clocked_client(
        HttpResponse::json(429, &json!({"message": "slow down"})).with_header("Retry-After", "5"),
    );

    let result: Result<Value, _> = client.post("/payments", &json!({"amount": 20})).await;
    match result {
        Err(PipelineError::Network(NetworkError::RateLimited { retry_after })) => {
            assert_eq!(retry_after, Some(Duration::from_secs(5)))
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(client.transport().calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idempotency_key_makes_post_retryable() {
    let client = clocked_client(HttpResponse::json(502, &json!({"message": "bad gateway"})));

    let request = ApiRequest::post("/payments")
        .json(json!({"amount": 20}))
        .idempotency_key("payment-42");
    let result: Result<Value, _> = client.send(request).await;

    assert!(result.is_err());
    assert_eq!(client.transport().calls(), 3);
    assert_eq!(client.retry_stats().failed_operations, 1);
}

#[tokio::test]
async fn test_validation_errors_are_not_retried() {
    let client = clocked_client(HttpResponse::json(422, &json!({"message": "email is invalid"})));

    let result: Result<Value, _> = client.get("/customers").await;
    assert!(matches!(result, Err(PipelineError::Api(_))));
    assert_eq!(client.transport().calls(), 1);
}

// ============================================================================
// Local denial
// ============================================================================

#[tokio::test]
async fn test_admin_check_fails_closed() {
    let exp = Utc::now().timestamp() + 600;
    let doubtful = [
        json!({"gymId": "g1", "exp": exp}),
        json!({"gymId": "g1", "isAdmin": "maybe", "exp": exp}),
        json!({"gymId": "g1", "isAdmin": null, "exp": exp}),
        json!({"gymId": "g1", "isAdmin": false, "role": "admin", "exp": exp}),
    ];

    for claims in doubtful {
        let client = client_with_mock_store(Session::new(token(claims), None));

        let result: Result<Value, _> = client.get("/admin/sessions").await;
        assert!(matches!(
            result,
            Err(PipelineError::Authorization(AuthorizationError::Denied { .. }))
        ));
        assert!(client.transport().get_requests().is_empty());
        assert_eq!(client.events().events_of(SecurityEventKind::AuthzFailure).len(), 1);
    }
}

#[tokio::test]
async fn test_policy_violations_never_reach_the_network() {
    let no_session = GymApiClient::with_components(
        config(),
        MockHttpTransport::new(),
        InMemorySessionStore::new(),
    );
    let result: Result<Value, _> = no_session.get("/customers").await;
    assert!(matches!(result, Err(PipelineError::Token(TokenError::Missing))));
    assert!(no_session.transport().get_requests().is_empty());

    let malformed = client_with_mock_store(Session::new("header.payload", None));
    let result: Result<Value, _> = malformed.get("/customers").await;
    assert!(matches!(result, Err(PipelineError::Token(TokenError::Malformed { .. }))));
    assert!(malformed.transport().get_requests().is_empty());

    let no_gym = client_with_mock_store(Session::new(
        token(json!({"sub": "u1", "exp": Utc::now().timestamp() + 600})),
        None,
    ));
    let result: Result<Value, _> = no_gym.get("/packages").await;
    assert!(matches!(result, Err(PipelineError::Token(TokenError::MissingTenant))));
    assert!(no_gym.transport().get_requests().is_empty());

    for client in [&malformed, &no_gym] {
        assert_eq!(
            client.events().events_of(SecurityEventKind::SecurityViolation).len(),
            1
        );
    }
}

#[tokio::test]
async fn test_caller_cannot_override_gym_header() {
    let client = client_with_mock_store(Session::new(gym_token("g1", 600), None));
    client.transport().queue(envelope(json!([])));

    let request = ApiRequest::get("/customers")
        .header("X-Gym-Id", "g2")
        .header("authorization", "Bearer forged");
    let _: Value = client.send(request).await.unwrap();

    let sent = client.transport().get_last_request().unwrap();
    assert_eq!(sent.header("X-Gym-Id"), Some("g1"));
    assert_ne!(sent.header("Authorization"), Some("Bearer forged"));
    assert_eq!(sent.method, HttpMethod::Get);
}

// ============================================================================
// Token codec
// ============================================================================

#[test]
fn test_codec_round_trip() {
    let claims = TokenCodec::decode(&token(json!({"gymId": "g1", "isAdmin": true}))).unwrap();
    assert_eq!(TokenCodec::extract_tenant_id(&claims).as_deref(), Some("g1"));
    assert!(TokenCodec::extract_is_admin(&claims));

    assert!(matches!(
        TokenCodec::decode("only.two"),
        Err(TokenError::Malformed { .. })
    ));
}

// ============================================================================
// Security events
// ============================================================================

#[tokio::test]
async fn test_events_forwarded_to_channel_sink() {
    let (sink, mut receiver) = ChannelSink::new(8);
    let sinks: Vec<Arc<dyn SecurityEventSink>> = vec![Arc::new(sink)];
    let events = Arc::new(SecurityEventLogger::with_sinks(16, sinks));

    let client = GymApiClient::from_parts(
        config(),
        Arc::new(MockHttpTransport::new()),
        Arc::new(InMemorySessionStore::new()),
        events,
    );

    let _ = client.get::<Value>("/admin/sessions").await;

    let forwarded = receiver.recv().await.unwrap();
    assert_eq!(forwarded.kind, SecurityEventKind::SecurityViolation);
    assert_eq!(forwarded.url.as_deref(), Some("/admin/sessions"));
}

// ============================================================================
// Mock backend
// ============================================================================

#[cfg(feature = "mock-backend")]
#[tokio::test]
async fn test_mock_backend_session_lifecycle() {
    let client = GymApiClient::new(PipelineConfig {
        mock_backend: true,
        ..config()
    })
    .unwrap();

    let session = client.login("admin@gym.test", "admin-password").await.unwrap();
    assert_eq!(session.tenant_id().as_deref(), Some("gym-1"));
    assert!(session.is_admin());

    let echoed: Value = client.get("/customers").await.unwrap();
    assert_eq!(echoed["gymId"], "gym-1");

    let sessions = client.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].current);

    let (_, rotated) = client
        .coordinator()
        .refresh(session.tenant_id(), session.access_token(), ApiRequest::get("/customers"))
        .await
        .unwrap();
    assert_ne!(rotated.refresh_token(), session.refresh_token());

    client.logout().await.unwrap();
    assert!(client.current_session().await.unwrap().is_none());

    let denied: Result<Value, _> = client.get("/customers").await;
    assert!(matches!(denied, Err(PipelineError::Token(TokenError::Missing))));
}

#[cfg(feature = "mock-backend")]
#[tokio::test]
async fn test_mock_backend_rejects_staff_on_admin_routes() {
    let client = GymApiClient::new(PipelineConfig {
        mock_backend: true,
        ..config()
    })
    .unwrap();

    client.login("staff@gym.test", "staff-password").await.unwrap();

    let result = client.list_sessions().await;
    assert!(matches!(
        result,
        Err(PipelineError::Authorization(AuthorizationError::Denied { .. }))
    ));

    let bad = client.login("staff@gym.test", "wrong").await;
    assert!(bad.is_err());
}
