//! Mock Backend
//!
//! In-process stand-in for the gym admin API, substituted at the transport
//! boundary for local development. Issues signed HS256 tokens, rotates
//! refresh tokens and serves the session-management endpoints.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{Rng, RngCore};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::{HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestHttpTransport};
use crate::error::PipelineError;
use crate::types::{claims::fields, Claims, PipelineConfig, SessionInfo};

const DEV_SIGNING_SECRET: &[u8] = b"gym-admin-local-development-secret";

/// Account known to the mock backend.
#[derive(Clone, Debug)]
pub struct MockAccount {
    pub email: String,
    pub password: String,
    pub member_id: String,
    pub gym_id: String,
    pub is_admin: bool,
    pub first_name: String,
    pub last_name: String,
}

impl MockAccount {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        gym_id: impl Into<String>,
    ) -> Self {
        let email = email.into();
        Self {
            member_id: format!("member-{}", email.split('@').next().unwrap_or("user")),
            email,
            password: password.into(),
            gym_id: gym_id.into(),
            is_admin: false,
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
        }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn named(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = first.into();
        self.last_name = last.into();
        self
    }
}

#[derive(Clone, Debug)]
struct ServerSession {
    info: SessionInfo,
    email: String,
    refresh_token: String,
}

#[derive(Default)]
struct BackendState {
    accounts: HashMap<String, MockAccount>,
    sessions: Vec<ServerSession>,
    refresh_calls: usize,
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    refresh_token: String,
}

/// In-process mock of the gym admin API.
pub struct MockBackendTransport {
    base_path: String,
    access_ttl: ChronoDuration,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    state: Mutex<BackendState>,
}

impl MockBackendTransport {
    /// Create a backend mounted under `base_url`'s path, seeded with an
    /// admin and a staff account for gym `gym-1`.
    pub fn new(base_url: &str) -> Self {
        let base_path = url::Url::parse(base_url)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default();

        let backend = Self {
            base_path,
            access_ttl: ChronoDuration::minutes(15),
            encoding_key: EncodingKey::from_secret(DEV_SIGNING_SECRET),
            decoding_key: DecodingKey::from_secret(DEV_SIGNING_SECRET),
            state: Mutex::new(BackendState::default()),
        };
        backend
            .with_account(
                MockAccount::new("admin@gym.test", "admin-password", "gym-1")
                    .admin()
                    .named("Ada", "Admin"),
            )
            .with_account(
                MockAccount::new("staff@gym.test", "staff-password", "gym-1").named("Sam", "Staff"),
            )
    }

    pub fn with_account(self, account: MockAccount) -> Self {
        self.lock().accounts.insert(account.email.clone(), account);
        self
    }

    /// Lifetime of issued access tokens.
    pub fn with_access_ttl(mut self, ttl: ChronoDuration) -> Self {
        self.access_ttl = ttl;
        self
    }

    /// Number of refresh calls served.
    pub fn refresh_calls(&self) -> usize {
        self.lock().refresh_calls
    }

    /// Number of live server-side sessions.
    pub fn active_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn route<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.base_path.as_str()).unwrap_or(path)
    }

    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let path = request.path();
        let route = self.route(&path).trim_end_matches('/');

        match (request.method, route) {
            (HttpMethod::Post, "/admin/login") => self.login(request),
            (HttpMethod::Post, "/admin/refresh-token") => self.refresh(request),
            (HttpMethod::Post, "/admin/forgot-password")
            | (HttpMethod::Post, "/admin/reset-password") => {
                ok(json!(null), "If the account exists, an email has been sent")
            }
            _ => match self.authenticate(request) {
                Some(claims) => self.authenticated(request, route, &claims),
                None => fail(401, "Invalid or expired token"),
            },
        }
    }

    fn authenticated(&self, request: &HttpRequest, route: &str, claims: &Value) -> HttpResponse {
        let email = claims.get("email").and_then(Value::as_str).unwrap_or_default().to_string();
        let current_id = claims.get("sid").and_then(Value::as_str).unwrap_or_default().to_string();

        match (request.method, route) {
            (HttpMethod::Get, "/admin/sessions") => {
                let sessions: Vec<SessionInfo> = self
                    .lock()
                    .sessions
                    .iter()
                    .filter(|s| s.email == email)
                    .map(|s| SessionInfo {
                        current: s.info.id == current_id,
                        ..s.info.clone()
                    })
                    .collect();
                ok(json!(sessions), "Sessions retrieved")
            }
            (HttpMethod::Post, "/admin/sessions/revoke-all") => {
                let mut state = self.lock();
                let before = state.sessions.len();
                state.sessions.retain(|s| s.email != email || s.info.id == current_id);
                let revoked = before - state.sessions.len();
                ok(json!({ "revoked": revoked }), "Other sessions revoked")
            }
            (HttpMethod::Delete, r) if r.starts_with("/admin/sessions/") => {
                let id = &r["/admin/sessions/".len()..];
                let mut state = self.lock();
                let before = state.sessions.len();
                state.sessions.retain(|s| !(s.email == email && s.info.id == id));
                if state.sessions.len() == before {
                    fail(404, "Session not found")
                } else {
                    ok(json!(null), "Session revoked")
                }
            }
            (HttpMethod::Post, "/admin/logout") => {
                self.lock().sessions.retain(|s| s.info.id != current_id);
                ok(json!(null), "Logged out")
            }
            _ => ok(
                json!({
                    "method": request.method.as_str(),
                    "path": route,
                    "gymId": request.header("X-Gym-Id"),
                    "body": request
                        .body
                        .as_deref()
                        .and_then(|b| serde_json::from_str::<Value>(b).ok()),
                }),
                "OK",
            ),
        }
    }

    fn login(&self, request: &HttpRequest) -> HttpResponse {
        let body: LoginBody = match parse_body(request) {
            Some(body) => body,
            None => return fail(400, "email and password are required"),
        };

        let account = match self.lock().accounts.get(&body.email).cloned() {
            Some(account) if account.password == body.password => account,
            _ => return fail(401, "Invalid credentials"),
        };

        let session_id = random_id();
        let refresh_token = random_token();
        let access_token = match self.mint(&account, &session_id) {
            Ok(token) => token,
            Err(response) => return response,
        };

        let now = Utc::now();
        self.lock().sessions.push(ServerSession {
            info: SessionInfo {
                id: session_id,
                user_agent: request.header("User-Agent").map(str::to_string),
                ip_address: Some("127.0.0.1".to_string()),
                created_at: Some(now),
                last_active_at: Some(now),
                current: false,
            },
            email: account.email,
            refresh_token: refresh_token.clone(),
        });

        ok(
            json!({ "accessToken": access_token, "refreshToken": refresh_token }),
            "Login successful",
        )
    }

    fn refresh(&self, request: &HttpRequest) -> HttpResponse {
        let body: RefreshBody = match parse_body(request) {
            Some(body) => body,
            None => return fail(400, "refreshToken is required"),
        };

        let (account, session_id) = {
            let mut state = self.lock();
            state.refresh_calls += 1;
            let found = state
                .sessions
                .iter()
                .find(|s| s.refresh_token == body.refresh_token)
                .map(|s| (s.email.clone(), s.info.id.clone()));
            let account = found
                .and_then(|(email, id)| state.accounts.get(&email).cloned().map(|a| (a, id)));
            match account {
                Some(found) => found,
                None => return fail(401, "Refresh token is invalid or has been rotated"),
            }
        };

        let access_token = match self.mint(&account, &session_id) {
            Ok(token) => token,
            Err(response) => return response,
        };
        let rotated = random_token();

        {
            let mut state = self.lock();
            if let Some(session) = state.sessions.iter_mut().find(|s| s.info.id == session_id) {
                session.refresh_token = rotated.clone();
                session.info.last_active_at = Some(Utc::now());
            }
        }

        ok(
            json!({ "accessToken": access_token, "refreshToken": rotated }),
            "Token refreshed",
        )
    }

    fn mint(&self, account: &MockAccount, session_id: &str) -> Result<String, HttpResponse> {
        let now = Utc::now();
        let claims = Claims::default()
            .insert(fields::SUBJECT, account.member_id.clone())
            .insert(fields::MEMBER_ID, account.member_id.clone())
            .insert(fields::GYM_ID, account.gym_id.clone())
            .insert(fields::IS_ADMIN, account.is_admin)
            .insert(fields::FIRST_NAME, account.first_name.clone())
            .insert(fields::LAST_NAME, account.last_name.clone())
            .insert(fields::ISSUED_AT, now.timestamp())
            .insert(fields::EXPIRES_AT, (now + self.access_ttl).timestamp())
            .insert("email", account.email.clone())
            .insert("sid", session_id)
            .insert("jti", random_id());

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| {
                tracing::error!(error = %e, "Mock backend failed to sign token");
                fail(500, "Token signing failed")
            })
    }

    fn authenticate(&self, request: &HttpRequest) -> Option<Value> {
        let token = request.header("Authorization")?.strip_prefix("Bearer ")?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let claims = jsonwebtoken::decode::<Value>(token, &self.decoding_key, &validation)
            .ok()?
            .claims;

        // A revoked session's access token stops working immediately.
        let sid = claims.get("sid").and_then(Value::as_str)?;
        let alive = self.lock().sessions.iter().any(|s| s.info.id == sid);
        alive.then_some(claims)
    }
}

#[async_trait]
impl HttpTransport for MockBackendTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PipelineError> {
        let response = self.handle(&request);
        tracing::debug!(
            method = %request.method,
            path = %request.path(),
            status = response.status,
            "Mock backend served request"
        );
        Ok(response)
    }
}

/// Transport selected by configuration: the mock backend when enabled,
/// otherwise a real HTTP client.
pub fn create_pipeline_transport(
    config: &PipelineConfig,
) -> Result<Box<dyn HttpTransport>, PipelineError> {
    if config.mock_backend {
        tracing::info!(base_url = %config.base_url, "Using in-process mock backend");
        return Ok(Box::new(MockBackendTransport::new(&config.base_url)));
    }
    Ok(Box::new(ReqwestHttpTransport::with_options(
        config.timeout,
        crate::core::DEFAULT_MAX_RESPONSE_SIZE,
    )?))
}

fn parse_body<T: serde::de::DeserializeOwned>(request: &HttpRequest) -> Option<T> {
    serde_json::from_str(request.body.as_deref()?).ok()
}

fn ok(data: Value, message: &str) -> HttpResponse {
    HttpResponse::json(200, &json!({ "status": "SUCCESS", "message": message, "data": data }))
}

fn fail(status: u16, message: &str) -> HttpResponse {
    HttpResponse::json(status, &json!({ "status": "FAIL", "message": message, "data": null }))
}

fn random_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
