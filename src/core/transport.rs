//! HTTP Transport
//!
//! HTTP client interface and implementations for backend requests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ConfigurationError, NetworkError, PipelineError};

/// HTTP request definition.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Absolute request URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<String>,
    /// Request timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Header value, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// URL path without query string.
    pub fn path(&self) -> String {
        url::Url::parse(&self.url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| self.url.split('?').next().unwrap_or_default().to_string())
    }
}

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// GET, HEAD and OPTIONS may be re-sent without a key.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP response definition.
#[derive(Clone, Debug)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, lowercased names.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: String,
}

impl HttpResponse {
    /// Response with a status and body.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// JSON response.
    pub fn json<T: serde::Serialize>(status: u16, body: &T) -> Self {
        let mut response = Self::new(status, serde_json::to_string(body).unwrap_or_default());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response
    }

    /// Add a header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Header value, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PipelineError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PipelineError> {
        (**self).send(request).await
    }
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for Box<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PipelineError> {
        (**self).send(request).await
    }
}

/// Largest response body accepted by [`ReqwestHttpTransport`].
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 4 * 1024 * 1024;

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: reqwest::Client,
    default_timeout: Duration,
    max_response_size: usize,
}

impl ReqwestHttpTransport {
    /// Create new transport with default settings.
    pub fn new() -> Result<Self, PipelineError> {
        Self::with_options(Duration::from_secs(30), DEFAULT_MAX_RESPONSE_SIZE)
    }

    /// Create transport with custom options.
    pub fn with_options(
        timeout: Duration,
        max_response_size: usize,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigurationError::InvalidConfig {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            default_timeout: timeout,
            max_response_size,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PipelineError> {
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut req_builder = self.client.request(method, &request.url);

        for (key, value) in &request.headers {
            req_builder = req_builder.header(key, value);
        }

        if let Some(body) = request.body {
            req_builder = req_builder.body(body);
        }

        req_builder = req_builder.timeout(timeout);

        let response = req_builder.send().await.map_err(|e| {
            if e.is_timeout() {
                PipelineError::Network(NetworkError::Timeout { timeout })
            } else {
                PipelineError::Network(NetworkError::ConnectionFailed {
                    message: e.to_string(),
                })
            }
        })?;

        let status = response.status().as_u16();

        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_lowercase(), v.to_string());
            }
        }

        let body = response.text().await.map_err(|e| {
            PipelineError::Network(NetworkError::ConnectionFailed {
                message: format!("Failed to read response body: {}", e),
            })
        })?;

        if body.len() > self.max_response_size {
            return Err(NetworkError::ConnectionFailed {
                message: format!("Response too large: {} bytes", body.len()),
            }
            .into());
        }

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Canned reply for [`MockHttpTransport`].
#[derive(Clone, Debug)]
pub enum MockReply {
    Response(HttpResponse),
    ConnectionFailed(String),
    Timeout,
}

impl From<HttpResponse> for MockReply {
    fn from(response: HttpResponse) -> Self {
        Self::Response(response)
    }
}

impl MockReply {
    fn into_result(self) -> Result<HttpResponse, PipelineError> {
        match self {
            Self::Response(response) => Ok(response),
            Self::ConnectionFailed(message) => {
                Err(NetworkError::ConnectionFailed { message }.into())
            }
            Self::Timeout => Err(NetworkError::Timeout {
                timeout: Duration::from_secs(30),
            }
            .into()),
        }
    }
}

/// Mock HTTP transport for testing.
///
/// Replies are served FIFO, per path first and then from the shared queue.
#[derive(Default)]
pub struct MockHttpTransport {
    replies: Mutex<VecDeque<MockReply>>,
    route_replies: Mutex<HashMap<String, VecDeque<MockReply>>>,
    route_defaults: Mutex<HashMap<String, MockReply>>,
    default_reply: Mutex<Option<MockReply>>,
    request_history: Mutex<Vec<HttpRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply on the shared queue.
    pub fn queue(&self, reply: impl Into<MockReply>) -> &Self {
        self.replies.lock().unwrap().push_back(reply.into());
        self
    }

    /// Queue a JSON response on the shared queue.
    pub fn queue_json_response<T: serde::Serialize>(&self, status: u16, body: &T) -> &Self {
        self.queue(HttpResponse::json(status, body))
    }

    /// Queue a reply for one URL path.
    pub fn queue_for(&self, path: &str, reply: impl Into<MockReply>) -> &Self {
        self.route_replies
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply.into());
        self
    }

    /// Reply used for a path once its queue is empty.
    pub fn set_default_for(&self, path: &str, reply: impl Into<MockReply>) -> &Self {
        self.route_defaults
            .lock()
            .unwrap()
            .insert(path.to_string(), reply.into());
        self
    }

    /// Set default reply when all queues are empty.
    pub fn set_default_response(&self, reply: impl Into<MockReply>) -> &Self {
        *self.default_reply.lock().unwrap() = Some(reply.into());
        self
    }

    /// Delay every reply.
    pub fn set_delay(&self, delay: Duration) -> &Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<HttpRequest> {
        self.request_history.lock().unwrap().clone()
    }

    /// Requests sent to one URL path.
    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        self.get_requests()
            .into_iter()
            .filter(|r| r.path() == path)
            .collect()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<HttpRequest> {
        self.request_history.lock().unwrap().last().cloned()
    }

    /// Clear request history.
    pub fn clear_history(&self) {
        self.request_history.lock().unwrap().clear();
    }

    fn next_reply(&self, path: &str) -> Option<MockReply> {
        if let Some(reply) = self
            .route_replies
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front)
        {
            return Some(reply);
        }

        if let Some(reply) = self.route_defaults.lock().unwrap().get(path).cloned() {
            return Some(reply);
        }

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.default_reply.lock().unwrap().clone())
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, PipelineError> {
        let path = request.path();
        self.request_history.lock().unwrap().push(request);

        let reply = self.next_reply(&path);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        reply
            .unwrap_or_else(|| {
                MockReply::ConnectionFailed("No mock response available".to_string())
            })
            .into_result()
    }
}

/// Create production HTTP transport.
pub fn create_transport(timeout: Option<Duration>) -> Result<ReqwestHttpTransport, PipelineError> {
    match timeout {
        Some(t) => ReqwestHttpTransport::with_options(t, DEFAULT_MAX_RESPONSE_SIZE),
        None => ReqwestHttpTransport::new(),
    }
}

/// Create mock HTTP transport for testing.
pub fn create_mock_transport() -> MockHttpTransport {
    MockHttpTransport::new()
}
