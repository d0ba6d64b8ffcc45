//! HTTP client abstraction for making requests.
//!
//! This module defines the `HttpClient` trait to abstract HTTP request execution,
//! enabling testability with mock implementations.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the API credential is attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <credential>`
    Bearer,
    /// Credential sent verbatim in the named header (e.g. `x-rapidapi-key`)
    Header(String),
}

/// A fully rendered request to a third-party endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiRequest {
    /// HTTP method (e.g., "GET", "POST")
    pub method: String,
    /// The base URL of the target endpoint (e.g., <https://tiktok-scraper.p.rapidapi.com>)
    pub base_url: String,
    /// The path portion of the URL (e.g., "/user/info")
    pub path: String,
    /// Unrendered path this request came from, used as a low-cardinality metric label
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Query string pairs
    #[serde(default)]
    pub query: Vec<(String, String)>,
    /// JSON request body, if any
    #[serde(default)]
    pub body: Option<String>,
    pub auth: AuthScheme,
}

impl ApiRequest {
    /// Key used to match this request against scripted mock responses.
    pub fn route_key(&self) -> String {
        format!("{} {}", self.method.to_uppercase(), self.path)
    }

    /// Label for per-endpoint metrics: the template path when known, else the path.
    pub fn endpoint_label(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(&self.path)
    }
}

/// Response from an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body as a string
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Trait for executing HTTP requests.
///
/// This abstraction allows for different implementations (production vs. testing)
/// and keeps the retry and batch logic testable without making real HTTP calls.
///
/// # Example
/// ```ignore
/// let client = ReqwestHttpClient::new();
/// let response = client.execute(&request, "api-key", 5000).await?;
/// println!("Status: {}, Body: {}", response.status, response.body);
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync + Clone {
    /// Execute a single physical HTTP request.
    ///
    /// # Arguments
    /// * `request` - The rendered request
    /// * `credential` - API credential, attached according to `request.auth`
    /// * `timeout_ms` - Request timeout in milliseconds
    ///
    /// Any HTTP status, including 4xx and 5xx, is a successful `HttpResponse`.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The request fails due to network issues
    /// - The request times out
    /// - The URL or method is invalid
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: &str,
        timeout_ms: u64,
    ) -> Result<HttpResponse>;
}

// ============================================================================
// Production Implementation using reqwest
// ============================================================================

/// Production HTTP client using reqwest.
#[derive(Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already configured reqwest client (proxies, custom TLS, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[tracing::instrument(skip(self, request, credential), fields(method = %request.method, path = %request.path))]
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: &str,
        timeout_ms: u64,
    ) -> Result<HttpResponse> {
        let url = format!("{}{}", request.base_url, request.path);

        tracing::debug!(url = %url, timeout_ms, "Executing HTTP request");

        let method: reqwest::Method = request.method.to_uppercase().parse().map_err(|e| {
            tracing::warn!(method = %request.method, error = %e, "Invalid HTTP method");
            anyhow::anyhow!("Invalid HTTP method '{}': {}", request.method, e)
        })?;

        let mut req = self
            .client
            .request(method, &url)
            .timeout(Duration::from_millis(timeout_ms));

        if !request.query.is_empty() {
            req = req.query(&request.query);
        }

        // Only add the credential if one was supplied
        if !credential.is_empty() {
            req = match &request.auth {
                AuthScheme::Bearer => req.bearer_auth(credential),
                AuthScheme::Header(name) => req.header(name.as_str(), credential),
            };
        }

        if let Some(body) = &request.body {
            req = req
                .header("Content-Type", "application/json")
                .body(body.clone());
            tracing::trace!(body_len = body.len(), "Added request body");
        }

        let response = req.send().await.map_err(|e| {
            tracing::warn!(url = %url, error = %e, "HTTP request failed");
            e
        })?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(status, response_len = body.len(), "HTTP request completed");

        Ok(HttpResponse { status, body })
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Mock HTTP client for testing.
///
/// Responses are scripted per route key (`"{METHOD} {path}"`) and handed out in FIFO order.
///
/// # Example
/// ```ignore
/// let mock = MockHttpClient::new();
/// mock.add_response("GET /user/info", Ok(HttpResponse::with_status(429, "slow down")));
/// mock.add_response("GET /user/info", Ok(HttpResponse::ok(r#"{"stats":{"followerCount":10}}"#)));
/// ```
#[derive(Clone, Default)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, VecDeque<Result<HttpResponse>>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
}

/// Record of a call made to the mock HTTP client.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub credential: String,
    pub timeout_ms: u64,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for a route key. Multiple responses for the same key are
    /// returned in FIFO order.
    pub fn add_response(&self, key: &str, response: Result<HttpResponse>) {
        self.responses
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue the same response `times` times.
    pub fn add_responses(&self, key: &str, times: usize, response: HttpResponse) {
        for _ in 0..times {
            self.add_response(key, Ok(response.clone()));
        }
    }

    /// Get all calls that have been made to this mock client.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Credentials used by each call, in call order.
    pub fn credentials_used(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|c| c.credential.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Get the number of requests currently executing.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(
        &self,
        request: &ApiRequest,
        credential: &str,
        timeout_ms: u64,
    ) -> Result<HttpResponse> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
        };

        self.calls.lock().push(MockCall {
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            body: request.body.clone(),
            credential: credential.to_string(),
            timeout_ms,
        });

        // Let concurrent callers interleave the way real network calls would
        tokio::task::yield_now().await;

        let key = request.route_key();
        let scripted = self
            .responses
            .lock()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(response) => response,
            None => Err(crate::error::VolleyError::Other(anyhow::anyhow!(
                "No mock response configured for {}",
                key
            ))),
        }
    }
}

/// Decrements the in-flight counter when dropped, even if the call is cancelled.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, path: &str) -> ApiRequest {
        ApiRequest {
            method: method.to_string(),
            base_url: "https://api.example.com".to_string(),
            path: path.to_string(),
            endpoint: None,
            query: vec![("unique_id".to_string(), "creator".to_string())],
            body: None,
            auth: AuthScheme::Header("x-rapidapi-key".to_string()),
        }
    }

    #[test]
    fn test_endpoint_label_prefers_template_path() {
        let mut req = request("GET", "/user/a%2Fb/videos");
        assert_eq!(req.endpoint_label(), "/user/a%2Fb/videos");

        req.endpoint = Some("/user/{identifier}/videos".to_string());
        assert_eq!(req.endpoint_label(), "/user/{identifier}/videos");
    }

    #[tokio::test]
    async fn test_mock_client_basic() {
        let mock = MockHttpClient::new();
        mock.add_response("GET /user/info", Ok(HttpResponse::ok("success")));

        let response = mock
            .execute(&request("GET", "/user/info"), "key-a", 5000)
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "success");

        let calls = mock.get_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].path, "/user/info");
        assert_eq!(calls[0].credential, "key-a");
        assert_eq!(calls[0].query[0].1, "creator");
        assert_eq!(mock.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_client_fifo_order() {
        let mock = MockHttpClient::new();
        mock.add_response("GET /status", Ok(HttpResponse::with_status(429, "")));
        mock.add_response("GET /status", Ok(HttpResponse::ok("second")));

        let req = request("get", "/status");
        let first = mock.execute(&req, "k", 5000).await.unwrap();
        assert_eq!(first.status, 429);

        let second = mock.execute(&req, "k", 5000).await.unwrap();
        assert_eq!(second.body, "second");

        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_client_no_response() {
        let mock = MockHttpClient::new();
        let result = mock.execute(&request("POST", "/unknown"), "k", 5000).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_route_key_uppercases_method() {
        assert_eq!(request("post", "/v1/chat").route_key(), "POST /v1/chat");
    }
}
