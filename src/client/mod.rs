//! Rate-limit aware API client.
//!
//! [`RateLimitedApiClient`] wraps an [`HttpClient`] and turns one *logical* call into as many
//! physical attempts as rate limiting requires:
//!
//! ```text
//! call() ──pick credential──> attempt 1 ──429──> sleep(backoff 0) ──> attempt 2 ──429──> ...
//!                                 │                                      │
//!                                 ├─2xx──> Ok(RawResponse)               └─ max_attempts reached
//!                                 ├─other status──> Err(RequestFailed)        ──> Err(RateLimitExceeded)
//!                                 └─no response──> Err(Transport)
//! ```
//!
//! Only rate-limit responses are retried. Backoff for retry `r` (starting at 0) is
//! `min(backoff_ms * backoff_factor^r, max_backoff_ms)`, i.e. 1.5s, 3s, 6s, 10s, 10s with the
//! defaults.
//!
//! The credential is chosen once per logical call from the round-robin [`CredentialPool`];
//! retries of that call reuse it.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::error::{CallError, Result, VolleyError};
use crate::http::{ApiRequest, HttpClient, HttpResponse};

mod credentials;

pub use credentials::CredentialPool;

/// Predicate deciding whether a response is a rate-limit signal.
pub type ShouldRetryFn = Arc<dyn Fn(&HttpResponse) -> bool + Send + Sync>;

/// Default rate-limit predicate: HTTP 429.
pub fn default_is_rate_limited(response: &HttpResponse) -> bool {
    response.status == 429
}

fn default_is_rate_limited_fn() -> ShouldRetryFn {
    Arc::new(default_is_rate_limited)
}

/// Configuration for the rate-limited client.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Maximum physical attempts per logical call, including the first
    pub max_attempts: u32,

    /// Base backoff duration in milliseconds (will be exponentially increased)
    pub backoff_ms: u64,

    /// Factor by which the backoff is multiplied with each retry
    pub backoff_factor: u64,

    /// Maximum backoff time in milliseconds
    pub max_backoff_ms: u64,

    /// Timeout for each physical attempt in milliseconds
    pub timeout_ms: u64,

    /// Predicate identifying rate-limit responses. Defaults to HTTP 429.
    #[serde(skip, default = "default_is_rate_limited_fn")]
    pub is_rate_limited: ShouldRetryFn,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 1500,
            backoff_factor: 2,
            max_backoff_ms: 10_000,
            timeout_ms: 30_000,
            is_rate_limited: default_is_rate_limited_fn(),
        }
    }
}

impl ClientConfig {
    /// Delay before retry number `retry` (0 for the first retry).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponential = self
            .backoff_ms
            .saturating_mul(self.backoff_factor.saturating_pow(retry));
        Duration::from_millis(exponential.min(self.max_backoff_ms))
    }
}

/// A successful (2xx) response together with the attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    /// Physical attempts made, including rate-limited ones
    pub attempts: u32,
}

impl RawResponse {
    /// The body as JSON. A body that is not valid JSON is returned as a JSON string.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::from_str(&self.body)
            .unwrap_or_else(|_| serde_json::Value::String(self.body.clone()))
    }
}

/// HTTP client that retries rate-limited calls and spreads load over a credential pool.
#[derive(Clone)]
pub struct RateLimitedApiClient<H: HttpClient> {
    http: H,
    credentials: CredentialPool,
    config: ClientConfig,
}

impl<H: HttpClient> RateLimitedApiClient<H> {
    pub fn new(http: H, credentials: CredentialPool, config: ClientConfig) -> Result<Self> {
        if config.max_attempts == 0 {
            return Err(VolleyError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            http,
            credentials,
            config,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialPool {
        &self.credentials
    }

    /// Perform one logical call.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn call(&self, request: &ApiRequest) -> std::result::Result<RawResponse, CallError> {
        let credential = self.credentials.next_credential();
        let mut attempts = 0;

        loop {
            attempts += 1;
            tracing::debug!(attempt = attempts, "Sending request");

            let response = match self
                .http
                .execute(request, credential, self.config.timeout_ms)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(attempt = attempts, error = %e, "Request failed before a response");
                    return Err(CallError::Transport {
                        message: e.to_string(),
                        attempts,
                    });
                }
            };

            if (self.config.is_rate_limited)(&response) {
                let endpoint = request.endpoint_label().to_string();
                counter!("volley_rate_limited_total", "endpoint" => endpoint.clone()).increment(1);

                if attempts >= self.config.max_attempts {
                    counter!("volley_retry_exhausted_total", "endpoint" => endpoint).increment(1);
                    tracing::warn!(
                        attempts,
                        max_attempts = self.config.max_attempts,
                        "Rate limited on every attempt, giving up"
                    );
                    return Err(CallError::RateLimitExceeded { attempts });
                }

                let backoff = self.config.backoff_for(attempts - 1);
                tracing::warn!(
                    attempt = attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(backoff).await;
                continue;
            }

            if !(200..300).contains(&response.status) {
                tracing::warn!(
                    attempt = attempts,
                    status = response.status,
                    "Request failed with non-retryable status"
                );
                return Err(CallError::RequestFailed {
                    status: response.status,
                    body: response.body,
                    attempts,
                });
            }

            return Ok(RawResponse {
                status: response.status,
                body: response.body,
                attempts,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{AuthScheme, MockHttpClient};

    fn request() -> ApiRequest {
        ApiRequest {
            method: "GET".to_string(),
            base_url: "https://api.example.com".to_string(),
            path: "/user/info".to_string(),
            endpoint: None,
            query: vec![],
            body: None,
            auth: AuthScheme::Header("x-api-key".to_string()),
        }
    }

    fn client(mock: &MockHttpClient, keys: &[&str]) -> RateLimitedApiClient<MockHttpClient> {
        let pool = CredentialPool::new(keys.iter().map(|k| k.to_string()).collect()).unwrap();
        RateLimitedApiClient::new(mock.clone(), pool, ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = ClientConfig::default();
        let delays: Vec<u64> = (0..5)
            .map(|r| config.backoff_for(r).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1500, 3000, 6000, 10_000, 10_000]);
    }

    #[test]
    fn test_backoff_saturates_on_huge_retry_numbers() {
        let config = ClientConfig::default();
        assert_eq!(config.backoff_for(200), Duration::from_millis(10_000));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let config = ClientConfig {
            max_attempts: 0,
            ..Default::default()
        };
        let pool = CredentialPool::new(vec!["k".into()]).unwrap();
        assert!(RateLimitedApiClient::new(MockHttpClient::new(), pool, config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_rate_limit_then_succeeds() {
        let mock = MockHttpClient::new();
        mock.add_responses("GET /user/info", 2, HttpResponse::with_status(429, "slow down"));
        mock.add_response("GET /user/info", Ok(HttpResponse::ok(r#"{"ok":true}"#)));

        let client = client(&mock, &["k1", "k2"]);
        let started = tokio::time::Instant::now();
        let response = client.call(&request()).await.unwrap();

        assert_eq!(response.attempts, 3);
        assert_eq!(response.payload()["ok"], true);
        // 1500ms + 3000ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(4500));
        // Rotation is per logical call, so every retry reuses the first key
        assert_eq!(mock.credentials_used(), vec!["k1", "k1", "k1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let mock = MockHttpClient::new();
        mock.add_responses("GET /user/info", 6, HttpResponse::with_status(429, ""));

        let client = client(&mock, &["k1"]);
        let err = client.call(&request()).await.unwrap_err();

        assert_eq!(err, CallError::RateLimitExceeded { attempts: 5 });
        assert_eq!(mock.call_count(), 5);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let mock = MockHttpClient::new();
        mock.add_response("GET /user/info", Ok(HttpResponse::with_status(503, "down")));
        mock.add_response("GET /user/info", Ok(HttpResponse::ok("{}")));

        let client = client(&mock, &["k1"]);
        let err = client.call(&request()).await.unwrap_err();

        assert_eq!(
            err,
            CallError::RequestFailed {
                status: 503,
                body: "down".to_string(),
                attempts: 1
            }
        );
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_are_not_retried() {
        let mock = MockHttpClient::new();
        mock.add_response(
            "GET /user/info",
            Err(VolleyError::Other(anyhow::anyhow!("connection reset"))),
        );

        let client = client(&mock, &["k1"]);
        let err = client.call(&request()).await.unwrap_err();

        assert!(matches!(err, CallError::Transport { attempts: 1, .. }));
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_credentials_rotate_between_calls() {
        let mock = MockHttpClient::new();
        mock.add_responses("GET /user/info", 4, HttpResponse::ok("{}"));

        let client = client(&mock, &["k1", "k2", "k3"]);
        for _ in 0..4 {
            client.call(&request()).await.unwrap();
        }

        assert_eq!(mock.credentials_used(), vec!["k1", "k2", "k3", "k1"]);
    }

    #[tokio::test]
    async fn test_custom_rate_limit_predicate() {
        let mock = MockHttpClient::new();
        mock.add_response("GET /user/info", Ok(HttpResponse::with_status(503, "")));
        mock.add_response("GET /user/info", Ok(HttpResponse::ok("{}")));

        let config = ClientConfig {
            backoff_ms: 1,
            is_rate_limited: Arc::new(|r: &HttpResponse| r.status == 429 || r.status == 503),
            ..Default::default()
        };
        let pool = CredentialPool::new(vec!["k".into()]).unwrap();
        let client = RateLimitedApiClient::new(mock.clone(), pool, config).unwrap();

        let response = client.call(&request()).await.unwrap();
        assert_eq!(response.attempts, 2);
    }

    #[test]
    fn test_non_json_body_is_a_string_payload() {
        let raw = RawResponse {
            status: 200,
            body: "plain words".to_string(),
            attempts: 1,
        };
        assert_eq!(raw.payload(), serde_json::Value::String("plain words".into()));
    }
}
