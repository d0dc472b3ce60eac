//! HTTP client abstraction for making delivery attempts.
//!
//! This module defines the `HttpClient` trait to abstract HTTP request
//! execution, enabling testability with mock implementations. One call is
//! one attempt: retry policy lives in the queue manager, never here.

use crate::error::{BackhaulError, Result};
use crate::request::Request;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Header used to carry the caller's cross-attempt identity to the server.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Response from an HTTP attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Response body as a string
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for executing HTTP requests.
///
/// This abstraction allows for different implementations (production vs.
/// testing) and makes the routing and drain logic testable without making
/// real HTTP calls.
///
/// # Errors
/// `execute` distinguishes [`BackhaulError::Timeout`] from other transport
/// failures so callers can report the deadline case precisely; both classes
/// route the request into the durable queue.
#[async_trait]
pub trait HttpClient: Send + Sync + Clone {
    /// Execute one HTTP attempt with the given timeout.
    async fn execute(&self, request: &Request, timeout: Duration) -> Result<HttpResponse>;
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
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: &Request, timeout: Duration) -> Result<HttpResponse> {
        let method = match request.method {
            crate::request::Method::Get => reqwest::Method::GET,
            crate::request::Method::Post => reqwest::Method::POST,
            crate::request::Method::Put => reqwest::Method::PUT,
            crate::request::Method::Delete => reqwest::Method::DELETE,
        };

        let mut req = self
            .client
            .request(method, request.url.as_str())
            .timeout(timeout);

        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        // The idempotency key is the server's only handle for deduplicating
        // SMS-then-HTTP double deliveries; send it on every attempt.
        if let Some(key) = &request.idempotency_key
            && !request.headers.contains_key(IDEMPOTENCY_HEADER)
        {
            req = req.header(IDEMPOTENCY_HEADER, key.as_str());
        }

        if let Some(body) = &request.body
            && request.method.has_body()
        {
            if !request.headers.contains_key("Content-Type") {
                req = req.header("Content-Type", "application/json");
            }
            req = req.body(serde_json::to_string(body)?);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                tracing::warn!(url = %request.url, "HTTP request timed out");
                BackhaulError::Timeout
            } else {
                tracing::warn!(url = %request.url, error = %e, "HTTP request failed");
                BackhaulError::HttpClient(e)
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                BackhaulError::Timeout
            } else {
                BackhaulError::HttpClient(e)
            }
        })?;

        tracing::debug!(status, response_len = body.len(), "HTTP attempt completed");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

/// Mock HTTP client for testing.
///
/// Allows configuring predetermined responses for specific requests without
/// making actual HTTP calls. The key is formatted as `"{METHOD} {url}"`;
/// multiple responses for the same key are returned in FIFO order, and a
/// request with no configured response fails with a transport error (which
/// the router treats as undeliverable and queues).
///
/// # Example
/// ```
/// use backhaul::http::{HttpResponse, MockHttpClient};
/// use std::collections::HashMap;
///
/// let mock = MockHttpClient::new();
/// mock.add_response(
///     "POST https://api.example.com/transfer",
///     Ok(HttpResponse { status: 200, headers: HashMap::new(), body: "ok".to_string() }),
/// );
/// ```
#[derive(Clone)]
pub struct MockHttpClient {
    responses: Arc<Mutex<HashMap<String, Vec<MockResponse>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
}

/// A mock response that can optionally wait for a trigger before completing.
enum MockResponse {
    /// Immediate response
    Immediate(Result<HttpResponse>),
    /// Response that waits for a trigger signal before completing
    Triggered {
        response: Result<HttpResponse>,
        trigger: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
    },
}

/// Record of a call made to the mock HTTP client.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub idempotency_key: Option<String>,
    pub timeout: Duration,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a predetermined response for a `"{METHOD} {url}"` key.
    pub fn add_response(&self, key: &str, response: Result<HttpResponse>) {
        self.responses
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(MockResponse::Immediate(response));
    }

    /// Shorthand for a plain-status response with the given body.
    pub fn add_status(&self, key: &str, status: u16, body: &str) {
        self.add_response(
            key,
            Ok(HttpResponse {
                status,
                headers: HashMap::new(),
                body: body.to_string(),
            }),
        );
    }

    /// Add a response that waits for a manual trigger before completing.
    ///
    /// Returns a sender; sending `()` (or dropping it) completes the
    /// request with the given response.
    pub fn add_response_with_trigger(
        &self,
        key: &str,
        response: Result<HttpResponse>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.responses
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(MockResponse::Triggered {
                response,
                trigger: Arc::new(Mutex::new(Some(rx))),
            });
        tx
    }

    /// Get all calls that have been made to this mock client.
    pub fn get_calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Requests currently executing; useful for concurrency assertions.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl Default for MockHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn execute(&self, request: &Request, timeout: Duration) -> Result<HttpResponse> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        // Guard to ensure we decrement even if cancelled/panicked
        let in_flight = self.in_flight.clone();
        let _guard = scopeguard::guard((), move |_| {
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        self.calls.lock().push(MockCall {
            method: request.method.to_string(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request
                .body
                .as_ref()
                .map(|b| serde_json::to_string(b).unwrap_or_default()),
            idempotency_key: request.idempotency_key.clone(),
            timeout,
        });

        let key = format!("{} {}", request.method, request.url);
        let mock_response = {
            let mut responses = self.responses.lock();
            responses.get_mut(&key).and_then(|queue| {
                if queue.is_empty() {
                    None
                } else {
                    Some(queue.remove(0))
                }
            })
        };

        match mock_response {
            Some(MockResponse::Immediate(response)) => response,
            Some(MockResponse::Triggered { response, trigger }) => {
                let rx = trigger.lock().take();
                if let Some(rx) = rx {
                    // Wait for trigger (ignore the result - we proceed either way)
                    let _ = rx.await;
                }
                response
            }
            None => Err(BackhaulError::Transport(format!(
                "no route to {} {}",
                request.method, request.url
            ))),
        }
    }
}
