//! Core types for the delivery middleware.
//!
//! This module defines the request/response model shared by the router and
//! the queue: what the caller submits, what the caller gets back, and how a
//! request looks while it waits in the durable queue.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// HTTP methods accepted by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }

    /// True if the method carries a request body on the wire.
    pub fn has_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(format!("Invalid HTTP method: {}", other)),
        }
    }
}

/// Priority of a request, ordered LOW < NORMAL < HIGH < CRITICAL.
///
/// The numeric weight is what the store persists and orders by; it matches
/// the original wire values (3/5/8/10) so existing rows stay comparable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn weight(&self) -> i64 {
        match self {
            Priority::Low => 3,
            Priority::Normal => 5,
            Priority::High => 8,
            Priority::Critical => 10,
        }
    }

    pub fn from_weight(weight: i64) -> Option<Self> {
        match weight {
            3 => Some(Priority::Low),
            5 => Some(Priority::Normal),
            8 => Some(Priority::High),
            10 => Some(Priority::Critical),
            _ => None,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// Structured request body: a flat key -> value map serialized as JSON on
/// both the persistence and wire paths.
pub type Body = serde_json::Map<String, serde_json::Value>;

/// An outbound request submitted to the middleware.
///
/// Immutable once submitted; the router and queue only ever read it.
///
/// # Example
/// ```
/// use backhaul::request::{Method, Priority, Request};
///
/// let request = Request::new(Method::Post, "https://api.example.com/transfer")
///     .priority(Priority::High)
///     .sms_eligible(true)
///     .idempotency_key("op-20260802-0001");
/// assert_eq!(request.method.as_str(), "POST");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// HTTP method.
    pub method: Method,

    /// Full target URL.
    pub url: String,

    /// Header name -> value map.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Structured body, absent for body-less requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,

    /// Routing priority.
    #[serde(default)]
    pub priority: Priority,

    /// Whether this request may travel over the SMS fallback channel.
    #[serde(default)]
    pub sms_eligible: bool,

    /// Caller-supplied cross-attempt identity. Sent as the
    /// `Idempotency-Key` header on every HTTP attempt so the server can
    /// deduplicate SMS-then-HTTP double deliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// Per-request HTTP timeout override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request with default routing attributes (NORMAL priority,
    /// not SMS-eligible).
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            priority: Priority::Normal,
            sms_eligible: false,
            idempotency_key: None,
            timeout: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn sms_eligible(mut self, eligible: bool) -> Self {
        self.sms_eligible = eligible;
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Delivery channel that produced a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    /// Delivered directly over HTTP.
    Network,
    /// Durably accepted into the retry queue; delivery is in progress.
    CacheQueued,
    /// Delivered (or attempted) over the SMS fallback channel.
    Sms,
}

/// What the caller gets back from `execute`: always a response, never a
/// transport error. The origin and status code together tell the caller
/// whether the request was delivered, accepted for retry, or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status_code: u16,
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub origin: Origin,
}

impl Response {
    /// A `202 Accepted` for a request that was durably queued.
    pub fn queued(id: &RequestId) -> Self {
        Self {
            status_code: 202,
            body: serde_json::json!({ "id": id.as_str(), "status": "queued" }).to_string(),
            headers: HashMap::new(),
            origin: Origin::CacheQueued,
        }
    }

    /// A `200` for a request handed to the SMS gateway.
    pub fn sms_delivered() -> Self {
        Self {
            status_code: 200,
            body: String::new(),
            headers: HashMap::new(),
            origin: Origin::Sms,
        }
    }

    /// A `503` for an SMS attempt that could not be sent.
    pub fn sms_unavailable() -> Self {
        Self {
            status_code: 503,
            body: String::new(),
            headers: HashMap::new(),
            origin: Origin::Sms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code < 300
    }
}

/// Unique identifier for a queued request.
///
/// Either 16 hex characters derived from `sha256(method || url || millis)`,
/// or the caller's idempotency key verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId(s.to_string())
    }
}

impl std::ops::Deref for RequestId {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Lifecycle state of a queued request.
///
/// `Completed` and `Expired` rows are deleted once their callbacks fire;
/// `Failed` rows are kept for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Expired,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
            QueueStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Expired
        )
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            "expired" => Ok(QueueStatus::Expired),
            other => Err(format!("Invalid queue status: {}", other)),
        }
    }
}

/// A request at rest in the durable queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: RequestId,
    pub request: Request,
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: QueueStatus,
}

impl QueuedRequest {
    /// An expiry deadline at or before `now` counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    /// Whether the retry budget is spent.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_follows_weights() {
        assert!(Priority::Low < Priority::Normal);
        assert!(Priority::Normal < Priority::High);
        assert!(Priority::High < Priority::Critical);
        assert_eq!(Priority::from_weight(8), Some(Priority::High));
        assert_eq!(Priority::from_weight(7), None);
    }

    #[test]
    fn method_round_trips_through_str() {
        for method in [Method::Get, Method::Post, Method::Put, Method::Delete] {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
        assert!("PATCH".parse::<Method>().is_err());
    }

    #[test]
    fn request_json_round_trip_is_structural() {
        let mut body = Body::new();
        body.insert("amount".to_string(), serde_json::json!(5000));
        body.insert("user".to_string(), serde_json::json!("alice"));

        let request = Request::new(Method::Post, "https://api.example.com/transfer")
            .header("X-Trace", "abc")
            .body(body)
            .priority(Priority::Critical)
            .sms_eligible(true)
            .idempotency_key("op-1")
            .timeout(Duration::from_secs(10));

        let json = serde_json::to_string(&request).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let item = QueuedRequest {
            id: RequestId::from("a1b2c3d4e5f60718"),
            request: Request::new(Method::Get, "https://api.example.com/ping"),
            retry_count: 0,
            max_retries: 3,
            created_at: now,
            expires_at: Some(now),
            status: QueueStatus::Pending,
        };
        assert!(item.is_expired(now));
        assert!(!item.is_expired(now - chrono::Duration::milliseconds(1)));
    }
}
