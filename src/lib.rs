//! Resilience middleware for outbound HTTP traffic on unreliable networks.
//!
//! This crate fronts an application's outbound requests and guarantees
//! eventual delivery across intermittent connectivity. Each call is routed
//! over one of three channels based on a live network-quality score: direct
//! HTTP, a durable local queue with background retry, or a fallback SMS
//! transport that compresses the request into a single 160-character text
//! message to a trusted gateway number.
//!
//! The entry point is [`Middleware`]: construct one with
//! [`Middleware::builder`], call [`Middleware::initialize`], then route
//! everything through [`Middleware::execute`].

pub mod error;
pub mod escalation;
pub mod http;
pub mod network;
pub mod queue;
pub mod request;
pub mod router;
pub mod sms;
pub mod storage;

// Re-export commonly used types
pub use error::{BackhaulError, Result};
pub use http::{HttpClient, HttpResponse, MockHttpClient, ReqwestHttpClient};
pub use network::{
    ConnectivitySource, LatencyProbe, NetworkEstimator, NetworkStatus, NetworkType,
    StaticConnectivitySource, StaticLatencyProbe,
};
pub use queue::{DeliveryHooks, NoopHooks, QueueManager, QueueStats};
pub use request::{
    Body, Method, Origin, Priority, QueueStatus, QueuedRequest, Request, RequestId, Response,
};
pub use router::{
    ConfigUpdate, InitOptions, Middleware, MiddlewareBuilder, MiddlewareConfig, RoutingPolicy,
    Strategy,
};
pub use sms::transport::{
    CostApprover, FlatRateCostProvider, InboundSms, MockSmsTransport, SmsCostProvider,
    SmsTransport,
};
pub use storage::{MemoryQueueStore, QueueStore, SqliteQueueStore};

/// Get the backhaul database migrator.
///
/// Returns a migrator that can be run against a connection pool; the
/// SQLite store applies it automatically on open.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}
