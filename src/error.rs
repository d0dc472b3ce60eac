//! Error types for the delivery middleware.

use thiserror::Error;

use crate::request::RequestId;

/// Result type alias using the backhaul error type.
pub type Result<T> = std::result::Result<T, BackhaulError>;

/// Main error type for the delivery middleware.
///
/// Transport-level failures (`Timeout`, `Transport`, `HttpClient`) are
/// internal: the router converts them into a queued `202` response rather
/// than surfacing them to the caller. Storage failures are fatal for the
/// enclosing call and do surface.
#[derive(Error, Debug)]
pub enum BackhaulError {
    /// The middleware was used before `initialize` completed.
    #[error("Middleware not initialized")]
    NotInitialized,

    /// The durable queue is at capacity; the caller may retry after a drain.
    #[error("Queue is full: {pending} pending of {max} allowed")]
    QueueFull { pending: u64, max: usize },

    /// Encoded SMS would exceed the 160-character wire limit.
    #[error("Encoded SMS is {length} characters, limit is 160")]
    SmsTooLarge { length: usize },

    /// SMS permissions were denied by the platform.
    #[error("SMS permission denied")]
    PermissionDenied,

    /// An HTTP attempt exceeded its deadline.
    #[error("HTTP request timed out")]
    Timeout,

    /// Transport-level failure below the HTTP layer.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A queued request passed its expiry deadline.
    #[error("Request expired: {0}")]
    Expired(RequestId),

    /// A queued request exhausted its retry budget.
    #[error("Maximum retries exceeded: {0}")]
    MaxRetriesExceeded(RequestId),

    /// HTTP client error.
    #[error("HTTP request failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Persistent store error.
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Migration error while preparing the persistent store.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error from anyhow.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackhaulError {
    /// True for failures the queue should retry: the attempt never produced
    /// a server response.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            BackhaulError::Timeout | BackhaulError::Transport(_) | BackhaulError::HttpClient(_)
        )
    }
}
