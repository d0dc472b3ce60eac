//! Durable storage for the request queue.
//!
//! This module defines the `QueueStore` trait, which provides the atomic
//! operations the queue manager needs. The store is the single source of
//! truth for pending work; only the queue manager writes to it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::request::{QueueStatus, QueuedRequest, RequestId};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryQueueStore;
pub use sqlite::SqliteQueueStore;

/// Storage trait for persisting and querying queued requests.
///
/// Every operation is atomic per call. A successful `insert` guarantees the
/// row survives a process restart (for durable implementations).
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a queued request. A row carrying the same non-null
    /// idempotency key replaces the earlier one.
    async fn insert(&self, item: &QueuedRequest) -> Result<()>;

    /// Fetch a request by id.
    async fn get_by_id(&self, id: &RequestId) -> Result<Option<QueuedRequest>>;

    /// Set the lifecycle status of a request.
    async fn update_status(&self, id: &RequestId, status: QueueStatus) -> Result<()>;

    /// Bump the retry counter by one.
    async fn increment_retry(&self, id: &RequestId) -> Result<()>;

    /// Remove a request.
    async fn delete(&self, id: &RequestId) -> Result<()>;

    /// Remove every non-terminal request whose deadline is at or before
    /// `now`; returns the removed ids so callers can fire failure
    /// callbacks.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>>;

    /// Pending requests in drain order: priority DESC, created_at ASC.
    async fn list_pending(&self, limit: usize) -> Result<Vec<QueuedRequest>>;

    /// Count of non-terminal (pending or processing) requests.
    async fn count_pending(&self) -> Result<u64>;

    /// Remove everything; returns the number of rows removed.
    async fn clear_all(&self) -> Result<u64>;
}
