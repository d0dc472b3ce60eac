//! In-memory implementation of the queue store.
//!
//! Implements the full `QueueStore` contract without durability. Tests and
//! short-lived callers use it in place of the SQLite store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use super::QueueStore;
use crate::error::Result;
use crate::request::{QueueStatus, QueuedRequest, RequestId};

/// Non-durable queue store backed by a map.
#[derive(Default)]
pub struct MemoryQueueStore {
    items: Mutex<HashMap<RequestId, QueuedRequest>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, for test assertions.
    pub fn snapshot(&self) -> Vec<QueuedRequest> {
        self.items.lock().values().cloned().collect()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert(&self, item: &QueuedRequest) -> Result<()> {
        let mut items = self.items.lock();
        if let Some(key) = &item.request.idempotency_key {
            // Same logical operation: the new row supersedes the old one.
            items.retain(|_, existing| existing.request.idempotency_key.as_ref() != Some(key));
        }
        items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &RequestId) -> Result<Option<QueuedRequest>> {
        Ok(self.items.lock().get(id).cloned())
    }

    async fn update_status(&self, id: &RequestId, status: QueueStatus) -> Result<()> {
        if let Some(item) = self.items.lock().get_mut(id) {
            item.status = status;
        }
        Ok(())
    }

    async fn increment_retry(&self, id: &RequestId) -> Result<()> {
        if let Some(item) = self.items.lock().get_mut(id) {
            item.retry_count += 1;
        }
        Ok(())
    }

    async fn delete(&self, id: &RequestId) -> Result<()> {
        self.items.lock().remove(id);
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<Vec<RequestId>> {
        let mut items = self.items.lock();
        let expired: Vec<RequestId> = items
            .values()
            .filter(|item| !item.status.is_terminal() && item.is_expired(now))
            .map(|item| item.id.clone())
            .collect();
        for id in &expired {
            items.remove(id);
        }
        Ok(expired)
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<QueuedRequest>> {
        let items = self.items.lock();
        let mut pending: Vec<QueuedRequest> = items
            .values()
            .filter(|item| item.status == QueueStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.request
                .priority
                .weight()
                .cmp(&a.request.priority.weight())
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.as_str().cmp(b.id.as_str()))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn count_pending(&self) -> Result<u64> {
        Ok(self
            .items
            .lock()
            .values()
            .filter(|item| !item.status.is_terminal())
            .count() as u64)
    }

    async fn clear_all(&self) -> Result<u64> {
        let mut items = self.items.lock();
        let removed = items.len() as u64;
        items.clear();
        Ok(removed)
    }
}
