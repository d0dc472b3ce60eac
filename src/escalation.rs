//! Escalation timer table.
//!
//! One entry per queued request that elected SMS fallback: the id maps to
//! the abort handle of a one-shot task armed by the router. Successful HTTP
//! delivery cancels the entry; a fired timer removes itself. Timers are not
//! persisted — after a restart the periodic drain subsumes them.

use dashmap::DashMap;
use tokio::task::AbortHandle;

use crate::request::RequestId;

/// Live one-shot escalation timers, keyed by queued-request id.
#[derive(Default)]
pub struct EscalationTimers {
    timers: DashMap<RequestId, AbortHandle>,
}

impl EscalationTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer for a request, aborting any earlier one for the
    /// same id.
    pub fn insert(&self, id: RequestId, handle: AbortHandle) {
        if let Some(previous) = self.timers.insert(id.clone(), handle) {
            previous.abort();
            tracing::debug!(request_id = %id, "Replaced existing escalation timer");
        }
    }

    /// Abort and remove the timer for a request, if one is live.
    pub fn cancel(&self, id: &RequestId) -> bool {
        match self.timers.remove(id) {
            Some((_, handle)) => {
                handle.abort();
                tracing::debug!(request_id = %id, "Cancelled escalation timer");
                true
            }
            None => false,
        }
    }

    /// Drop the table entry without aborting. Called by a timer task after
    /// it has fired.
    pub fn remove(&self, id: &RequestId) {
        self.timers.remove(id);
    }

    /// Abort every live timer. Called on dispose.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<RequestId> = self.timers.iter().map(|entry| entry.key().clone()).collect();
        let count = ids.len();
        for id in ids {
            self.cancel(&id);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}
