//! Queue manager: durable enqueue, background drain, and retry policy.
//!
//! The manager owns the persistent store. A single background task drains
//! pending entries every 30 seconds and whenever the network estimator
//! reports recovery; entries within a pass are processed strictly in
//! priority/time order and passes never overlap. Retry spacing is the drain
//! interval itself — there is no per-item backoff sleep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{BackhaulError, Result};
use crate::escalation::EscalationTimers;
use crate::http::HttpClient;
use crate::network::NetworkEstimator;
use crate::request::{Method, Priority, QueueStatus, QueuedRequest, Request, RequestId};
use crate::router::MiddlewareConfig;
use crate::storage::QueueStore;

/// Retry budget for CRITICAL requests.
const CRITICAL_MAX_RETRIES: u32 = 5;
/// Retry budget for everything else.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delivery lifecycle callbacks, fired after state changes persist.
///
/// Injected once at construction; implementations must be cheap and
/// non-blocking (they run on the drain task).
pub trait DeliveryHooks: Send + Sync {
    fn on_completed(&self, id: &RequestId, status: u16, body: &str) {
        let _ = (id, status, body);
    }

    fn on_failed(&self, id: &RequestId, error: &str) {
        let _ = (id, error);
    }
}

/// Hooks that do nothing.
pub struct NoopHooks;

impl DeliveryHooks for NoopHooks {}

/// Cheap aggregate for caller dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Non-terminal entries currently in the store.
    pub pending: u64,
    /// Configured queue capacity.
    pub capacity: usize,
}

/// Derive the stable 16-hex request id from the request identity and its
/// creation instant.
pub fn derive_request_id(method: Method, url: &str, at_millis: i64) -> RequestId {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(url.as_bytes());
    hasher.update(at_millis.to_string().as_bytes());
    RequestId(hex::encode(hasher.finalize())[..16].to_string())
}

/// Background drain of the persistent queue.
pub struct QueueManager<S, H>
where
    S: QueueStore,
    H: HttpClient,
{
    store: Arc<S>,
    http: Arc<H>,
    config: Arc<RwLock<MiddlewareConfig>>,
    estimator: Arc<NetworkEstimator>,
    timers: Arc<EscalationTimers>,
    hooks: Arc<dyn DeliveryHooks>,
    /// Held for the length of a pass so passes never overlap.
    drain_lock: tokio::sync::Mutex<()>,
}

impl<S, H> QueueManager<S, H>
where
    S: QueueStore + 'static,
    H: HttpClient + 'static,
{
    pub fn new(
        store: Arc<S>,
        http: Arc<H>,
        config: Arc<RwLock<MiddlewareConfig>>,
        estimator: Arc<NetworkEstimator>,
        timers: Arc<EscalationTimers>,
        hooks: Arc<dyn DeliveryHooks>,
    ) -> Self {
        Self {
            store,
            http,
            config,
            estimator,
            timers,
            hooks,
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Enqueue a request with no expiry deadline.
    pub async fn enqueue(&self, request: Request) -> Result<QueuedRequest> {
        self.enqueue_with_expiry(request, None).await
    }

    /// Enqueue a request, rejecting with `QueueFull` at capacity.
    ///
    /// The id is the caller's idempotency key when present, otherwise
    /// 16 hex characters of `sha256(method || url || millis)`.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn enqueue_with_expiry(
        &self,
        request: Request,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<QueuedRequest> {
        let max = self.config.read().max_queue_size;
        let pending = self.store.count_pending().await?;
        if pending as usize >= max {
            tracing::warn!(pending, max, "Rejecting enqueue: queue is full");
            return Err(BackhaulError::QueueFull { pending, max });
        }

        let now = Utc::now();
        let id = match &request.idempotency_key {
            Some(key) => RequestId::from(key.as_str()),
            None => derive_request_id(request.method, &request.url, now.timestamp_millis()),
        };
        let max_retries = if request.priority == Priority::Critical {
            CRITICAL_MAX_RETRIES
        } else {
            DEFAULT_MAX_RETRIES
        };

        let item = QueuedRequest {
            id: id.clone(),
            request,
            retry_count: 0,
            max_retries,
            created_at: now,
            expires_at,
            status: QueueStatus::Pending,
        };
        self.store.insert(&item).await?;
        tracing::debug!(request_id = %id, max_retries, "Request enqueued");
        Ok(item)
    }

    /// Start the background drain loop.
    ///
    /// Drains on the configured interval and whenever the estimator
    /// broadcasts a stable recovery (`is_stable && score > 0.5`).
    pub fn run(self: &Arc<Self>, shutdown: CancellationToken) {
        let manager = self.clone();
        // Subscribe before spawning so recovery events arriving while the
        // task is still being scheduled are buffered, not lost.
        let mut status_rx = self.estimator.subscribe();
        tokio::spawn(async move {
            let drain_interval = manager.config.read().drain_interval;
            let mut interval = tokio::time::interval(drain_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(interval_secs = drain_interval.as_secs(), "Queue drain loop started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        manager.drain("interval").await;
                    }
                    event = status_rx.recv() => match event {
                        Ok(status) if status.is_stable && status.quality_score > 0.5 => {
                            tracing::debug!(score = status.quality_score, "Network recovered, draining");
                            manager.drain("network-recovery").await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Network status events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {}
                    },
                    _ = shutdown.cancelled() => {
                        tracing::info!("Queue drain loop stopping");
                        break;
                    }
                }
            }
        });
    }

    async fn drain(&self, trigger: &str) {
        if let Err(e) = self.process_queue().await {
            tracing::error!(trigger, error = %e, "Drain pass failed");
        }
    }

    /// Run one drain pass: sweep expirations, then attempt delivery for up
    /// to a batch of pending entries in priority/time order.
    #[tracing::instrument(skip(self))]
    pub async fn process_queue(&self) -> Result<()> {
        let _pass = self.drain_lock.lock().await;
        let now = Utc::now();

        let expired = self.store.delete_expired(now).await?;
        for id in &expired {
            self.timers.cancel(id);
            tracing::info!(request_id = %id, status = "expired", "Queued request expired");
            self.hooks.on_failed(id, "Request expired");
        }

        // Attempts while fully offline would only burn the retry budget;
        // the recovery event re-triggers this pass as soon as a link is back.
        if self.estimator.score() == 0.0 {
            tracing::debug!("Skipping delivery attempts: no connectivity");
            return Ok(());
        }

        let batch_size = self.config.read().drain_batch_size;
        let batch = self.store.list_pending(batch_size).await?;
        if batch.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = batch.len(), "Draining pending requests");

        for item in batch {
            self.process_item(item).await?;
        }
        Ok(())
    }

    async fn process_item(&self, item: QueuedRequest) -> Result<()> {
        let id = item.id.clone();
        let now = Utc::now();
        self.store.update_status(&id, QueueStatus::Processing).await?;

        // Raced past the sweep: expire it here so the callback still fires.
        if item.is_expired(now) {
            self.store.update_status(&id, QueueStatus::Expired).await?;
            self.store.delete(&id).await?;
            self.timers.cancel(&id);
            tracing::info!(request_id = %id, status = "expired", "Queued request expired");
            self.hooks.on_failed(&id, "Request expired");
            return Ok(());
        }

        if item.retries_exhausted() {
            self.store.update_status(&id, QueueStatus::Failed).await?;
            self.timers.cancel(&id);
            tracing::warn!(request_id = %id, retry_count = item.retry_count, "Retry budget exhausted");
            self.hooks.on_failed(&id, "Maximum retries exceeded");
            return Ok(());
        }

        let timeout = item
            .request
            .timeout
            .unwrap_or_else(|| self.config.read().retry_timeout);
        let outcome = self.http.execute(&item.request, timeout).await;

        match outcome {
            Ok(response) if response.is_success() => {
                self.store.update_status(&id, QueueStatus::Completed).await?;
                self.store.delete(&id).await?;
                self.timers.cancel(&id);
                tracing::info!(request_id = %id, status = response.status, "Queued request delivered");
                self.hooks.on_completed(&id, response.status, &response.body);
            }
            Ok(response) => {
                let error = format!("HTTP status {}", response.status);
                self.record_failure(&item, &error, false).await?;
            }
            Err(e) if e.is_transport_failure() => {
                self.estimator.observe_failure();
                let error = e.to_string();
                self.record_failure(&item, &error, true).await?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    async fn record_failure(
        &self,
        item: &QueuedRequest,
        error: &str,
        transport: bool,
    ) -> Result<()> {
        self.store.increment_retry(&item.id).await?;
        let spent = item.retry_count + 1;
        if spent >= item.max_retries {
            self.store.update_status(&item.id, QueueStatus::Failed).await?;
            self.timers.cancel(&item.id);
            tracing::warn!(
                request_id = %item.id,
                retry_count = spent,
                transport,
                error,
                "Queued request failed permanently"
            );
            self.hooks
                .on_failed(&item.id, &format!("Maximum retries exceeded: {}", error));
        } else {
            self.store.update_status(&item.id, QueueStatus::Pending).await?;
            tracing::debug!(
                request_id = %item.id,
                retry_count = spent,
                transport,
                error,
                "Attempt failed, request stays queued"
            );
            self.hooks.on_failed(&item.id, error);
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            pending: self.store.count_pending().await?,
            capacity: self.config.read().max_queue_size,
        })
    }
}
