//! Router: the public entry point of the middleware.
//!
//! `Middleware` owns every subsystem — estimator, queue manager, escalation
//! timers, transports — and exposes the single `execute` entry point plus
//! the configuration and inspection surface. There is deliberately no
//! global state: callers construct one value and plumb it through.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{BackhaulError, Result};
use crate::escalation::EscalationTimers;
use crate::http::HttpClient;
use crate::network::{
    ConnectivitySource, LatencyProbe, NetworkEstimator, NetworkStatus, StaticLatencyProbe,
};
use crate::queue::{DeliveryHooks, NoopHooks, QueueManager, QueueStats};
use crate::request::{
    Body, Method, Origin, QueueStatus, QueuedRequest, Request, RequestId, Response,
};
use crate::sms::codec::{self, GatewayReply, SmsPayload};
use crate::sms::transport::{CostApprover, InboundSms, SmsCostProvider, SmsTransport};
use crate::storage::QueueStore;

pub mod strategy;

pub use strategy::{RoutingPolicy, SMS_SCORE_CEILING, Strategy};

/// Effective middleware configuration.
///
/// Mutated only through [`Middleware::initialize`] and
/// [`Middleware::configure`]; read everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MiddlewareConfig {
    pub strategy: Strategy,
    /// Trusted gateway number for the SMS channel.
    pub sms_gateway: String,
    pub enable_sms: bool,
    /// Per-attempt HTTP timeout used by the queue drain.
    pub retry_timeout: Duration,
    /// Bound on a single SMS send call.
    pub sms_timeout: Duration,
    /// Consult the cost approver before a deferred SMS send.
    pub sms_cost_warning: bool,
    /// Reserved: combining several requests into one message is out of
    /// scope, the flag is accepted for interface compatibility.
    pub batch_sms: bool,
    pub max_queue_size: usize,
    pub drain_interval: Duration,
    pub drain_batch_size: usize,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Balanced,
            sms_gateway: String::new(),
            enable_sms: false,
            retry_timeout: Duration::from_secs(30),
            sms_timeout: Duration::from_secs(30),
            sms_cost_warning: true,
            batch_sms: false,
            max_queue_size: 1000,
            drain_interval: Duration::from_secs(30),
            drain_batch_size: 10,
        }
    }
}

/// Options for [`Middleware::initialize`].
pub struct InitOptions {
    pub sms_gateway: String,
    pub enable_sms: bool,
    /// Per-attempt HTTP timeout for queued deliveries.
    pub timeout: Duration,
    pub strategy: Strategy,
    pub max_queue_size: usize,
    pub sms_cost_provider: Option<Arc<dyn SmsCostProvider>>,
    pub sms_cost_warning_callback: Option<Arc<dyn CostApprover>>,
    pub batch_sms: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        let defaults = MiddlewareConfig::default();
        Self {
            sms_gateway: defaults.sms_gateway,
            enable_sms: defaults.enable_sms,
            timeout: defaults.retry_timeout,
            strategy: defaults.strategy,
            max_queue_size: defaults.max_queue_size,
            sms_cost_provider: None,
            sms_cost_warning_callback: None,
            batch_sms: defaults.batch_sms,
        }
    }
}

/// Partial configuration update for [`Middleware::configure`]; `None`
/// fields keep their current value.
#[derive(Default)]
pub struct ConfigUpdate {
    pub strategy: Option<Strategy>,
    pub sms_timeout: Option<Duration>,
    pub sms_cost_warning: Option<bool>,
    pub batch_sms: Option<bool>,
    pub max_queue_size: Option<usize>,
    pub sms_cost_provider: Option<Arc<dyn SmsCostProvider>>,
    pub sms_cost_warning_callback: Option<Arc<dyn CostApprover>>,
}

/// Cost collaborator slots, swappable at runtime through `configure`.
#[derive(Default)]
struct CostSlots {
    provider: Option<Arc<dyn SmsCostProvider>>,
    approver: Option<Arc<dyn CostApprover>>,
}

/// Builder wiring the middleware's collaborators before construction.
pub struct MiddlewareBuilder<S, H, M>
where
    S: QueueStore,
    H: HttpClient,
    M: SmsTransport,
{
    store: S,
    http: H,
    sms: M,
    connectivity: Arc<dyn ConnectivitySource>,
    probe: Arc<dyn LatencyProbe>,
    hooks: Arc<dyn DeliveryHooks>,
    cost_provider: Option<Arc<dyn SmsCostProvider>>,
    cost_approver: Option<Arc<dyn CostApprover>>,
}

impl<S, H, M> MiddlewareBuilder<S, H, M>
where
    S: QueueStore + 'static,
    H: HttpClient + 'static,
    M: SmsTransport + 'static,
{
    pub fn new(store: S, http: H, sms: M, connectivity: Arc<dyn ConnectivitySource>) -> Self {
        Self {
            store,
            http,
            sms,
            connectivity,
            probe: Arc::new(StaticLatencyProbe::default()),
            hooks: Arc::new(NoopHooks),
            cost_provider: None,
            cost_approver: None,
        }
    }

    pub fn latency_probe(mut self, probe: Arc<dyn LatencyProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn delivery_hooks(mut self, hooks: Arc<dyn DeliveryHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn cost_provider(mut self, provider: Arc<dyn SmsCostProvider>) -> Self {
        self.cost_provider = Some(provider);
        self
    }

    pub fn cost_approver(mut self, approver: Arc<dyn CostApprover>) -> Self {
        self.cost_approver = Some(approver);
        self
    }

    pub fn build(self) -> Middleware<S, H, M> {
        let store = Arc::new(self.store);
        let http = Arc::new(self.http);
        let sms = Arc::new(self.sms);
        let estimator = Arc::new(NetworkEstimator::new(self.connectivity, self.probe));
        let timers = Arc::new(EscalationTimers::new());
        let config = Arc::new(RwLock::new(MiddlewareConfig::default()));
        let queue = Arc::new(QueueManager::new(
            store.clone(),
            http.clone(),
            config.clone(),
            estimator.clone(),
            timers.clone(),
            self.hooks.clone(),
        ));
        Middleware {
            store,
            http,
            sms,
            estimator,
            queue,
            timers,
            config,
            hooks: self.hooks,
            cost: Arc::new(RwLock::new(CostSlots {
                provider: self.cost_provider,
                approver: self.cost_approver,
            })),
            correlation: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            initialized: AtomicBool::new(false),
        }
    }
}

/// The resilience middleware.
///
/// # Example
/// ```ignore
/// let middleware = Middleware::builder(store, http, sms, connectivity).build();
/// middleware.initialize(InitOptions {
///     sms_gateway: "+15550100".to_string(),
///     enable_sms: true,
///     ..InitOptions::default()
/// }).await?;
/// let response = middleware.execute(request).await?;
/// ```
pub struct Middleware<S, H, M>
where
    S: QueueStore,
    H: HttpClient,
    M: SmsTransport,
{
    store: Arc<S>,
    http: Arc<H>,
    sms: Arc<M>,
    estimator: Arc<NetworkEstimator>,
    queue: Arc<QueueManager<S, H>>,
    timers: Arc<EscalationTimers>,
    config: Arc<RwLock<MiddlewareConfig>>,
    hooks: Arc<dyn DeliveryHooks>,
    cost: Arc<RwLock<CostSlots>>,
    /// Outbound wire id -> queued request id, for gateway reply correlation.
    correlation: Arc<DashMap<String, RequestId>>,
    shutdown: CancellationToken,
    initialized: AtomicBool,
}

impl<S, H, M> Middleware<S, H, M>
where
    S: QueueStore + 'static,
    H: HttpClient + 'static,
    M: SmsTransport + 'static,
{
    pub fn builder(
        store: S,
        http: H,
        sms: M,
        connectivity: Arc<dyn ConnectivitySource>,
    ) -> MiddlewareBuilder<S, H, M> {
        MiddlewareBuilder::new(store, http, sms, connectivity)
    }

    /// Apply the initial configuration and start the background machinery:
    /// the estimator event loop, the queue drain, and the inbound SMS
    /// listener. Idempotent: a second call logs and returns.
    pub async fn initialize(&self, options: InitOptions) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            tracing::warn!("initialize called on an initialized middleware, ignoring");
            return Ok(());
        }

        {
            let mut config = self.config.write();
            config.sms_gateway = options.sms_gateway;
            config.enable_sms = options.enable_sms;
            config.retry_timeout = options.timeout;
            config.strategy = options.strategy;
            config.max_queue_size = options.max_queue_size;
            config.batch_sms = options.batch_sms;
        }
        {
            let mut cost = self.cost.write();
            if options.sms_cost_provider.is_some() {
                cost.provider = options.sms_cost_provider;
            }
            if options.sms_cost_warning_callback.is_some() {
                cost.approver = options.sms_cost_warning_callback;
            }
        }

        let snapshot = serde_json::to_value(&*self.config.read())?;
        tracing::info!(config = %snapshot, "Middleware initialized");

        self.estimator.start(self.shutdown.clone());
        self.queue.run(self.shutdown.clone());
        self.spawn_inbound_listener();
        Ok(())
    }

    /// Update routing and SMS parameters at runtime.
    pub fn configure(&self, update: ConfigUpdate) {
        {
            let mut config = self.config.write();
            if let Some(strategy) = update.strategy {
                config.strategy = strategy;
            }
            if let Some(timeout) = update.sms_timeout {
                config.sms_timeout = timeout;
            }
            if let Some(warn) = update.sms_cost_warning {
                config.sms_cost_warning = warn;
            }
            if let Some(batch) = update.batch_sms {
                config.batch_sms = batch;
            }
            if let Some(max) = update.max_queue_size {
                config.max_queue_size = max;
            }
        }
        let mut cost = self.cost.write();
        if update.sms_cost_provider.is_some() {
            cost.provider = update.sms_cost_provider;
        }
        if update.sms_cost_warning_callback.is_some() {
            cost.approver = update.sms_cost_warning_callback;
        }
        tracing::debug!("Middleware reconfigured");
    }

    /// Route one request over the best available channel.
    ///
    /// The caller always gets a [`Response`]; transport failures surface as
    /// a queued `202`, never as an error. Errors are reserved for misuse
    /// (`NotInitialized`), capacity (`QueueFull`), and storage faults.
    #[tracing::instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn execute(&self, request: Request) -> Result<Response> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(BackhaulError::NotInitialized);
        }

        let (policy, sms_enabled) = {
            let config = self.config.read();
            (config.strategy.policy(), config.enable_sms)
        };
        let score = self.estimator.score();
        tracing::debug!(score, priority = ?request.priority, "Routing request");

        if score > policy.full_threshold {
            let timeout = request.timeout.unwrap_or(policy.full_timeout);
            return self.attempt_http(request, timeout, &policy).await;
        }
        if let Some(threshold) = policy.degraded_threshold
            && score > threshold
        {
            return self.attempt_http(request, policy.degraded_timeout, &policy).await;
        }

        let sms_ok = sms_enabled && request.sms_eligible;
        if score == 0.0 && sms_ok && policy.allows_immediate_sms(request.priority) {
            return self.send_immediate_sms(request).await;
        }

        let item = self.queue.enqueue(request).await?;
        if sms_ok && policy.allows_deferred_sms(item.request.priority) {
            self.arm_escalation(&item.id, policy.sms_escalation_delay);
        }
        Ok(Response::queued(&item.id))
    }

    async fn attempt_http(
        &self,
        request: Request,
        timeout: Duration,
        policy: &RoutingPolicy,
    ) -> Result<Response> {
        match self.http.execute(&request, timeout).await {
            Ok(response) => {
                // A server answer settles the logical operation; drop any
                // escalation armed under the same identity.
                if let Some(key) = &request.idempotency_key {
                    self.timers.cancel(&RequestId::from(key.as_str()));
                }
                tracing::debug!(status = response.status, "Delivered over HTTP");
                Ok(Response {
                    status_code: response.status,
                    body: response.body,
                    headers: response.headers,
                    origin: Origin::Network,
                })
            }
            Err(e) if e.is_transport_failure() => {
                self.estimator.observe_failure();
                tracing::warn!(error = %e, "HTTP attempt failed, queueing for retry");
                let sms_ok =
                    self.config.read().enable_sms && request.sms_eligible;
                let item = self.queue.enqueue(request).await?;
                if policy.escalate_after_http_failure
                    && sms_ok
                    && policy.allows_deferred_sms(item.request.priority)
                {
                    self.arm_escalation(&item.id, policy.sms_escalation_delay);
                }
                Ok(Response::queued(&item.id))
            }
            Err(e) => Err(e),
        }
    }

    /// The immediate SMS path: enqueue for durability, encode, send. A send
    /// failure leaves the request queued and reports `503`.
    async fn send_immediate_sms(&self, request: Request) -> Result<Response> {
        let item = self.queue.enqueue(request).await?;
        let stored = self
            .store
            .get_by_id(&item.id)
            .await?
            .unwrap_or(item);

        let payload = SmsPayload::from_request(&stored.request);
        let text = match codec::encode(&payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(request_id = %stored.id, error = %e, "SMS encoding failed, request stays queued");
                return Ok(Response::sms_unavailable());
            }
        };

        let (gateway, sms_timeout) = {
            let config = self.config.read();
            (config.sms_gateway.clone(), config.sms_timeout)
        };
        match tokio::time::timeout(sms_timeout, self.sms.send(&gateway, &text)).await {
            Ok(Ok(true)) => {
                self.correlation
                    .insert(codec::compress_id(&payload.id), stored.id.clone());
                self.store
                    .update_status(&stored.id, QueueStatus::Completed)
                    .await?;
                self.store.delete(&stored.id).await?;
                self.hooks.on_completed(&stored.id, 200, "");
                tracing::info!(request_id = %stored.id, "Delivered over SMS");
                Ok(Response::sms_delivered())
            }
            Ok(Ok(false)) => {
                tracing::warn!(request_id = %stored.id, "SMS transport reported not-sent");
                Ok(Response::sms_unavailable())
            }
            Ok(Err(e)) => {
                tracing::warn!(request_id = %stored.id, error = %e, "SMS send failed");
                Ok(Response::sms_unavailable())
            }
            Err(_) => {
                tracing::warn!(request_id = %stored.id, "SMS send timed out");
                Ok(Response::sms_unavailable())
            }
        }
    }

    /// Arm a one-shot escalation timer for a queued request.
    fn arm_escalation(&self, id: &RequestId, delay: Duration) {
        let context = EscalationContext {
            id: id.clone(),
            estimator: self.estimator.clone(),
            store: self.store.clone(),
            sms: self.sms.clone(),
            config: self.config.clone(),
            cost: self.cost.clone(),
            hooks: self.hooks.clone(),
            correlation: self.correlation.clone(),
        };
        let timers = self.timers.clone();
        let task_id = id.clone();
        tracing::debug!(request_id = %id, delay_secs = delay.as_secs(), "Armed SMS escalation timer");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            context.fire().await;
            timers.remove(&task_id);
        });
        self.timers.insert(id.clone(), handle.abort_handle());
    }

    fn spawn_inbound_listener(&self) {
        let mut rx = self.sms.incoming();
        let config = self.config.clone();
        let store = self.store.clone();
        let hooks = self.hooks.clone();
        let correlation = self.correlation.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = rx.recv() => match message {
                        Ok(message) => {
                            let gateway = config.read().sms_gateway.clone();
                            if message.address != gateway {
                                tracing::trace!(address = %message.address, "Ignoring SMS from non-gateway sender");
                                continue;
                            }
                            handle_gateway_reply(message, store.as_ref(), hooks.as_ref(), &correlation)
                                .await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Inbound SMS stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    /// Cancel every timer, stop the drain and listeners, release the
    /// subscriptions. A disposed middleware stays disposed; build a new one
    /// to start over.
    pub fn dispose(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        let cancelled = self.timers.cancel_all();
        tracing::info!(cancelled_timers = cancelled, "Middleware disposed");
    }

    // ------------------------------------------------------------------
    // Inspection surface
    // ------------------------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// The underlying store. The queue manager remains the only writer;
    /// embedders use this for inspection and test setup.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn get_network_status(&self) -> NetworkStatus {
        self.estimator.status()
    }

    pub async fn get_queue_count(&self) -> Result<u64> {
        self.store.count_pending().await
    }

    pub async fn list_pending(&self, limit: usize) -> Result<Vec<QueuedRequest>> {
        self.store.list_pending(limit).await
    }

    /// Run one drain pass now, in addition to the periodic schedule.
    pub async fn process_queue(&self) -> Result<()> {
        self.queue.process_queue().await
    }

    /// Drop every queued request; returns how many were removed.
    pub async fn clear_queue(&self) -> Result<u64> {
        self.timers.cancel_all();
        self.store.clear_all().await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub async fn has_sms_permissions(&self) -> bool {
        self.sms.has_permissions().await
    }

    pub async fn request_sms_permissions(&self) -> bool {
        self.sms.request_permissions().await
    }

    pub fn sms_gateway(&self) -> String {
        self.config.read().sms_gateway.clone()
    }

    pub fn estimator(&self) -> &Arc<NetworkEstimator> {
        &self.estimator
    }

    // ------------------------------------------------------------------
    // Thin HTTP helpers
    // ------------------------------------------------------------------

    pub async fn get(&self, url: &str) -> Result<Response> {
        self.execute(Request::new(Method::Get, url)).await
    }

    pub async fn delete(&self, url: &str) -> Result<Response> {
        self.execute(Request::new(Method::Delete, url)).await
    }

    pub async fn post(&self, url: &str, body: Body) -> Result<Response> {
        self.execute(json_request(Method::Post, url, body)).await
    }

    pub async fn put(&self, url: &str, body: Body) -> Result<Response> {
        self.execute(json_request(Method::Put, url, body)).await
    }
}

fn json_request(method: Method, url: &str, body: Body) -> Request {
    let mut request = Request::new(method, url).body(body);
    request
        .headers
        .entry("Content-Type".to_string())
        .or_insert_with(|| "application/json".to_string());
    request
}

/// Everything a fired escalation timer needs, detached from the middleware
/// so the task owns its handles.
struct EscalationContext<S, M>
where
    S: QueueStore,
    M: SmsTransport,
{
    id: RequestId,
    estimator: Arc<NetworkEstimator>,
    store: Arc<S>,
    sms: Arc<M>,
    config: Arc<RwLock<MiddlewareConfig>>,
    cost: Arc<RwLock<CostSlots>>,
    hooks: Arc<dyn DeliveryHooks>,
    correlation: Arc<DashMap<String, RequestId>>,
}

impl<S, M> EscalationContext<S, M>
where
    S: QueueStore,
    M: SmsTransport,
{
    /// Re-evaluate and, when the network is still down and the request
    /// still queued, send it over SMS.
    async fn fire(self) {
        let (enabled, gateway, warn_enabled, sms_timeout) = {
            let config = self.config.read();
            (
                config.enable_sms,
                config.sms_gateway.clone(),
                config.sms_cost_warning,
                config.sms_timeout,
            )
        };
        if !enabled {
            return;
        }

        let score = self.estimator.score();
        if score >= SMS_SCORE_CEILING {
            tracing::debug!(request_id = %self.id, score, "Network recovered before escalation, skipping SMS");
            return;
        }

        let item = match self.store.get_by_id(&self.id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                tracing::debug!(request_id = %self.id, "Request already settled, skipping SMS");
                return;
            }
            Err(e) => {
                tracing::error!(request_id = %self.id, error = %e, "Store read failed during escalation");
                return;
            }
        };
        if item.status != QueueStatus::Pending || !item.request.sms_eligible {
            return;
        }

        let payload = SmsPayload::from_request(&item.request);
        let text = match codec::encode(&payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(request_id = %self.id, error = %e, "SMS encoding failed, request stays queued");
                return;
            }
        };

        if warn_enabled {
            let (provider, approver) = {
                let slots = self.cost.read();
                (slots.provider.clone(), slots.approver.clone())
            };
            if let Some(approver) = approver {
                let estimate = provider.map(|p| p.estimate(&text)).unwrap_or(0.0);
                if !approver.approve(estimate).await {
                    tracing::info!(request_id = %self.id, estimate, "SMS escalation declined by cost callback");
                    return;
                }
            }
        }

        match tokio::time::timeout(sms_timeout, self.sms.send(&gateway, &text)).await {
            Ok(Ok(true)) => {
                self.correlation
                    .insert(codec::compress_id(&payload.id), self.id.clone());
                if let Err(e) = self
                    .store
                    .update_status(&self.id, QueueStatus::Completed)
                    .await
                {
                    tracing::error!(request_id = %self.id, error = %e, "Failed to record SMS completion");
                    return;
                }
                if let Err(e) = self.store.delete(&self.id).await {
                    tracing::error!(request_id = %self.id, error = %e, "Failed to remove delivered request");
                }
                self.hooks.on_completed(&self.id, 200, "");
                tracing::info!(request_id = %self.id, "Escalated to SMS");
            }
            Ok(Ok(false)) => {
                tracing::warn!(request_id = %self.id, "SMS escalation reported not-sent, request stays queued");
            }
            Ok(Err(e)) => {
                tracing::warn!(request_id = %self.id, error = %e, "SMS escalation failed, request stays queued");
            }
            Err(_) => {
                tracing::warn!(request_id = %self.id, "SMS escalation timed out, request stays queued");
            }
        }
    }
}

async fn handle_gateway_reply<S: QueueStore>(
    message: InboundSms,
    store: &S,
    hooks: &dyn DeliveryHooks,
    correlation: &DashMap<String, RequestId>,
) {
    match codec::decode_reply(&message.body) {
        GatewayReply::Ack { id, .. } => {
            let Some((_, queue_id)) = correlation.remove(&id) else {
                tracing::debug!(wire_id = %id, "Gateway ack without a correlated request");
                return;
            };
            match store.get_by_id(&queue_id).await {
                Ok(Some(_)) => {
                    if let Err(e) = store.update_status(&queue_id, QueueStatus::Completed).await {
                        tracing::error!(request_id = %queue_id, error = %e, "Failed to record gateway ack");
                        return;
                    }
                    if let Err(e) = store.delete(&queue_id).await {
                        tracing::error!(request_id = %queue_id, error = %e, "Failed to remove acked request");
                    }
                    hooks.on_completed(&queue_id, 200, &message.body);
                }
                _ => {
                    tracing::debug!(request_id = %queue_id, "Gateway ack for an already-settled request");
                }
            }
        }
        GatewayReply::Nack { id, code, .. } => {
            let Some((_, queue_id)) = correlation.remove(&id) else {
                tracing::debug!(wire_id = %id, "Gateway error without a correlated request");
                return;
            };
            if let Ok(Some(_)) = store.get_by_id(&queue_id).await {
                if let Err(e) = store.update_status(&queue_id, QueueStatus::Failed).await {
                    tracing::error!(request_id = %queue_id, error = %e, "Failed to record gateway error");
                    return;
                }
            }
            tracing::warn!(request_id = %queue_id, code = %code, "Gateway rejected SMS operation");
            hooks.on_failed(&queue_id, &format!("Gateway error: {}", code));
        }
        GatewayReply::Raw { body } => {
            tracing::debug!(len = body.len(), "Unstructured gateway message ignored");
        }
    }
}
