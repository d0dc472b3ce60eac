//! Network quality estimation.
//!
//! Produces the scalar score in `[0, 1]` that drives routing decisions. The
//! estimator combines three signals: the current connectivity kind, a
//! pluggable latency probe, and a rolling window of recent delivery
//! failures. It never errors; when the platform cannot be probed the score
//! is simply `0.0`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

/// Score at or above which the network counts as stable.
pub const STABLE_SCORE: f64 = 0.5;

/// How long a recorded failure keeps depressing the score.
const FAILURE_WINDOW_SECS: i64 = 300;

/// Score penalty per failure inside the window.
const FAILURE_PENALTY: f64 = 0.1;

/// Latency below this adds a bonus; above [`SLOW_LATENCY_MS`] subtracts.
const FAST_LATENCY_MS: u32 = 100;
const SLOW_LATENCY_MS: u32 = 1000;

/// Kind of connectivity currently available.
///
/// Mobile subtypes finer than these are collapsed by the platform source;
/// most report anything LTE-or-better as [`NetworkType::Mobile4G`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Wifi,
    Mobile4G,
    Mobile3G,
    Mobile2G,
    None,
    Unknown,
}

impl NetworkType {
    /// Base quality score before latency and failure adjustments.
    pub fn base_score(&self) -> f64 {
        match self {
            NetworkType::Wifi => 1.0,
            NetworkType::Mobile4G => 0.8,
            NetworkType::Mobile3G => 0.5,
            NetworkType::Mobile2G => 0.3,
            NetworkType::None | NetworkType::Unknown => 0.0,
        }
    }
}

/// A point-in-time summary of network quality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub network_type: NetworkType,
    pub quality_score: f64,
    pub latency_ms: u32,
    pub is_stable: bool,
}

/// Source of connectivity events.
///
/// Wraps whatever the platform exposes: a connectivity manager callback, a
/// netlink socket, a browser event. The middleware only needs the current
/// kind and a change stream.
pub trait ConnectivitySource: Send + Sync {
    /// Current connectivity kind. A source that cannot answer reports
    /// [`NetworkType::None`].
    fn current(&self) -> NetworkType;

    /// Subscribe to connectivity transitions.
    fn subscribe(&self) -> broadcast::Receiver<NetworkType>;
}

/// Measures round-trip latency to a reliable endpoint.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// One measurement in milliseconds, or `None` when the probe failed.
    async fn measure(&self) -> Option<u32>;
}

/// Latency probe that reports a fixed value.
///
/// The default stand-in for platforms without a real prober; callers with
/// access to ICMP or a cheap HTTP endpoint should inject their own.
#[derive(Debug, Clone)]
pub struct StaticLatencyProbe {
    pub latency_ms: u32,
}

impl Default for StaticLatencyProbe {
    fn default() -> Self {
        Self { latency_ms: 150 }
    }
}

#[async_trait]
impl LatencyProbe for StaticLatencyProbe {
    async fn measure(&self) -> Option<u32> {
        Some(self.latency_ms)
    }
}

/// In-process connectivity source with a settable kind.
///
/// Doubles as the test control surface and as a building block for hosts
/// that push connectivity changes from outside the crate.
pub struct StaticConnectivitySource {
    current: RwLock<NetworkType>,
    tx: broadcast::Sender<NetworkType>,
}

impl StaticConnectivitySource {
    pub fn new(initial: NetworkType) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            current: RwLock::new(initial),
            tx,
        }
    }

    /// Change the reported kind and notify subscribers.
    pub fn set(&self, kind: NetworkType) {
        *self.current.write() = kind;
        let _ = self.tx.send(kind);
    }
}

impl ConnectivitySource for StaticConnectivitySource {
    fn current(&self) -> NetworkType {
        *self.current.read()
    }

    fn subscribe(&self) -> broadcast::Receiver<NetworkType> {
        self.tx.subscribe()
    }
}

/// The network quality estimator.
///
/// `score()` is deterministic in the current kind, the cached latency, and
/// the contents of the failure window; status events are broadcast on every
/// connectivity transition.
pub struct NetworkEstimator {
    connectivity: Arc<dyn ConnectivitySource>,
    probe: Arc<dyn LatencyProbe>,
    probe_interval: Duration,
    latency_ms: AtomicU32,
    failures: Mutex<VecDeque<DateTime<Utc>>>,
    status_tx: broadcast::Sender<NetworkStatus>,
}

impl NetworkEstimator {
    pub fn new(connectivity: Arc<dyn ConnectivitySource>, probe: Arc<dyn LatencyProbe>) -> Self {
        let (status_tx, _) = broadcast::channel(32);
        Self {
            connectivity,
            probe,
            probe_interval: Duration::from_secs(30),
            latency_ms: AtomicU32::new(StaticLatencyProbe::default().latency_ms),
            failures: Mutex::new(VecDeque::new()),
            status_tx,
        }
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Start the background event loop: forwards connectivity transitions
    /// as status events and refreshes latency on the probe interval.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) {
        let estimator = self.clone();
        let mut events = estimator.connectivity.subscribe();
        tokio::spawn(async move {
            let mut probe_tick = tokio::time::interval(estimator.probe_interval);
            probe_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(kind) => {
                            let status = estimator.status();
                            tracing::debug!(
                                network_type = ?kind,
                                score = status.quality_score,
                                "Connectivity transition"
                            );
                            let _ = estimator.status_tx.send(status);
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Connectivity events lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("Connectivity source closed");
                            break;
                        }
                    },
                    _ = probe_tick.tick() => {
                        if let Some(latency) = estimator.probe.measure().await {
                            estimator.latency_ms.store(latency, Ordering::Relaxed);
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    pub fn current_type(&self) -> NetworkType {
        self.connectivity.current()
    }

    pub fn latency_ms(&self) -> u32 {
        self.latency_ms.load(Ordering::Relaxed)
    }

    /// The routing score in `[0, 1]`.
    ///
    /// Base score by kind, adjusted for latency when any connectivity
    /// exists, minus 0.1 per failure recorded in the last five minutes.
    pub fn score(&self) -> f64 {
        let base = self.current_type().base_score();
        let mut score = base;
        if base > 0.0 {
            let latency = self.latency_ms();
            if latency < FAST_LATENCY_MS {
                score += 0.1;
            } else if latency > SLOW_LATENCY_MS {
                score -= 0.2;
            }
        }
        score -= FAILURE_PENALTY * self.recent_failures() as f64;
        score.clamp(0.0, 1.0)
    }

    pub fn is_stable(&self) -> bool {
        self.score() >= STABLE_SCORE
    }

    pub fn status(&self) -> NetworkStatus {
        let score = self.score();
        NetworkStatus {
            network_type: self.current_type(),
            quality_score: score,
            latency_ms: self.latency_ms(),
            is_stable: score >= STABLE_SCORE,
        }
    }

    /// Record a delivery failure at the current instant.
    pub fn observe_failure(&self) {
        let mut failures = self.failures.lock();
        failures.push_back(Utc::now());
        Self::prune(&mut failures);
    }

    /// Failures inside the rolling window; prunes on access.
    pub fn recent_failures(&self) -> usize {
        let mut failures = self.failures.lock();
        Self::prune(&mut failures);
        failures.len()
    }

    fn prune(failures: &mut VecDeque<DateTime<Utc>>) {
        let cutoff = Utc::now() - chrono::Duration::seconds(FAILURE_WINDOW_SECS);
        while failures.front().is_some_and(|at| *at < cutoff) {
            failures.pop_front();
        }
    }

    /// Subscribe to status events (one per connectivity transition).
    pub fn subscribe(&self) -> broadcast::Receiver<NetworkStatus> {
        self.status_tx.subscribe()
    }

    /// Status events as a `Stream`.
    pub fn stream(&self) -> BroadcastStream<NetworkStatus> {
        BroadcastStream::new(self.status_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator_with(kind: NetworkType, latency_ms: u32) -> (Arc<StaticConnectivitySource>, NetworkEstimator) {
        let source = Arc::new(StaticConnectivitySource::new(kind));
        let estimator = NetworkEstimator::new(
            source.clone(),
            Arc::new(StaticLatencyProbe { latency_ms }),
        );
        estimator.latency_ms.store(latency_ms, Ordering::Relaxed);
        (source, estimator)
    }

    #[test]
    fn score_follows_base_table() {
        for (kind, expected) in [
            (NetworkType::Wifi, 1.0),
            (NetworkType::Mobile4G, 0.8),
            (NetworkType::Mobile3G, 0.5),
            (NetworkType::Mobile2G, 0.3),
            (NetworkType::None, 0.0),
            (NetworkType::Unknown, 0.0),
        ] {
            let (_, estimator) = estimator_with(kind, 500);
            assert_eq!(estimator.score(), expected, "kind {:?}", kind);
        }
    }

    #[test]
    fn latency_adjusts_only_when_connected() {
        let (_, fast) = estimator_with(NetworkType::Mobile4G, 50);
        assert!((fast.score() - 0.9).abs() < f64::EPSILON);

        let (_, slow) = estimator_with(NetworkType::Mobile4G, 1500);
        assert!((slow.score() - 0.6).abs() < f64::EPSILON);

        // Fast latency cannot resurrect a dead link.
        let (_, offline) = estimator_with(NetworkType::None, 50);
        assert_eq!(offline.score(), 0.0);

        // Wifi with fast latency clamps at 1.0.
        let (_, wifi) = estimator_with(NetworkType::Wifi, 50);
        assert_eq!(wifi.score(), 1.0);
    }

    #[test]
    fn failures_depress_the_score() {
        let (_, estimator) = estimator_with(NetworkType::Wifi, 500);
        assert_eq!(estimator.score(), 1.0);

        for _ in 0..3 {
            estimator.observe_failure();
        }
        assert!((estimator.score() - 0.7).abs() < 1e-9);

        // Enough failures floor the score at zero.
        for _ in 0..20 {
            estimator.observe_failure();
        }
        assert_eq!(estimator.score(), 0.0);
    }

    #[test]
    fn failure_window_prunes_old_entries() {
        let (_, estimator) = estimator_with(NetworkType::Wifi, 500);
        {
            let mut failures = estimator.failures.lock();
            failures.push_back(Utc::now() - chrono::Duration::seconds(FAILURE_WINDOW_SECS + 10));
            failures.push_back(Utc::now());
        }
        assert_eq!(estimator.recent_failures(), 1);
    }

    #[test]
    fn stability_threshold_is_half() {
        let (_, at) = estimator_with(NetworkType::Mobile3G, 500);
        assert!(at.is_stable());

        let (_, below) = estimator_with(NetworkType::Mobile2G, 500);
        assert!(!below.is_stable());
    }

    #[tokio::test]
    async fn transitions_broadcast_status() {
        let (source, estimator) = estimator_with(NetworkType::None, 500);
        let estimator = Arc::new(estimator);
        let shutdown = CancellationToken::new();
        estimator.start(shutdown.clone());
        let mut rx = estimator.subscribe();

        source.set(NetworkType::Wifi);
        let status = rx.recv().await.unwrap();
        assert_eq!(status.network_type, NetworkType::Wifi);
        assert_eq!(status.quality_score, 1.0);
        assert!(status.is_stable);

        shutdown.cancel();
    }
}
