//! SMS transport abstraction.
//!
//! This module defines the `SmsTransport` trait to abstract the platform's
//! send/receive machinery, enabling testability with mock implementations.
//! The middleware only ever talks to one trusted gateway number; inbound
//! messages are fanned out on a broadcast channel without retention.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::error::Result;

/// An inbound text message as delivered by the platform.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundSms {
    /// Sender address (phone number).
    pub address: String,
    /// Message body.
    pub body: String,
    /// Platform receive timestamp.
    pub timestamp: DateTime<Utc>,
    /// Service center address, when the platform reports one.
    pub service_center: Option<String>,
}

/// Trait for sending and receiving SMS through the platform.
///
/// Implementations wrap whatever the host platform provides (telephony
/// APIs, a modem, a bridge service). Permission probes are part of the
/// trait because SMS is gated behind user consent on mobile targets.
#[async_trait]
pub trait SmsTransport: Send + Sync {
    /// Send `text` to `gateway`. Returns `Ok(false)` when the platform
    /// accepted the call but reported the message as not sent.
    async fn send(&self, gateway: &str, text: &str) -> Result<bool>;

    /// Subscribe to inbound messages. Every subscriber sees every message;
    /// nothing is retained for late subscribers.
    fn incoming(&self) -> broadcast::Receiver<InboundSms>;

    /// Whether the application currently holds SMS permissions.
    async fn has_permissions(&self) -> bool;

    /// Ask the platform for SMS permissions. Returns the resulting grant.
    async fn request_permissions(&self) -> bool;
}

/// Estimates the monetary cost of sending one message.
pub trait SmsCostProvider: Send + Sync {
    fn estimate(&self, text: &str) -> f64;
}

/// Asked before a deferred SMS send; returning `false` vetoes the send and
/// leaves the request queued.
#[async_trait]
pub trait CostApprover: Send + Sync {
    async fn approve(&self, estimate: f64) -> bool;
}

/// Flat-rate cost provider: every message costs the same.
#[derive(Debug, Clone)]
pub struct FlatRateCostProvider {
    pub rate: f64,
}

impl SmsCostProvider for FlatRateCostProvider {
    fn estimate(&self, _text: &str) -> f64 {
        self.rate
    }
}

// ============================================================================
// Test/Mock Implementation
// ============================================================================

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Record of a call made to the mock SMS transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SentSms {
    pub gateway: String,
    pub text: String,
}

/// Mock SMS transport for testing.
///
/// Sends succeed by default; failures can be scripted in FIFO order with
/// [`MockSmsTransport::push_outcome`]. Inbound gateway replies are injected
/// with [`MockSmsTransport::inject_inbound`]. Clones share state, so a test
/// can keep a handle to a transport it moved into the middleware.
///
/// # Example
/// ```
/// use backhaul::sms::transport::MockSmsTransport;
///
/// let mock = MockSmsTransport::new();
/// mock.push_outcome(Ok(false)); // next send reports not-sent
/// ```
#[derive(Clone)]
pub struct MockSmsTransport {
    sent: Arc<Mutex<Vec<SentSms>>>,
    outcomes: Arc<Mutex<VecDeque<Result<bool>>>>,
    permissions: Arc<AtomicBool>,
    inbound_tx: broadcast::Sender<InboundSms>,
}

impl MockSmsTransport {
    pub fn new() -> Self {
        let (inbound_tx, _) = broadcast::channel(16);
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            outcomes: Arc::new(Mutex::new(VecDeque::new())),
            permissions: Arc::new(AtomicBool::new(true)),
            inbound_tx,
        }
    }

    /// Queue the outcome for a future `send` call. Unscripted sends
    /// succeed.
    pub fn push_outcome(&self, outcome: Result<bool>) {
        self.outcomes.lock().push_back(outcome);
    }

    /// All messages sent through this mock, in order.
    pub fn sent(&self) -> Vec<SentSms> {
        self.sent.lock().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn set_permissions(&self, granted: bool) {
        self.permissions.store(granted, Ordering::SeqCst);
    }

    /// Deliver a message to every `incoming()` subscriber.
    pub fn inject_inbound(&self, address: &str, body: &str) {
        let _ = self.inbound_tx.send(InboundSms {
            address: address.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
            service_center: None,
        });
    }
}

impl Default for MockSmsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmsTransport for MockSmsTransport {
    async fn send(&self, gateway: &str, text: &str) -> Result<bool> {
        self.sent.lock().push(SentSms {
            gateway: gateway.to_string(),
            text: text.to_string(),
        });
        self.outcomes.lock().pop_front().unwrap_or(Ok(true))
    }

    fn incoming(&self) -> broadcast::Receiver<InboundSms> {
        self.inbound_tx.subscribe()
    }

    async fn has_permissions(&self) -> bool {
        self.permissions.load(Ordering::SeqCst)
    }

    async fn request_permissions(&self) -> bool {
        self.permissions.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_sends_in_order() {
        let mock = MockSmsTransport::new();
        assert!(mock.send("+15550100", "T#a#1K##").await.unwrap());
        assert!(mock.send("+15550100", "B####").await.unwrap());

        let sent = mock.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].text, "T#a#1K##");
        assert_eq!(sent[1].text, "B####");
    }

    #[tokio::test]
    async fn scripted_outcomes_drain_fifo() {
        let mock = MockSmsTransport::new();
        mock.push_outcome(Ok(false));
        assert!(!mock.send("+15550100", "x").await.unwrap());
        // Unscripted sends succeed again.
        assert!(mock.send("+15550100", "y").await.unwrap());
    }

    #[tokio::test]
    async fn inbound_fans_out_to_subscribers() {
        let mock = MockSmsTransport::new();
        let mut rx = mock.incoming();
        mock.inject_inbound("+15550100", "OK#T0442#bal:100");
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.address, "+15550100");
        assert_eq!(msg.body, "OK#T0442#bal:100");
    }
}
