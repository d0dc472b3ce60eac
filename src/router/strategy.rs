//! Routing strategies.
//!
//! A strategy is a named bundle of routing parameters: when HTTP is worth
//! attempting, with what timeout, how long a queued request waits before
//! SMS escalation, and which priorities may use SMS at all. `Custom`
//! carries a caller-built policy verbatim.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::request::Priority;

/// Score at or below which a request is a candidate for the SMS channel.
pub const SMS_SCORE_CEILING: f64 = 0.3;

/// Named routing strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Try HTTP on anything better than a 2G link, escalate to SMS fast.
    Aggressive,
    /// Two-tier HTTP attempts, SMS reserved for the highest priorities.
    Balanced,
    /// HTTP only on a solid link, SMS only for critical traffic.
    Conservative,
    /// Caller-supplied parameters.
    Custom(RoutingPolicy),
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Balanced
    }
}

impl Strategy {
    /// Resolve to concrete routing parameters.
    pub fn policy(&self) -> RoutingPolicy {
        match self {
            Strategy::Aggressive => RoutingPolicy::aggressive(),
            Strategy::Balanced => RoutingPolicy::balanced(),
            Strategy::Conservative => RoutingPolicy::conservative(),
            Strategy::Custom(policy) => policy.clone(),
        }
    }
}

/// Concrete routing parameters resolved from a [`Strategy`].
///
/// Thresholds are strict: a score exactly at a threshold falls through to
/// the next branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    /// Score above which HTTP is attempted with [`Self::full_timeout`].
    pub full_threshold: f64,

    /// Timeout for a confident HTTP attempt.
    pub full_timeout: Duration,

    /// Optional second tier: score above this (but below
    /// [`Self::full_threshold`]) gets a short HTTP attempt.
    pub degraded_threshold: Option<f64>,

    /// Timeout for the short attempt.
    pub degraded_timeout: Duration,

    /// How long a queued request waits before the SMS escalation fires.
    pub sms_escalation_delay: Duration,

    /// Minimum priority that sends SMS immediately when fully offline.
    pub immediate_sms_floor: Option<Priority>,

    /// Minimum priority that arms an escalation timer when queued.
    pub deferred_sms_floor: Option<Priority>,

    /// Arm an escalation timer when an HTTP attempt fails and the request
    /// lands in the queue.
    pub escalate_after_http_failure: bool,
}

impl RoutingPolicy {
    pub fn aggressive() -> Self {
        Self {
            full_threshold: 0.3,
            full_timeout: Duration::from_secs(10),
            degraded_threshold: None,
            degraded_timeout: Duration::from_secs(10),
            sms_escalation_delay: Duration::from_secs(60),
            immediate_sms_floor: Some(Priority::High),
            deferred_sms_floor: Some(Priority::High),
            escalate_after_http_failure: true,
        }
    }

    pub fn balanced() -> Self {
        Self {
            full_threshold: 0.7,
            full_timeout: Duration::from_secs(30),
            degraded_threshold: Some(0.3),
            degraded_timeout: Duration::from_secs(5),
            sms_escalation_delay: Duration::from_secs(5 * 60),
            immediate_sms_floor: Some(Priority::Critical),
            deferred_sms_floor: Some(Priority::High),
            escalate_after_http_failure: false,
        }
    }

    pub fn conservative() -> Self {
        Self {
            full_threshold: 0.5,
            full_timeout: Duration::from_secs(30),
            degraded_threshold: None,
            degraded_timeout: Duration::from_secs(30),
            sms_escalation_delay: Duration::from_secs(15 * 60),
            immediate_sms_floor: Some(Priority::Critical),
            deferred_sms_floor: Some(Priority::Critical),
            escalate_after_http_failure: false,
        }
    }

    /// Whether a priority class may send SMS immediately when offline.
    pub fn allows_immediate_sms(&self, priority: Priority) -> bool {
        self.immediate_sms_floor
            .is_some_and(|floor| priority >= floor)
    }

    /// Whether a priority class arms a deferred SMS escalation.
    pub fn allows_deferred_sms(&self, priority: Priority) -> bool {
        self.deferred_sms_floor
            .is_some_and(|floor| priority >= floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_is_the_default() {
        assert_eq!(Strategy::default().policy(), RoutingPolicy::balanced());
    }

    #[test]
    fn strategy_table_matches_contract() {
        let aggressive = Strategy::Aggressive.policy();
        assert_eq!(aggressive.full_threshold, 0.3);
        assert_eq!(aggressive.full_timeout, Duration::from_secs(10));
        assert_eq!(aggressive.sms_escalation_delay, Duration::from_secs(60));
        assert!(aggressive.allows_immediate_sms(Priority::High));
        assert!(aggressive.escalate_after_http_failure);

        let balanced = Strategy::Balanced.policy();
        assert_eq!(balanced.full_threshold, 0.7);
        assert_eq!(balanced.degraded_threshold, Some(0.3));
        assert_eq!(balanced.degraded_timeout, Duration::from_secs(5));
        assert_eq!(balanced.sms_escalation_delay, Duration::from_secs(300));
        assert!(balanced.allows_immediate_sms(Priority::Critical));
        assert!(!balanced.allows_immediate_sms(Priority::High));
        assert!(balanced.allows_deferred_sms(Priority::High));
        assert!(!balanced.allows_deferred_sms(Priority::Normal));

        let conservative = Strategy::Conservative.policy();
        assert_eq!(conservative.full_threshold, 0.5);
        assert_eq!(conservative.sms_escalation_delay, Duration::from_secs(900));
        assert!(!conservative.allows_deferred_sms(Priority::High));
        assert!(conservative.allows_deferred_sms(Priority::Critical));
    }

    #[test]
    fn custom_policy_passes_through() {
        let policy = RoutingPolicy {
            full_threshold: 0.42,
            sms_escalation_delay: Duration::from_secs(7),
            ..RoutingPolicy::balanced()
        };
        assert_eq!(Strategy::Custom(policy.clone()).policy(), policy);
    }
}
