//! Reconnect decisions.  Pure functions, no I/O, no clock.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Substrings (matched case-insensitively) that mark a failure as TLS related.
const CERTIFICATE_MARKERS: [&str; 4] = ["certificate", "ssl", "tls", "handshake"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry,
    WaitForNetwork,
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Certificate,
    Transient,
}

/// Classify a disconnect cause or connect error message.
///
/// ```
/// use ham_voice::session::{classify_failure, FailureClass};
///
/// assert_eq!(classify_failure(Some("SSL handshake aborted")), FailureClass::Certificate);
/// assert_eq!(classify_failure(Some("Connection reset by peer")), FailureClass::Transient);
/// assert_eq!(classify_failure(None), FailureClass::Transient);
/// ```
pub fn classify_failure(cause: Option<&str>) -> FailureClass {
    let Some(cause) = cause else {
        return FailureClass::Transient;
    };
    let cause = cause.to_lowercase();
    if CERTIFICATE_MARKERS.iter().any(|m| cause.contains(m)) {
        FailureClass::Certificate
    } else {
        FailureClass::Transient
    }
}

/// `GiveUp` once `attempt` reaches `max_attempts`, else `WaitForNetwork`
/// while offline, else `Retry`.
pub fn decide(attempt: u32, max_attempts: u32, network_available: bool) -> ReconnectDecision {
    if attempt >= max_attempts {
        ReconnectDecision::GiveUp
    } else if !network_available {
        ReconnectDecision::WaitForNetwork
    } else {
        ReconnectDecision::Retry
    }
}

/// Whether a failure should be answered with the one-time no-verification
/// attempt instead of the regular reconnect loop.
pub fn should_fall_back(class: FailureClass, tried_without_certificate: bool, verifying: bool) -> bool {
    class == FailureClass::Certificate && verifying && !tried_without_certificate
}

/// Limit and cadence of the reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    pub fn decide(&self, attempt: u32, network_available: bool) -> ReconnectDecision {
        decide(attempt, self.max_attempts, network_available)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}
