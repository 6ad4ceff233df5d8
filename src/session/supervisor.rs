//! Connection supervisor: the connection state machine, the reconnect loop
//! and the one-time certificate fallback.
//!
//! The supervisor performs no I/O.  Inputs are commands and engine events;
//! outputs are [`SupervisorAction`]s the session actor carries out.  Timers
//! are plain deadlines surfaced through [`ConnectionSupervisor::next_deadline`]
//! and serviced by [`ConnectionSupervisor::on_timer`].
//!
//! ```text
//! failure ──certificate, not yet tried──▶ fallback in 1 s (verification off)
//!         ──otherwise──▶ reconnect loop: tick now, then every 30 s
//!                          GiveUp          → Error + notice, target dropped
//!                          WaitForNetwork  → attempt += 1, no connect
//!                          Retry           → attempt += 1, connect
//! network restored while looping ──Retry──▶ connect now (attempt unchanged)
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::config::{ReconnectConfig, TimingConfig};
use crate::engine::{EngineError, ServerTarget};

use super::policy::{classify_failure, should_fall_back, FailureClass, ReconnectDecision, ReconnectPolicy};
use super::state::{ConnectionState, ReconnectState, SessionNotice};

/// Side effects requested by the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorAction {
    /// Start a connect attempt.  Its result must be fed back with the same
    /// `seq`; results for older sequence numbers are ignored.
    Connect {
        seq: u64,
        target: ServerTarget,
        verify_certificates: bool,
    },
    Disconnect,
    RememberCertificate {
        alias: String,
        chain: Vec<Vec<u8>>,
    },
    JoinChannel(String),
    Register,
    /// Stop local talk, feedback injection and peer timers.
    CancelLocalActivity,
    Notice(SessionNotice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub policy: ReconnectPolicy,
    pub certificate_fallback_delay: Duration,
    pub auto_join_delay: Duration,
    pub register_delay: Duration,
}

impl SupervisorSettings {
    pub fn from_config(reconnect: &ReconnectConfig, timing: &TimingConfig) -> Self {
        Self {
            policy: ReconnectPolicy::from_config(reconnect),
            certificate_fallback_delay: Duration::from_millis(reconnect.certificate_fallback_delay_ms),
            auto_join_delay: Duration::from_millis(timing.auto_join_delay_ms),
            register_delay: Duration::from_millis(timing.register_delay_ms),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default(), &TimingConfig::default())
    }
}

pub struct ConnectionSupervisor {
    settings: SupervisorSettings,
    state: ConnectionState,
    reconnect: ReconnectState,
    target: Option<ServerTarget>,
    /// Verification flag used for the current and following attempts.
    verifying: bool,
    user_disconnected: bool,
    network_available: bool,
    seq: u64,
    next_reconnect: Option<Instant>,
    fallback_at: Option<Instant>,
    auto_join_at: Option<Instant>,
    register_at: Option<Instant>,
}

impl ConnectionSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            reconnect: ReconnectState::new(settings.policy.max_attempts),
            settings,
            state: ConnectionState::Disconnected,
            target: None,
            verifying: true,
            user_disconnected: false,
            network_available: true,
            seq: 0,
            next_reconnect: None,
            fallback_at: None,
            auto_join_at: None,
            register_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect(&self) -> ReconnectState {
        self.reconnect
    }

    pub fn target(&self) -> Option<&ServerTarget> {
        self.target.as_ref()
    }

    pub fn network_available(&self) -> bool {
        self.network_available
    }

    pub fn is_user_disconnected(&self) -> bool {
        self.user_disconnected
    }

    /// `false` once the user disconnected or the target was dropped; engine
    /// sessions that come up after that are torn down again.
    pub fn wants_connection(&self) -> bool {
        !self.user_disconnected && self.target.is_some()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.next_reconnect,
            self.fallback_at,
            self.auto_join_at,
            self.register_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Manual connect.  Accepted only from `Disconnected` or `Error`; cancels
    /// any reconnect loop and starts over with a fresh [`ReconnectState`].
    pub fn connect(&mut self, target: ServerTarget) -> Vec<SupervisorAction> {
        if !self.state.is_idle() {
            log::info!(
                "supervisor: ignoring connect to {} while {}",
                target.label(),
                self.state
            );
            return Vec::new();
        }
        log::info!("supervisor: connecting to {}", target.label());
        self.user_disconnected = false;
        self.reconnect.reset();
        self.clear_timers();
        self.verifying = !target.skip_certificate_verification;
        self.target = Some(target);

        let mut actions = Vec::new();
        self.begin_attempt(&mut actions);
        actions
    }

    /// `user_initiated` makes the disconnect sticky: no automatic reconnect
    /// until the next [`connect`](Self::connect).
    pub fn disconnect(&mut self, user_initiated: bool) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();
        if !user_initiated {
            if self.state.is_connected() {
                self.transition(ConnectionState::Disconnecting, &mut actions);
                actions.push(SupervisorAction::Disconnect);
            }
            return actions;
        }

        log::info!("supervisor: user disconnect");
        let was_reconnecting = self.reconnect.is_reconnecting;
        self.user_disconnected = true;
        self.target = None;
        self.reconnect.reset();
        self.clear_timers();
        self.seq += 1;

        actions.push(SupervisorAction::CancelLocalActivity);
        if self.state != ConnectionState::Disconnected {
            self.transition(ConnectionState::Disconnecting, &mut actions);
            actions.push(SupervisorAction::Disconnect);
            self.transition(ConnectionState::Disconnected, &mut actions);
        }
        if was_reconnecting {
            actions.push(SupervisorAction::Notice(SessionNotice::ReconnectStopped));
        }
        actions
    }

    /// Halt an active reconnect loop and forget the target.
    pub fn stop_reconnecting(&mut self) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();
        if !self.reconnect.is_reconnecting && self.fallback_at.is_none() {
            log::debug!("supervisor: stop requested but not reconnecting");
            return actions;
        }
        log::info!(
            "supervisor: reconnect stopped after {} attempts",
            self.reconnect.attempt
        );
        self.target = None;
        self.reconnect.reset();
        self.clear_timers();
        self.seq += 1;
        if self.state == ConnectionState::Connecting {
            actions.push(SupervisorAction::Disconnect);
        }
        if !self.state.is_connected() {
            self.transition(ConnectionState::Disconnected, &mut actions);
        }
        actions.push(SupervisorAction::Notice(SessionNotice::ReconnectStopped));
        actions
    }

    pub fn set_network_available(&mut self, available: bool) -> Vec<SupervisorAction> {
        let restored = available && !self.network_available;
        self.network_available = available;
        let mut actions = Vec::new();
        if !restored {
            if !available {
                log::info!("supervisor: network lost");
            }
            return actions;
        }
        log::info!("supervisor: network available");
        if self.reconnect.is_reconnecting
            && self.state != ConnectionState::Connecting
            && self.fallback_at.is_none()
            && self.settings.policy.decide(self.reconnect.attempt, true) == ReconnectDecision::Retry
        {
            log::info!("supervisor: network restored, retrying now");
            self.begin_attempt(&mut actions);
        }
        actions
    }

    // -----------------------------------------------------------------------
    // Engine events
    // -----------------------------------------------------------------------

    pub fn on_connecting(&mut self) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();
        if !self.wants_connection() {
            log::debug!("supervisor: ignoring connecting with no wanted target");
            return actions;
        }
        self.transition(ConnectionState::Connecting, &mut actions);
        actions
    }

    pub fn on_connected(&mut self, now: Instant) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();
        if !self.wants_connection() {
            log::info!("supervisor: late connect after disconnect, closing it");
            actions.push(SupervisorAction::Disconnect);
            return actions;
        }
        if self.reconnect.is_reconnecting {
            log::info!(
                "supervisor: reconnected after {} attempts",
                self.reconnect.attempt
            );
        }
        self.reconnect.reset();
        self.clear_timers();
        self.transition(ConnectionState::Connected, &mut actions);

        if let Some(target) = &self.target {
            if target.auto_join_channel.as_deref().is_some_and(|c| !c.trim().is_empty()) {
                self.auto_join_at = Some(now + self.settings.auto_join_delay);
            }
            if target.register_with_server {
                self.register_at = Some(now + self.settings.register_delay);
            }
        }
        actions
    }

    pub fn on_authenticated(&mut self) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();
        if !self.wants_connection() {
            log::debug!("supervisor: ignoring authentication after disconnect");
            actions.push(SupervisorAction::Disconnect);
            return actions;
        }
        self.transition(ConnectionState::Authenticated, &mut actions);
        actions
    }

    pub fn on_disconnected(&mut self, cause: Option<&str>, now: Instant) -> Vec<SupervisorAction> {
        let mut actions = vec![SupervisorAction::CancelLocalActivity];
        self.auto_join_at = None;
        self.register_at = None;

        if self.user_disconnected || self.target.is_none() {
            self.transition(ConnectionState::Disconnected, &mut actions);
            return actions;
        }

        log::info!(
            "supervisor: connection lost ({})",
            cause.unwrap_or("no cause given")
        );
        let next = if self.state == ConnectionState::Connecting {
            ConnectionState::Error
        } else {
            ConnectionState::Disconnected
        };
        self.transition(next, &mut actions);
        self.handle_failure(cause, now, &mut actions);
        actions
    }

    pub fn on_certificate_rejected(&mut self, chain: Vec<Vec<u8>>, now: Instant) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();
        let Some(target) = &self.target else {
            log::debug!("supervisor: certificate rejected with no target, ignoring");
            return actions;
        };
        log::warn!("supervisor: server certificate rejected for {}", target.alias());
        if !chain.is_empty() {
            actions.push(SupervisorAction::RememberCertificate {
                alias: target.alias(),
                chain,
            });
        }
        self.handle_failure(Some("certificate rejected"), now, &mut actions);
        actions
    }

    /// Result of the connect attempt started with `seq`.
    pub fn on_connect_result(
        &mut self,
        seq: u64,
        result: Result<(), EngineError>,
        now: Instant,
    ) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();
        if seq != self.seq {
            log::debug!("supervisor: ignoring stale connect result #{seq}");
            return actions;
        }
        if let Err(e) = result {
            log::warn!("supervisor: connect failed: {e}");
            self.transition(ConnectionState::Error, &mut actions);
            self.handle_failure(Some(&e.to_string()), now, &mut actions);
        }
        actions
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    pub fn on_timer(&mut self, now: Instant) -> Vec<SupervisorAction> {
        let mut actions = Vec::new();

        if self.fallback_at.is_some_and(|at| at <= now) {
            self.fallback_at = None;
            log::info!("supervisor: retrying without certificate verification");
            self.verifying = false;
            self.begin_attempt(&mut actions);
        }

        if self.auto_join_at.is_some_and(|at| at <= now) {
            self.auto_join_at = None;
            if let Some(channel) = self.target.as_ref().and_then(|t| t.auto_join_channel.clone()) {
                actions.push(SupervisorAction::JoinChannel(channel));
            }
        }

        if self.register_at.is_some_and(|at| at <= now) {
            self.register_at = None;
            actions.push(SupervisorAction::Register);
        }

        if self.next_reconnect.is_some_and(|at| at <= now) {
            self.reconnect_tick(now, &mut actions);
        }

        actions
    }

    fn reconnect_tick(&mut self, now: Instant, actions: &mut Vec<SupervisorAction>) {
        let decision = self
            .settings
            .policy
            .decide(self.reconnect.attempt, self.network_available);
        match decision {
            ReconnectDecision::GiveUp => self.give_up(actions),
            ReconnectDecision::WaitForNetwork | ReconnectDecision::Retry => {
                self.reconnect.attempt += 1;
                let waiting = decision == ReconnectDecision::WaitForNetwork;
                log::info!(
                    "supervisor: reconnect attempt {}/{}{}",
                    self.reconnect.attempt,
                    self.reconnect.max_attempts,
                    if waiting { " (waiting for network)" } else { "" }
                );
                actions.push(SupervisorAction::Notice(SessionNotice::ReconnectProgress {
                    attempt: self.reconnect.attempt,
                    max_attempts: self.reconnect.max_attempts,
                    waiting_for_network: waiting,
                }));
                self.next_reconnect = Some(now + self.settings.policy.interval);
                if !waiting {
                    self.begin_attempt(actions);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn handle_failure(&mut self, cause: Option<&str>, now: Instant, actions: &mut Vec<SupervisorAction>) {
        if self.user_disconnected || self.target.is_none() {
            return;
        }
        let class = classify_failure(cause);
        self.reconnect.last_failure_was_certificate = class == FailureClass::Certificate;

        if self.fallback_at.is_some() {
            log::debug!("supervisor: fallback already scheduled");
            return;
        }
        if should_fall_back(class, self.reconnect.tried_without_certificate, self.verifying) {
            self.reconnect.tried_without_certificate = true;
            self.fallback_at = Some(now + self.settings.certificate_fallback_delay);
            log::info!(
                "supervisor: certificate failure, one attempt without verification in {} ms",
                self.settings.certificate_fallback_delay.as_millis()
            );
            return;
        }
        if !self.reconnect.is_reconnecting {
            log::info!("supervisor: starting reconnect loop");
            self.reconnect.is_reconnecting = true;
            self.next_reconnect = Some(now);
        }
        // Ensure the state reflects a dead link even if no event said so.
        if self.state == ConnectionState::Connecting {
            self.transition(ConnectionState::Error, actions);
        }
    }

    fn give_up(&mut self, actions: &mut Vec<SupervisorAction>) {
        let attempts = self.reconnect.attempt;
        log::warn!("supervisor: giving up after {attempts} reconnect attempts");
        self.reconnect.reset();
        self.target = None;
        self.clear_timers();
        self.seq += 1;
        self.transition(ConnectionState::Error, actions);
        actions.push(SupervisorAction::Notice(SessionNotice::ReconnectGaveUp { attempts }));
    }

    fn begin_attempt(&mut self, actions: &mut Vec<SupervisorAction>) {
        let Some(target) = self.target.clone() else {
            return;
        };
        self.seq += 1;
        self.transition(ConnectionState::Connecting, actions);
        actions.push(SupervisorAction::Connect {
            seq: self.seq,
            target,
            verify_certificates: self.verifying,
        });
    }

    fn clear_timers(&mut self) {
        self.next_reconnect = None;
        self.fallback_at = None;
        self.auto_join_at = None;
        self.register_at = None;
    }

    fn transition(&mut self, next: ConnectionState, actions: &mut Vec<SupervisorAction>) {
        if self.state == next {
            return;
        }
        log::info!("supervisor: {} → {}", self.state, next);
        self.state = next;
        actions.push(SupervisorAction::Notice(SessionNotice::StateChanged(next)));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
