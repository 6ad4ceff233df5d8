//! Session state machine types and the shared status snapshot.
//!
//! [`ConnectionState`] is owned by the connection supervisor.  The UI reads
//! everything it needs through [`SharedStatus`], a copy the session actor
//! refreshes after every step, and receives [`SessionNotice`]s for events
//! that deserve a toast or a log line.
//!
//! [`SharedStatus`] is a type alias for `Arc<Mutex<SessionStatus>>`, cheap to
//! clone and safe to share across threads.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::engine::{Channel, ChannelId, TransmissionMode};

// ---------------------------------------------------------------------------
// ConnectionState
// ---------------------------------------------------------------------------

/// States of the connection to the voice server.
///
/// ```text
/// Disconnected ──connect──▶ Connecting ──engine connected──▶ Connected
///                                │                             │ authenticated
///                                │ failure                     ▼
///                                └────────▶ Error        Authenticated
/// Connected / Authenticated ──engine disconnected──▶ Disconnected
/// any ──user disconnect──▶ Disconnecting ──▶ Disconnected
/// reconnect gave up ──▶ Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Disconnecting,
    Error,
}

impl ConnectionState {
    /// `true` once the engine reports a live connection.
    ///
    /// ```
    /// use ham_voice::session::ConnectionState;
    ///
    /// assert!(ConnectionState::Connected.is_connected());
    /// assert!(ConnectionState::Authenticated.is_connected());
    /// assert!(!ConnectionState::Connecting.is_connected());
    /// assert!(!ConnectionState::Error.is_connected());
    /// ```
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Authenticated)
    }

    /// States from which a manual connect is accepted.
    pub fn is_idle(self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Error)
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting…",
            ConnectionState::Connected => "Connected",
            ConnectionState::Authenticated => "Authenticated",
            ConnectionState::Disconnecting => "Disconnecting…",
            ConnectionState::Error => "Error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// ReconnectState
// ---------------------------------------------------------------------------

/// Progress of the automatic reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectState {
    pub attempt: u32,
    pub max_attempts: u32,
    pub is_reconnecting: bool,
    pub last_failure_was_certificate: bool,
    /// Set once the no-verification fallback has been used for the current
    /// connection attempt.
    pub tried_without_certificate: bool,
}

impl ReconnectState {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            is_reconnecting: false,
            last_failure_was_certificate: false,
            tried_without_certificate: false,
        }
    }

    /// Back to zero, keeping `max_attempts`.
    pub fn reset(&mut self) {
        *self = Self::new(self.max_attempts);
    }
}

impl Default for ReconnectState {
    fn default() -> Self {
        Self::new(crate::config::ReconnectConfig::default().max_attempts)
    }
}

// ---------------------------------------------------------------------------
// SessionNotice
// ---------------------------------------------------------------------------

/// User-facing events emitted by the session actor.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    StateChanged(ConnectionState),
    ReconnectProgress {
        attempt: u32,
        max_attempts: u32,
        waiting_for_network: bool,
    },
    /// Terminal: no more automatic attempts until a manual connect.
    ReconnectGaveUp { attempts: u32 },
    ReconnectStopped,
    PermissionDenied {
        reason: String,
        /// The denial came from a registration request.
        registration: bool,
    },
    HardwarePttLost,
    FeedbackFailed { reason: String },
}

impl fmt::Display for SessionNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionNotice::StateChanged(state) => write!(f, "Connection: {state}"),
            SessionNotice::ReconnectProgress {
                attempt,
                max_attempts,
                waiting_for_network: true,
            } => write!(f, "Waiting for network ({attempt}/{max_attempts})"),
            SessionNotice::ReconnectProgress {
                attempt,
                max_attempts,
                ..
            } => write!(f, "Reconnecting ({attempt}/{max_attempts})"),
            SessionNotice::ReconnectGaveUp { attempts } => {
                write!(f, "Gave up reconnecting after {attempts} attempts")
            }
            SessionNotice::ReconnectStopped => write!(f, "Reconnect stopped"),
            SessionNotice::PermissionDenied {
                reason,
                registration: true,
            } => write!(f, "Registration failed: {reason}"),
            SessionNotice::PermissionDenied { reason, .. } => {
                write!(f, "Permission denied: {reason}")
            }
            SessionNotice::HardwarePttLost => {
                write!(f, "Hardware PTT disconnected; continuing without it")
            }
            SessionNotice::FeedbackFailed { reason } => write!(f, "Roger beep failed: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionStatus / SharedStatus
// ---------------------------------------------------------------------------

/// Everything the UI renders.  Written only by the session actor.
#[derive(Debug, Clone, Default)]
pub struct SessionStatus {
    pub connection: ConnectionState,
    pub reconnect: ReconnectState,
    pub voice_hold_remaining_ms: u32,
    pub injecting_feedback: bool,
    pub local_talking: bool,
    pub hardware_ptt_active: bool,
    pub hardware_ptt_connected: bool,
    pub network_available: bool,
    /// Label of the target being connected to or retried.
    pub server: Option<String>,
    pub roster: Option<Channel>,
    pub current_channel: Option<ChannelId>,
    pub transmission_mode: TransmissionMode,
}

/// Thread-safe handle to the session status.
pub type SharedStatus = Arc<Mutex<SessionStatus>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(Mutex::new(SessionStatus::default()))
}

/// Lock, recovering from poisoning; the status is a plain snapshot.
pub(crate) fn lock_status(status: &SharedStatus) -> MutexGuard<'_, SessionStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
