//! The voice engine seam.
//!
//! The engine (wire protocol, codec, capture and playback) is an external
//! collaborator.  This module defines the narrow interface the session
//! talks to:
//!
//! * [`VoiceEngine`]: commands out (connect, set-talking, inject audio, …).
//! * [`EngineEvent`]: events in, delivered over an unbounded
//!   `tokio::sync::mpsc` channel so engines can emit from any thread.
//!
//! [`LoopbackEngine`] is a self-contained implementation used for local
//! rehearsal.  `MockEngine` (under `#[cfg(test)]`) records every command.

pub mod channel;
pub mod loopback;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tone::ENGINE_SAMPLE_RATE;
use crate::trust::IdentityHandle;

pub use channel::{Channel, ChannelId, RosterUser};
pub use loopback::LoopbackEngine;
#[cfg(test)]
pub use mock::{EngineCall, MockEngine};

/// Session id of a remote user, as assigned by the server.
pub type PeerId = u32;

/// Default Mumble port.
pub const DEFAULT_PORT: u16 = 64738;

// ---------------------------------------------------------------------------
// TransmissionMode
// ---------------------------------------------------------------------------

/// How the local party's talk state is decided.
///
/// | Variant       | Talking while …                          |
/// |---------------|------------------------------------------|
/// | Continuous    | connected                                |
/// | VoiceActivity | the engine's detector hears speech       |
/// | PushToTalk    | the PTT control is held                  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TransmissionMode {
    Continuous,
    VoiceActivity,
    #[default]
    PushToTalk,
}

impl TransmissionMode {
    pub fn label(self) -> &'static str {
        match self {
            TransmissionMode::Continuous => "Continuous",
            TransmissionMode::VoiceActivity => "Voice activity",
            TransmissionMode::PushToTalk => "Push-to-talk",
        }
    }
}

// ---------------------------------------------------------------------------
// ServerTarget
// ---------------------------------------------------------------------------

/// A client certificate held by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCertificate {
    /// Identifier understood by the certificate store.
    pub id: String,
    pub passphrase: Option<String>,
}

/// Where to connect and how.  Retained by the supervisor for retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerTarget {
    /// Display name; falls back to `address:port`.
    pub name: String,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
    pub client_certificate: Option<ClientCertificate>,
    pub skip_certificate_verification: bool,
    /// Channel name or `/`-separated path joined after connecting.
    pub auto_join_channel: Option<String>,
    /// Register the identity with the server after connecting.
    pub register_with_server: bool,
    /// Connect at startup.
    pub auto_connect: bool,
}

impl Default for ServerTarget {
    fn default() -> Self {
        Self {
            name: String::new(),
            address: String::new(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: None,
            client_certificate: None,
            skip_certificate_verification: false,
            auto_join_channel: None,
            register_with_server: false,
            auto_connect: false,
        }
    }
}

impl ServerTarget {
    pub fn new(address: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            username: username.into(),
            ..Self::default()
        }
    }

    /// Key under which the server's certificate is remembered.
    pub fn alias(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn label(&self) -> String {
        if self.name.trim().is_empty() {
            self.alias()
        } else {
            self.name.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectRequest
// ---------------------------------------------------------------------------

/// Everything the engine needs for one connection attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub target: ServerTarget,
    /// `false` only for the one-shot certificate fallback or when the
    /// target opts out of verification.
    pub verify_certificates: bool,
    /// Generated identity, used when the target names no certificate.
    pub identity: Option<IdentityHandle>,
    pub transmit_mode: TransmissionMode,
    pub detection_threshold: f32,
    pub voice_hold_ms: u32,
}

// ---------------------------------------------------------------------------
// EngineEvent
// ---------------------------------------------------------------------------

/// Callbacks from the engine, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Connecting,
    Connected,
    /// Server sync finished; the session is fully usable.
    Authenticated,
    /// `cause` is `None` for a clean close.
    Disconnected {
        cause: Option<String>,
    },
    /// TLS verification failed; `chain` is DER, leaf first.
    CertificateRejected {
        chain: Vec<Vec<u8>>,
    },
    ChannelChanged {
        channel: ChannelId,
    },
    /// The local user's talk state as seen by the engine.
    SelfTalkStateChanged {
        talking: bool,
    },
    PeerTalkStateChanged {
        peer: PeerId,
        talking: bool,
        same_channel: bool,
    },
    PermissionDenied {
        reason: String,
    },
    RosterChanged {
        root: Channel,
    },
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("not connected")]
    NotConnected,

    #[error("channel {0} does not exist")]
    UnknownChannel(ChannelId),

    #[error("registration failed: {0}")]
    Registration(String),
}

// ---------------------------------------------------------------------------
// VoiceEngine
// ---------------------------------------------------------------------------

/// Commands the session sends to the voice engine.
///
/// `connect` is async because it spans a network handshake.
/// `inject_raw_audio` blocks for real-time pacing and is always called from
/// `tokio::task::spawn_blocking`.  Everything else must return promptly.
#[async_trait]
pub trait VoiceEngine: Send + Sync {
    /// Start connecting.  `Ok` means the attempt is under way; the outcome
    /// arrives as [`EngineEvent::Connected`] or [`EngineEvent::Disconnected`].
    async fn connect(&self, request: ConnectRequest) -> Result<(), EngineError>;

    fn disconnect(&self);

    fn set_talking(&self, talking: bool);

    /// Send mono PCM at [`VoiceEngine::sample_rate`], frame by frame.
    /// Returns `false` if the engine rejected the audio.
    fn inject_raw_audio(&self, pcm: &[i16]) -> bool;

    fn join_channel(&self, channel: ChannelId) -> Result<(), EngineError>;

    fn set_transmit_mode(&self, mode: TransmissionMode);

    fn set_detection_threshold(&self, threshold: f32);

    fn set_voice_hold(&self, hold_ms: u32);

    /// Register the connected identity with the server.
    fn register_self(&self) -> Result<(), EngineError>;

    /// Current channel tree, if the server has sent one.
    fn channel_tree(&self) -> Option<Channel>;

    fn sample_rate(&self) -> u32 {
        ENGINE_SAMPLE_RATE
    }
}
