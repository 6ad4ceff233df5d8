//! Session orchestration.
//!
//! One [`Session`] actor per server connection.  Its parts are sans-IO state
//! machines the actor drives:
//!
//! * [`ConnectionSupervisor`]: connection state, reconnect loop, certificate fallback.
//! * [`TransmissionCoordinator`]: local talk per mode, voice hold, roger beep injection.
//! * [`PeerTalkMonitor`]: hardware PTT and local roger beeps driven by peers.
//! * [`TalkHoldTracker`]: per-party hold windows shared by the two above.
//! * [`ReconnectPolicy`]: retry / wait / give-up decisions.
//!
//! The UI talks to the actor through a [`SessionHandle`], reads
//! [`SharedStatus`] and listens to [`SessionNotice`]s.

pub mod feedback;
pub mod hold;
pub mod peers;
pub mod policy;
pub mod runner;
pub mod settings;
pub mod state;
pub mod supervisor;
pub mod transmit;

pub use feedback::{InjectionOutcome, InjectionTiming};
pub use hold::TalkHoldTracker;
pub use peers::{PeerAction, PeerTalkMonitor};
pub use policy::{
    classify_failure, decide, should_fall_back, FailureClass, ReconnectDecision, ReconnectPolicy,
};
pub use runner::{Collaborators, Session, SessionCommand, SessionError, SessionHandle};
pub use settings::SessionSettings;
pub use state::{
    new_shared_status, ConnectionState, ReconnectState, SessionNotice, SessionStatus, SharedStatus,
};
pub use supervisor::{ConnectionSupervisor, SupervisorAction, SupervisorSettings};
pub use transmit::{LocalTalk, TransmissionCoordinator, TransmitAction, TransmitSettings};
