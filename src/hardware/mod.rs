//! Hardware push-to-talk.
//!
//! ```text
//! PeerTalkMonitor ──activate()/deactivate()──▶ HardwarePtt (cheap handle)
//!                                                  │ unbounded mpsc
//!                                                  ▼
//!                                        worker task (sequenced)
//!                                          pre-delay → set_line(true)
//!                                          set_line(false) → post-delay
//!                                                  │ spawn_blocking
//!                                                  ▼
//!                                          PttLine (serial pin, rigctl, …)
//! ```
//!
//! Callers never wait on hardware timing.  A line failure is a capability
//! loss: the handle reports `is_connected() == false` and later calls no-op.

pub mod command;
pub mod ptt;

use thiserror::Error;

pub use command::CommandPttLine;
pub use ptt::{HardwarePtt, PttTiming};

#[derive(Debug, Error)]
pub enum PttError {
    #[error("PTT command is empty")]
    EmptyCommand,

    #[error("PTT command could not be parsed: {0}")]
    InvalidCommand(String),

    #[error("failed to run PTT command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("PTT command `{command}` exited with {status}")]
    Status {
        command: String,
        status: std::process::ExitStatus,
    },

    #[error("PTT worker failed: {0}")]
    Worker(String),
}

/// The physical control line (RTS/DTR pin, CAT command, GPIO …).
///
/// Calls may block; they are always made from the blocking pool.
pub trait PttLine: Send + 'static {
    fn set_line(&mut self, active: bool) -> Result<(), PttError>;

    fn describe(&self) -> String {
        "ptt line".into()
    }
}
