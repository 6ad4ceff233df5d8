//! Ham-radio voice client core.
//!
//! Layers session orchestration, hardware push-to-talk and "roger beep"
//! feedback on top of an external voice-conferencing engine.
//!
//! ```text
//! VoiceEngine ──EngineEvent──▶ Session (actor) ──commands──▶ VoiceEngine
//!                                 │
//!          ┌──────────────────────┼───────────────────────┐
//!          ▼                      ▼                       ▼
//!  ConnectionSupervisor  TransmissionCoordinator   PeerTalkMonitor
//!  (reconnect, cert      (talk state, voice hold,  (peer holds, local
//!   fallback)             feedback injection)       beeps, hardware PTT)
//! ```

pub mod audio;
pub mod config;
pub mod engine;
pub mod hardware;
pub mod hotkey;
pub mod session;
pub mod tone;
pub mod trust;
