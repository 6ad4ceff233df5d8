//! Local transmission: talk state per mode, the voice-hold countdown, and
//! when to inject the transmitted roger beep.
//!
//! The coordinator is a sans-IO state machine.  The actor feeds it inputs
//! and carries out the returned [`TransmitAction`]s.  While a feedback tone
//! is being injected the coordinator sits in [`LocalTalk::Injecting`] and
//! ignores the engine's self-talk reports, which are echoes of the
//! injection itself.
//!
//! ```text
//!            VAD stop                hold elapsed, beep on
//! Talking ─────────────▶ Holding ───────────────────────▶ Injecting ──finish──▶ Idle
//!    ▲                      │ VAD start                       ▲
//!    └──────────────────────┘                                 │ PTT release, beep on
//! Talking (PTT held) ─────────────────────────────────────────┘
//! ```

use std::time::Duration;

use tokio::time::Instant;

use crate::engine::TransmissionMode;

use super::hold::TalkHoldTracker;

/// Local talk mode.  `Injecting` replaces a loose "is injecting" flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTalk {
    Idle,
    Talking,
    /// VAD stopped; the voice-hold countdown is running.
    Holding,
    Injecting { id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransmitAction {
    SetTalking(bool),
    SetTransmitMode(TransmissionMode),
    SetDetectionThreshold(f32),
    SetVoiceHold(u32),
    PlayVoxPreTone,
    PlayLocalBeep,
    /// Run the injection sequence.  `assert_talking` is false when talk is
    /// already asserted (PTT release).
    StartInjection { id: u64, assert_talking: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransmitSettings {
    pub mode: TransmissionMode,
    pub voice_hold: Duration,
    pub detection_threshold: f32,
    /// Countdown refresh interval.
    pub tick: Duration,
    pub transmit_beep: bool,
    pub local_beep: bool,
    pub vox_pre_tone: bool,
}

impl Default for TransmitSettings {
    fn default() -> Self {
        Self {
            mode: TransmissionMode::default(),
            voice_hold: Duration::from_millis(500),
            detection_threshold: 0.5,
            tick: Duration::from_millis(50),
            transmit_beep: false,
            local_beep: false,
            vox_pre_tone: false,
        }
    }
}

pub struct TransmissionCoordinator {
    settings: TransmitSettings,
    local: LocalTalk,
    hold: TalkHoldTracker<()>,
    next_tick: Option<Instant>,
    connected: bool,
    ptt_pressed: bool,
    next_injection_id: u64,
}

impl TransmissionCoordinator {
    pub fn new(settings: TransmitSettings) -> Self {
        Self {
            hold: TalkHoldTracker::new(settings.voice_hold),
            settings,
            local: LocalTalk::Idle,
            next_tick: None,
            connected: false,
            ptt_pressed: false,
            next_injection_id: 0,
        }
    }

    pub fn settings(&self) -> &TransmitSettings {
        &self.settings
    }

    pub fn local(&self) -> LocalTalk {
        self.local
    }

    pub fn is_injecting(&self) -> bool {
        matches!(self.local, LocalTalk::Injecting { .. })
    }

    /// Whether `id` is the injection currently in flight.
    pub fn is_current_injection(&self, id: u64) -> bool {
        self.local == LocalTalk::Injecting { id }
    }

    pub fn voice_hold_remaining(&self, now: Instant) -> Duration {
        self.hold.remaining(&(), now).unwrap_or(Duration::ZERO)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Push the transmit configuration to a freshly connected engine.
    pub fn on_connected(&mut self) -> Vec<TransmitAction> {
        self.connected = true;
        let mut actions = vec![
            TransmitAction::SetTransmitMode(self.settings.mode),
            TransmitAction::SetDetectionThreshold(self.settings.detection_threshold),
            TransmitAction::SetVoiceHold(self.hold_ms()),
        ];
        if !self.is_injecting() {
            actions.extend(self.apply_mode_talk_state());
        }
        actions
    }

    /// Drop all local activity.  Returns the id of an injection that was in
    /// flight so the caller can abort it.
    pub fn reset(&mut self) -> Option<u64> {
        let aborted = match self.local {
            LocalTalk::Injecting { id } => Some(id),
            _ => None,
        };
        self.connected = false;
        self.ptt_pressed = false;
        self.local = LocalTalk::Idle;
        self.hold.clear();
        self.next_tick = None;
        aborted
    }

    // -----------------------------------------------------------------------
    // Inputs
    // -----------------------------------------------------------------------

    /// Engine report of our own talk state.
    pub fn on_self_talk_changed(&mut self, talking: bool, now: Instant) -> Vec<TransmitAction> {
        if self.is_injecting() {
            log::debug!("transmit: ignoring self talk={talking} during feedback injection");
            return Vec::new();
        }
        if self.settings.mode != TransmissionMode::VoiceActivity {
            return Vec::new();
        }
        match (self.local, talking) {
            (LocalTalk::Holding, true) => {
                self.hold.mark_started(&());
                self.next_tick = None;
                self.local = LocalTalk::Talking;
                log::debug!("transmit: talking resumed, hold cancelled");
            }
            (LocalTalk::Idle, true) => self.local = LocalTalk::Talking,
            (LocalTalk::Talking, false) => {
                self.hold.mark_stopped((), now);
                self.local = LocalTalk::Holding;
                self.schedule_tick(now);
            }
            _ => {}
        }
        Vec::new()
    }

    pub fn on_ptt_pressed(&mut self) -> Vec<TransmitAction> {
        if self.settings.mode != TransmissionMode::PushToTalk {
            log::debug!("transmit: PTT press ignored in {} mode", self.settings.mode.label());
            return Vec::new();
        }
        if self.ptt_pressed {
            return Vec::new();
        }
        self.ptt_pressed = true;
        if self.is_injecting() {
            log::debug!("transmit: PTT pressed during feedback, deferring");
            return Vec::new();
        }
        let mut actions = Vec::new();
        if self.settings.vox_pre_tone {
            actions.push(TransmitAction::PlayVoxPreTone);
        }
        if self.connected {
            actions.push(TransmitAction::SetTalking(true));
        }
        self.local = LocalTalk::Talking;
        actions
    }

    pub fn on_ptt_released(&mut self) -> Vec<TransmitAction> {
        if self.settings.mode != TransmissionMode::PushToTalk || !self.ptt_pressed {
            return Vec::new();
        }
        self.ptt_pressed = false;
        if self.is_injecting() {
            return Vec::new();
        }
        let mut actions = Vec::new();
        if self.settings.local_beep {
            actions.push(TransmitAction::PlayLocalBeep);
        }
        if self.settings.transmit_beep && self.connected {
            actions.extend(self.start_injection(false));
        } else {
            if self.connected {
                actions.push(TransmitAction::SetTalking(false));
            }
            self.local = LocalTalk::Idle;
        }
        actions
    }

    pub fn on_mode_changed(&mut self, mode: TransmissionMode) -> Vec<TransmitAction> {
        if mode == self.settings.mode {
            return Vec::new();
        }
        log::info!(
            "transmit: mode {} → {}",
            self.settings.mode.label(),
            mode.label()
        );
        self.settings.mode = mode;
        self.ptt_pressed = false;
        self.hold.clear();
        self.next_tick = None;

        let mut actions = Vec::new();
        if self.connected {
            actions.push(TransmitAction::SetTransmitMode(mode));
        }
        if !self.is_injecting() {
            self.local = LocalTalk::Idle;
            actions.extend(self.apply_mode_talk_state());
        }
        actions
    }

    pub fn set_voice_hold(&mut self, hold: Duration) -> Vec<TransmitAction> {
        self.settings.voice_hold = hold;
        self.hold.set_hold(hold);
        if self.connected {
            vec![TransmitAction::SetVoiceHold(self.hold_ms())]
        } else {
            Vec::new()
        }
    }

    pub fn set_detection_threshold(&mut self, threshold: f32) -> Vec<TransmitAction> {
        self.settings.detection_threshold = threshold;
        if self.connected {
            vec![TransmitAction::SetDetectionThreshold(threshold)]
        } else {
            Vec::new()
        }
    }

    pub fn set_feedback(&mut self, transmit_beep: bool, local_beep: bool) {
        self.settings.transmit_beep = transmit_beep;
        self.settings.local_beep = local_beep;
    }

    /// Voice-hold countdown tick.
    pub fn on_timer(&mut self, now: Instant) -> Vec<TransmitAction> {
        if !self.next_tick.is_some_and(|at| at <= now) {
            return Vec::new();
        }
        self.next_tick = None;
        if self.local != LocalTalk::Holding {
            return Vec::new();
        }
        if self.hold.expired(now).is_empty() {
            self.schedule_tick(now);
            return Vec::new();
        }

        log::debug!("transmit: voice hold elapsed");
        self.local = LocalTalk::Idle;
        if self.settings.transmit_beep && self.connected {
            self.start_injection(true)
        } else {
            Vec::new()
        }
    }

    /// The injection task for `id` has finished its cleanup.
    pub fn on_injection_finished(&mut self, id: u64) -> Vec<TransmitAction> {
        if !self.is_current_injection(id) {
            log::debug!("transmit: ignoring stale injection #{id}");
            return Vec::new();
        }
        self.local = LocalTalk::Idle;
        if !self.connected {
            return Vec::new();
        }
        match self.settings.mode {
            TransmissionMode::PushToTalk if self.ptt_pressed => {
                log::debug!("transmit: re-asserting deferred PTT press");
                self.local = LocalTalk::Talking;
                vec![TransmitAction::SetTalking(true)]
            }
            TransmissionMode::Continuous => self.apply_mode_talk_state(),
            _ => Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn start_injection(&mut self, assert_talking: bool) -> Vec<TransmitAction> {
        if let LocalTalk::Injecting { id } = self.local {
            log::debug!("transmit: feedback #{id} in flight, dropping new trigger");
            return Vec::new();
        }
        self.next_injection_id += 1;
        let id = self.next_injection_id;
        self.local = LocalTalk::Injecting { id };
        log::debug!("transmit: starting feedback injection #{id}");
        vec![TransmitAction::StartInjection { id, assert_talking }]
    }

    fn apply_mode_talk_state(&mut self) -> Vec<TransmitAction> {
        if !self.connected {
            return Vec::new();
        }
        match self.settings.mode {
            TransmissionMode::Continuous => {
                self.local = LocalTalk::Talking;
                vec![TransmitAction::SetTalking(true)]
            }
            // A key held while the link came up keeps transmitting.
            TransmissionMode::PushToTalk if self.ptt_pressed => {
                self.local = LocalTalk::Talking;
                vec![TransmitAction::SetTalking(true)]
            }
            TransmissionMode::PushToTalk => {
                self.local = LocalTalk::Idle;
                vec![TransmitAction::SetTalking(false)]
            }
            TransmissionMode::VoiceActivity => Vec::new(),
        }
    }

    fn schedule_tick(&mut self, now: Instant) {
        let tick = now + self.settings.tick;
        self.next_tick = Some(match self.hold.next_expiry() {
            Some(expiry) => tick.min(expiry),
            None => tick,
        });
    }

    fn hold_ms(&self) -> u32 {
        u32::try_from(self.settings.voice_hold.as_millis()).unwrap_or(u32::MAX)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
