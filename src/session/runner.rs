//! Session actor: one serialized event loop per session.
//!
//! [`Session`] owns the supervisor, the transmission coordinator and the
//! peer monitor, and is the only writer of their state.  Everything reaches
//! it as a message:
//!
//! ```text
//! SessionHandle ──SessionCommand──┐
//! VoiceEngine   ──EngineEvent─────┤
//! worker tasks  ──SessionInternal─┼──▶ select! ──▶ handle ──▶ publish SharedStatus
//! deadlines     ──sleep_until─────┘                   │
//!                                                     ├─▶ VoiceEngine commands
//!                                                     ├─▶ HardwarePtt / TonePlayer
//!                                                     └─▶ SessionNotice stream
//! ```
//!
//! Connect attempts, trust-store writes and feedback injection run on
//! separate tasks (blocking work on `spawn_blocking`) and report back over
//! the internal channel, so the loop itself never blocks.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::audio::TonePlayer;
use crate::config::VoxPreToneConfig;
use crate::engine::{
    ConnectRequest, EngineError, EngineEvent, ServerTarget, TransmissionMode, VoiceEngine,
};
use crate::hardware::HardwarePtt;
use crate::tone::{pure_tone, BeepTarget, FeedbackTone, ENGINE_SAMPLE_RATE};
use crate::trust::{IdentityHandle, IdentityProvider, TrustStore};

use super::feedback::{spawn_injection, InjectionJob, InjectionOutcome, InjectionTiming};
use super::peers::{PeerAction, PeerTalkMonitor};
use super::settings::SessionSettings;
use super::state::{lock_status, new_shared_status, SessionNotice, SessionStatus, SharedStatus};
use super::supervisor::{ConnectionSupervisor, SupervisorAction};
use super::transmit::{TransmissionCoordinator, TransmitAction};

const COMMAND_CAPACITY: usize = 32;
const NOTICE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has shut down")]
    Closed,
}

#[derive(Debug)]
pub enum SessionCommand {
    Connect(ServerTarget),
    Disconnect { user_initiated: bool },
    StopReconnecting,
    PttPressed,
    PttReleased,
    SetTransmissionMode(TransmissionMode),
    SetVoiceHold(u32),
    SetDetectionThreshold(f32),
    SetNetworkAvailable(bool),
    /// Replace both roger beeps.  `None` disables one.
    SetFeedback {
        transmit_beep: Option<FeedbackTone>,
        local_beep: Option<FeedbackTone>,
    },
    TestHardwarePtt(Duration),
}

/// Results reported back by tasks the session spawned.
#[derive(Debug)]
pub(crate) enum SessionInternal {
    ConnectFinished {
        seq: u64,
        result: Result<(), EngineError>,
    },
    InjectionFinished {
        id: u64,
        outcome: InjectionOutcome,
    },
}

enum Step {
    Command(SessionCommand),
    Engine(EngineEvent),
    EngineClosed,
    Internal(SessionInternal),
    Timer,
    Shutdown,
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Cheap, clonable front door to a running [`Session`].
///
/// The session shuts down once every handle has been dropped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    status: SharedStatus,
}

impl SessionHandle {
    pub async fn connect(&self, target: ServerTarget) -> Result<(), SessionError> {
        self.send(SessionCommand::Connect(target)).await
    }

    pub async fn disconnect(&self, user_initiated: bool) -> Result<(), SessionError> {
        self.send(SessionCommand::Disconnect { user_initiated }).await
    }

    pub async fn stop_reconnecting(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StopReconnecting).await
    }

    pub async fn ptt_pressed(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::PttPressed).await
    }

    pub async fn ptt_released(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::PttReleased).await
    }

    pub async fn set_transmission_mode(&self, mode: TransmissionMode) -> Result<(), SessionError> {
        self.send(SessionCommand::SetTransmissionMode(mode)).await
    }

    pub async fn set_voice_hold(&self, hold_ms: u32) -> Result<(), SessionError> {
        self.send(SessionCommand::SetVoiceHold(hold_ms)).await
    }

    pub async fn set_detection_threshold(&self, threshold: f32) -> Result<(), SessionError> {
        self.send(SessionCommand::SetDetectionThreshold(threshold)).await
    }

    pub async fn set_network_available(&self, available: bool) -> Result<(), SessionError> {
        self.send(SessionCommand::SetNetworkAvailable(available)).await
    }

    pub async fn set_feedback(
        &self,
        transmit_beep: Option<FeedbackTone>,
        local_beep: Option<FeedbackTone>,
    ) -> Result<(), SessionError> {
        self.send(SessionCommand::SetFeedback {
            transmit_beep,
            local_beep,
        })
        .await
    }

    pub async fn test_hardware_ptt(&self, hold: Duration) -> Result<(), SessionError> {
        self.send(SessionCommand::TestHardwarePtt(hold)).await
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> SessionStatus {
        lock_status(&self.status).clone()
    }

    pub fn shared_status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// External collaborators a session drives.
pub struct Collaborators {
    pub engine: Arc<dyn VoiceEngine>,
    pub hardware_ptt: HardwarePtt,
    pub player: Arc<dyn TonePlayer>,
    pub trust: Arc<dyn TrustStore>,
    pub identity: Arc<dyn IdentityProvider>,
}

/// The session actor.  Create with [`Session::new`], then spawn
/// [`run`](Self::run).
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ham_voice::audio::NullTonePlayer;
/// use ham_voice::engine::{LoopbackEngine, ServerTarget};
/// use ham_voice::hardware::HardwarePtt;
/// use ham_voice::session::{Collaborators, Session, SessionSettings};
/// use ham_voice::trust::{EphemeralIdentityProvider, MemoryTrustStore};
///
/// # async fn example() {
/// let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
/// let (session, handle, mut notices) = Session::new(
///     SessionSettings::default(),
///     Collaborators {
///         engine: Arc::new(LoopbackEngine::new(event_tx)),
///         hardware_ptt: HardwarePtt::disabled(),
///         player: Arc::new(NullTonePlayer),
///         trust: Arc::new(MemoryTrustStore::new()),
///         identity: Arc::new(EphemeralIdentityProvider::new()),
///     },
/// );
/// tokio::spawn(session.run(event_rx));
///
/// handle.connect(ServerTarget::new("localhost", 64738, "N0CALL")).await.unwrap();
/// while let Some(notice) = notices.recv().await {
///     println!("{notice}");
/// }
/// # }
/// ```
pub struct Session {
    supervisor: ConnectionSupervisor,
    transmit: TransmissionCoordinator,
    peers: PeerTalkMonitor,

    engine: Arc<dyn VoiceEngine>,
    hardware_ptt: HardwarePtt,
    player: Arc<dyn TonePlayer>,
    trust: Arc<dyn TrustStore>,
    identity: Arc<dyn IdentityProvider>,

    transmit_beep: Option<FeedbackTone>,
    local_beep: Option<FeedbackTone>,
    vox_pre_tone: Option<VoxPreToneConfig>,
    injection_timing: InjectionTiming,
    injection_task: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,

    status: SharedStatus,
    local_talking: bool,
    ptt_was_connected: bool,

    commands: mpsc::Receiver<SessionCommand>,
    notices: mpsc::Sender<SessionNotice>,
    internal_tx: mpsc::UnboundedSender<SessionInternal>,
    internal_rx: mpsc::UnboundedReceiver<SessionInternal>,
}

impl Session {
    pub fn new(
        settings: SessionSettings,
        collaborators: Collaborators,
    ) -> (Self, SessionHandle, mpsc::Receiver<SessionNotice>) {
        let (command_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (notices, notice_rx) = mpsc::channel(NOTICE_CAPACITY);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let status = new_shared_status();

        let handle = SessionHandle {
            commands: command_tx,
            status: Arc::clone(&status),
        };

        let ptt_was_connected = collaborators.hardware_ptt.is_connected();
        let session = Self {
            supervisor: ConnectionSupervisor::new(settings.supervisor),
            peers: PeerTalkMonitor::new(settings.transmit.voice_hold, settings.peer_sweep),
            transmit: TransmissionCoordinator::new(settings.transmit),
            engine: collaborators.engine,
            hardware_ptt: collaborators.hardware_ptt,
            player: collaborators.player,
            trust: collaborators.trust,
            identity: collaborators.identity,
            transmit_beep: settings.transmit_beep,
            local_beep: settings.local_beep,
            vox_pre_tone: settings.vox_pre_tone,
            injection_timing: settings.injection,
            injection_task: None,
            connect_task: None,
            status,
            local_talking: false,
            ptt_was_connected,
            commands,
            notices,
            internal_tx,
            internal_rx,
        };
        (session, handle, notice_rx)
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Run until every [`SessionHandle`] is dropped.  On exit the session
    /// disconnects and releases hardware PTT.
    pub async fn run(mut self, mut engine_events: mpsc::UnboundedReceiver<EngineEvent>) {
        log::info!("session: started");
        let mut engine_open = true;
        self.publish_status();

        loop {
            let deadline = self.next_deadline();
            let step = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::Shutdown,
                },
                event = engine_events.recv(), if engine_open => match event {
                    Some(event) => Step::Engine(event),
                    None => Step::EngineClosed,
                },
                Some(internal) = self.internal_rx.recv() => Step::Internal(internal),
                () = wait_until(deadline) => Step::Timer,
            };

            let now = Instant::now();
            match step {
                Step::Command(command) => self.handle_command(command),
                Step::Engine(event) => self.handle_engine_event(event, now),
                Step::EngineClosed => {
                    log::warn!("session: engine event channel closed");
                    engine_open = false;
                }
                Step::Internal(internal) => self.handle_internal(internal, now),
                Step::Timer => self.handle_timer(now),
                Step::Shutdown => break,
            }
            self.publish_status();
        }

        log::info!("session: all handles dropped, shutting down");
        let actions = self.supervisor.disconnect(true);
        self.apply_supervisor(actions);
        self.hardware_ptt.deactivate();
        self.publish_status();
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.supervisor.next_deadline(),
            self.transmit.next_deadline(),
            self.peers.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // -----------------------------------------------------------------------
    // Inputs
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, command: SessionCommand) {
        log::debug!("session: command {command:?}");
        match command {
            SessionCommand::Connect(target) => {
                let actions = self.supervisor.connect(target);
                self.apply_supervisor(actions);
            }
            SessionCommand::Disconnect { user_initiated } => {
                let actions = self.supervisor.disconnect(user_initiated);
                self.apply_supervisor(actions);
            }
            SessionCommand::StopReconnecting => {
                let actions = self.supervisor.stop_reconnecting();
                self.apply_supervisor(actions);
            }
            SessionCommand::SetNetworkAvailable(available) => {
                let actions = self.supervisor.set_network_available(available);
                self.apply_supervisor(actions);
            }
            SessionCommand::PttPressed => {
                let actions = self.transmit.on_ptt_pressed();
                self.apply_transmit(actions);
            }
            SessionCommand::PttReleased => {
                let actions = self.transmit.on_ptt_released();
                self.apply_transmit(actions);
            }
            SessionCommand::SetTransmissionMode(mode) => {
                let actions = self.transmit.on_mode_changed(mode);
                self.apply_transmit(actions);
            }
            SessionCommand::SetVoiceHold(hold_ms) => {
                let hold = Duration::from_millis(u64::from(hold_ms));
                self.peers.set_hold(hold);
                let actions = self.transmit.set_voice_hold(hold);
                self.apply_transmit(actions);
            }
            SessionCommand::SetDetectionThreshold(threshold) => {
                let actions = self.transmit.set_detection_threshold(threshold);
                self.apply_transmit(actions);
            }
            SessionCommand::SetFeedback {
                transmit_beep,
                local_beep,
            } => {
                self.transmit
                    .set_feedback(transmit_beep.is_some(), local_beep.is_some());
                self.transmit_beep = transmit_beep;
                self.local_beep = local_beep;
            }
            SessionCommand::TestHardwarePtt(hold) => {
                if !self.hardware_ptt.is_connected() {
                    log::warn!("session: PTT test requested but no hardware PTT is connected");
                }
                self.hardware_ptt.test_pulse(hold);
            }
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent, now: Instant) {
        match event {
            EngineEvent::Connecting => {
                let actions = self.supervisor.on_connecting();
                self.apply_supervisor(actions);
            }
            EngineEvent::Connected => {
                let wanted = self.supervisor.wants_connection();
                let actions = self.supervisor.on_connected(now);
                self.apply_supervisor(actions);
                if wanted {
                    let actions = self.transmit.on_connected();
                    self.apply_transmit(actions);
                }
            }
            EngineEvent::Authenticated => {
                let actions = self.supervisor.on_authenticated();
                self.apply_supervisor(actions);
            }
            EngineEvent::Disconnected { cause } => {
                let actions = self.supervisor.on_disconnected(cause.as_deref(), now);
                self.apply_supervisor(actions);
                lock_status(&self.status).current_channel = None;
            }
            EngineEvent::CertificateRejected { chain } => {
                let actions = self.supervisor.on_certificate_rejected(chain, now);
                self.apply_supervisor(actions);
            }
            EngineEvent::ChannelChanged { channel } => {
                log::info!("session: now in channel #{channel}");
                lock_status(&self.status).current_channel = Some(channel);
            }
            EngineEvent::SelfTalkStateChanged { talking } => {
                self.local_talking = talking;
                let actions = self.transmit.on_self_talk_changed(talking, now);
                self.apply_transmit(actions);
            }
            EngineEvent::PeerTalkStateChanged {
                peer,
                talking,
                same_channel,
            } => {
                let actions = self
                    .peers
                    .on_peer_talk_changed(peer, talking, same_channel, now);
                self.apply_peers(actions);
            }
            EngineEvent::PermissionDenied { reason } => {
                let registration = reason.to_lowercase().contains("register");
                log::warn!("session: permission denied: {reason}");
                self.notify(SessionNotice::PermissionDenied {
                    reason,
                    registration,
                });
            }
            EngineEvent::RosterChanged { root } => {
                lock_status(&self.status).roster = Some(root);
            }
        }
    }

    fn handle_internal(&mut self, internal: SessionInternal, now: Instant) {
        match internal {
            SessionInternal::ConnectFinished { seq, result } => {
                let actions = self.supervisor.on_connect_result(seq, result, now);
                self.apply_supervisor(actions);
            }
            SessionInternal::InjectionFinished { id, outcome } => self.finish_injection(id, outcome),
        }
    }

    fn handle_timer(&mut self, now: Instant) {
        let actions = self.supervisor.on_timer(now);
        self.apply_supervisor(actions);
        let actions = self.transmit.on_timer(now);
        self.apply_transmit(actions);
        let actions = self.peers.on_timer(now);
        self.apply_peers(actions);
    }

    // -----------------------------------------------------------------------
    // Effects
    // -----------------------------------------------------------------------

    fn apply_supervisor(&mut self, actions: Vec<SupervisorAction>) {
        for action in actions {
            match action {
                SupervisorAction::Connect {
                    seq,
                    target,
                    verify_certificates,
                } => self.spawn_connect(seq, target, verify_certificates),
                SupervisorAction::Disconnect => {
                    self.abort_connect();
                    self.engine.disconnect();
                }
                SupervisorAction::RememberCertificate { alias, chain } => {
                    self.remember_certificate(alias, chain)
                }
                SupervisorAction::JoinChannel(name) => self.auto_join(&name),
                SupervisorAction::Register => self.register(),
                SupervisorAction::CancelLocalActivity => self.cancel_local_activity(),
                SupervisorAction::Notice(notice) => self.notify(notice),
            }
        }
    }

    fn apply_transmit(&mut self, actions: Vec<TransmitAction>) {
        for action in actions {
            match action {
                TransmitAction::SetTalking(talking) => self.engine.set_talking(talking),
                TransmitAction::SetTransmitMode(mode) => self.engine.set_transmit_mode(mode),
                TransmitAction::SetDetectionThreshold(threshold) => {
                    self.engine.set_detection_threshold(threshold)
                }
                TransmitAction::SetVoiceHold(hold_ms) => self.engine.set_voice_hold(hold_ms),
                TransmitAction::PlayVoxPreTone => self.play_vox_pre_tone(),
                TransmitAction::PlayLocalBeep => self.play_local_beep(),
                TransmitAction::StartInjection { id, assert_talking } => {
                    self.start_injection(id, assert_talking)
                }
            }
        }
    }

    fn apply_peers(&mut self, actions: Vec<PeerAction>) {
        for action in actions {
            match action {
                PeerAction::ActivatePtt => self.hardware_ptt.activate(),
                PeerAction::DeactivatePtt => self.hardware_ptt.deactivate(),
                PeerAction::PlayLocalBeep { peer } => {
                    log::debug!("session: peer {peer} finished");
                    self.play_local_beep();
                }
            }
        }
    }

    fn spawn_connect(&mut self, seq: u64, target: ServerTarget, verify_certificates: bool) {
        let engine = Arc::clone(&self.engine);
        let identity = Arc::clone(&self.identity);
        let internal = self.internal_tx.clone();
        let settings = self.transmit.settings();
        let transmit_mode = settings.mode;
        let detection_threshold = settings.detection_threshold;
        let voice_hold_ms = u32::try_from(settings.voice_hold.as_millis()).unwrap_or(u32::MAX);

        log::info!(
            "session: connect #{seq} to {} (verify certificates: {verify_certificates})",
            target.alias()
        );
        self.abort_connect();
        self.connect_task = Some(tokio::spawn(async move {
            let identity = match target.client_certificate {
                Some(_) => None,
                None => load_identity(identity, target.username.clone()).await,
            };
            let request = ConnectRequest {
                target,
                verify_certificates,
                identity,
                transmit_mode,
                detection_threshold,
                voice_hold_ms,
            };
            let result = engine.connect(request).await;
            let _ = internal.send(SessionInternal::ConnectFinished { seq, result });
        }));
    }

    fn abort_connect(&mut self) {
        if let Some(task) = self.connect_task.take() {
            if !task.is_finished() {
                log::debug!("session: abandoning connect attempt in flight");
            }
            task.abort();
        }
    }

    fn remember_certificate(&self, alias: String, chain: Vec<Vec<u8>>) {
        let trust = Arc::clone(&self.trust);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = trust.accept_and_remember(&alias, &chain) {
                log::warn!("session: could not remember certificate for {alias}: {e}");
            }
        });
    }

    fn auto_join(&mut self, name: &str) {
        let Some(tree) = self.engine.channel_tree() else {
            log::warn!("session: channel tree not available, cannot join '{name}'");
            return;
        };
        let Some(channel) = tree.resolve(name) else {
            log::warn!("session: auto-join channel '{name}' not found");
            return;
        };
        log::info!("session: auto-joining '{}' (#{})", channel.name, channel.id);
        if let Err(e) = self.engine.join_channel(channel.id) {
            log::warn!("session: auto-join failed: {e}");
        }
    }

    fn register(&mut self) {
        match self.engine.register_self() {
            Ok(()) => log::info!("session: registered with server"),
            Err(e) => {
                log::warn!("session: {e}");
                self.notify(SessionNotice::PermissionDenied {
                    reason: e.to_string(),
                    registration: true,
                });
            }
        }
    }

    fn cancel_local_activity(&mut self) {
        if let Some(id) = self.transmit.reset() {
            log::info!("session: cancelling feedback injection #{id}");
            if let Some(task) = self.injection_task.take() {
                task.abort();
            }
            self.engine.set_talking(false);
        }
        let actions = self.peers.reset();
        self.apply_peers(actions);
    }

    fn start_injection(&mut self, id: u64, assert_talking: bool) {
        let Some(tone) = self.transmit_beep.clone() else {
            log::warn!("session: feedback #{id} requested with no transmit beep configured");
            self.engine.set_talking(false);
            let _ = self.internal_tx.send(SessionInternal::InjectionFinished {
                id,
                outcome: InjectionOutcome::Failed("no transmit beep configured".into()),
            });
            return;
        };
        let job = InjectionJob {
            id,
            tone,
            assert_talking,
            timing: self.injection_timing,
        };
        self.injection_task = Some(spawn_injection(
            Arc::clone(&self.engine),
            job,
            self.internal_tx.clone(),
        ));
    }

    fn finish_injection(&mut self, id: u64, outcome: InjectionOutcome) {
        if !self.transmit.is_current_injection(id) {
            log::debug!("session: ignoring finish of feedback #{id} ({outcome:?})");
            return;
        }
        self.injection_task = None;
        match outcome {
            InjectionOutcome::Sent { samples } => {
                log::debug!("feedback: #{id} sent ({samples} samples)")
            }
            InjectionOutcome::Rejected => {
                log::warn!("feedback: engine rejected roger beep #{id}");
                self.notify(SessionNotice::FeedbackFailed {
                    reason: "engine rejected the audio".into(),
                });
            }
            InjectionOutcome::Failed(reason) => {
                log::warn!("feedback: #{id} failed: {reason}");
                self.notify(SessionNotice::FeedbackFailed { reason });
            }
            InjectionOutcome::Aborted => log::debug!("feedback: #{id} aborted"),
        }
        let actions = self.transmit.on_injection_finished(id);
        self.apply_transmit(actions);
    }

    fn play_local_beep(&self) {
        let Some(tone) = &self.local_beep else {
            return;
        };
        match tone.render(BeepTarget::Local, ENGINE_SAMPLE_RATE) {
            Ok(pcm) => self.player.play(pcm, ENGINE_SAMPLE_RATE),
            Err(e) => log::warn!("session: local beep: {e}"),
        }
    }

    fn play_vox_pre_tone(&self) {
        let Some(vox) = &self.vox_pre_tone else {
            return;
        };
        let pcm = pure_tone(vox.frequency_hz, vox.duration_ms, vox.volume, ENGINE_SAMPLE_RATE);
        self.player.play(pcm, ENGINE_SAMPLE_RATE);
    }

    fn notify(&self, notice: SessionNotice) {
        log::debug!("session: {notice}");
        if let Err(TrySendError::Full(notice)) = self.notices.try_send(notice) {
            log::debug!("session: notice queue full, dropping '{notice}'");
        }
    }

    fn publish_status(&mut self) {
        let ptt_connected = self.hardware_ptt.is_connected();
        if self.ptt_was_connected && !ptt_connected {
            log::warn!("session: hardware PTT lost");
            self.notify(SessionNotice::HardwarePttLost);
        }
        self.ptt_was_connected = ptt_connected;

        let now = Instant::now();
        let remaining = self.transmit.voice_hold_remaining(now).as_millis();
        let mut status = lock_status(&self.status);
        status.connection = self.supervisor.state();
        status.reconnect = self.supervisor.reconnect();
        status.network_available = self.supervisor.network_available();
        status.server = self.supervisor.target().map(ServerTarget::label);
        status.voice_hold_remaining_ms = u32::try_from(remaining).unwrap_or(u32::MAX);
        status.injecting_feedback = self.transmit.is_injecting();
        status.local_talking = self.local_talking;
        status.transmission_mode = self.transmit.settings().mode;
        status.hardware_ptt_connected = ptt_connected;
        status.hardware_ptt_active = self.hardware_ptt.is_active();
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn load_identity(
    provider: Arc<dyn IdentityProvider>,
    username: String,
) -> Option<IdentityHandle> {
    match tokio::task::spawn_blocking(move || provider.load_or_generate(&username)).await {
        Ok(Ok(handle)) => Some(handle),
        Ok(Err(e)) => {
            log::warn!("session: no client identity: {e}");
            None
        }
        Err(e) => {
            log::warn!("session: identity task failed: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::RecordingPlayer;
    use crate::engine::{Channel, EngineCall, LoopbackEngine, MockEngine};
    use crate::hardware::ptt::tests::RecordingLine;
    use crate::hardware::{PttError, PttLine, PttTiming};
    use crate::session::ConnectionState;
    use crate::tone::BeepStyle;
    use crate::trust::{EphemeralIdentityProvider, MemoryTrustStore};
    use tokio::time::sleep;

    struct Harness {
        handle: SessionHandle,
        engine: Arc<MockEngine>,
        events: mpsc::UnboundedSender<EngineEvent>,
        notices: mpsc::Receiver<SessionNotice>,
        player: Arc<RecordingPlayer>,
        trust: Arc<MemoryTrustStore>,
    }

    impl Harness {
        fn start(settings: SessionSettings, engine: MockEngine, hardware_ptt: HardwarePtt) -> Self {
            let engine = Arc::new(engine);
            let player = Arc::new(RecordingPlayer::default());
            let trust = Arc::new(MemoryTrustStore::new());
            let (events, event_rx) = mpsc::unbounded_channel();
            let (session, handle, notices) = Session::new(
                settings,
                Collaborators {
                    engine: engine.clone(),
                    hardware_ptt,
                    player: player.clone(),
                    trust: trust.clone(),
                    identity: Arc::new(EphemeralIdentityProvider::new()),
                },
            );
            tokio::spawn(session.run(event_rx));
            Self {
                handle,
                engine,
                events,
                notices,
                player,
                trust,
            }
        }

        fn emit(&self, event: EngineEvent) {
            self.events.send(event).unwrap();
        }

        /// Connect and report the link up.  Returns when `Connected` was sent.
        async fn connect(&self, target: ServerTarget) -> Instant {
            self.handle.connect(target).await.unwrap();
            settle().await;
            let at = Instant::now();
            self.emit(EngineEvent::Connected);
            settle().await;
            at
        }

        fn drain_notices(&mut self) -> Vec<SessionNotice> {
            let mut notices = Vec::new();
            while let Ok(notice) = self.notices.try_recv() {
                notices.push(notice);
            }
            notices
        }

        fn verify_flags(&self) -> Vec<bool> {
            self.engine
                .calls()
                .into_iter()
                .filter_map(|(_, call)| match call {
                    EngineCall::Connect {
                        verify_certificates,
                    } => Some(verify_certificates),
                    _ => None,
                })
                .collect()
        }

        fn connects(&self) -> usize {
            self.engine.count(|c| matches!(c, EngineCall::Connect { .. }))
        }
    }

    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    fn target() -> ServerTarget {
        ServerTarget::new("radio.example.org", 64738, "N0CALL")
    }

    fn settings_with(mode: TransmissionMode) -> SessionSettings {
        let mut settings = SessionSettings::default();
        settings.transmit.mode = mode;
        settings
    }

    fn with_transmit_beep(mut settings: SessionSettings) -> SessionSettings {
        settings.transmit.transmit_beep = true;
        settings.transmit_beep = Some(FeedbackTone::new(BeepStyle::ShortChirp, 0.7));
        settings
    }

    fn with_local_beep(mut settings: SessionSettings) -> SessionSettings {
        settings.transmit.local_beep = true;
        settings.local_beep = Some(FeedbackTone::new(BeepStyle::ShortChirp, 0.7));
        settings
    }

    fn peer(peer: u32, talking: bool) -> EngineEvent {
        EngineEvent::PeerTalkStateChanged {
            peer,
            talking,
            same_channel: true,
        }
    }

    fn last_release(engine: &MockEngine) -> Option<Instant> {
        engine
            .calls()
            .into_iter()
            .rev()
            .find(|(_, c)| *c == EngineCall::SetTalking(false))
            .map(|(at, _)| at)
    }

    struct DeadLine;

    impl PttLine for DeadLine {
        fn set_line(&mut self, active: bool) -> Result<(), PttError> {
            if active {
                Err(PttError::Worker("permission denied".into()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn vad_hold_expiry_injects_then_releases() {
        let settings = with_transmit_beep(settings_with(TransmissionMode::VoiceActivity));
        let h = Harness::start(settings, MockEngine::new(), HardwarePtt::disabled());
        h.connect(target()).await;

        let t0 = Instant::now();
        h.emit(EngineEvent::SelfTalkStateChanged { talking: true });
        h.emit(EngineEvent::SelfTalkStateChanged { talking: false });

        sleep(Duration::from_millis(100)).await;
        let remaining = h.handle.status().voice_hold_remaining_ms;
        assert!((350..=450).contains(&remaining), "remaining {remaining}");

        sleep_until(t0 + Duration::from_millis(600)).await;
        assert!(h.handle.status().injecting_feedback);

        sleep_until(t0 + Duration::from_secs(2)).await;
        let asserted = h.engine.first(|c| *c == EngineCall::SetTalking(true)).unwrap();
        let offset = asserted - t0;
        assert!(
            offset >= Duration::from_millis(500) && offset <= Duration::from_millis(550),
            "injection began at {offset:?}"
        );
        let released = last_release(&h.engine).unwrap();
        assert!(released - asserted <= Duration::from_millis(50 + 80 + 100));
        assert_eq!(h.engine.talking_history(), vec![true, false]);
        assert_eq!(h.engine.count(|c| matches!(c, EngineCall::Inject(_))), 1);

        let status = h.handle.status();
        assert!(!status.injecting_feedback);
        assert_eq!(status.voice_hold_remaining_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn vad_resume_before_hold_cancels_beep() {
        let settings = with_transmit_beep(settings_with(TransmissionMode::VoiceActivity));
        let h = Harness::start(settings, MockEngine::new(), HardwarePtt::disabled());
        h.connect(target()).await;

        h.emit(EngineEvent::SelfTalkStateChanged { talking: true });
        h.emit(EngineEvent::SelfTalkStateChanged { talking: false });
        sleep(Duration::from_millis(300)).await;
        h.emit(EngineEvent::SelfTalkStateChanged { talking: true });
        sleep(Duration::from_secs(2)).await;

        assert_eq!(h.engine.count(|c| matches!(c, EngineCall::Inject(_))), 0);
        assert!(h.engine.talking_history().is_empty());
        assert_eq!(h.handle.status().voice_hold_remaining_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ptt_release_beeps_without_reasserting() {
        let settings = with_transmit_beep(settings_with(TransmissionMode::PushToTalk));
        let h = Harness::start(settings, MockEngine::new(), HardwarePtt::disabled());
        h.connect(target()).await;

        h.handle.ptt_pressed().await.unwrap();
        sleep(Duration::from_millis(500)).await;
        h.handle.ptt_released().await.unwrap();
        sleep(Duration::from_secs(1)).await;

        // on_connected forces talk off, then press and the injection's release.
        assert_eq!(h.engine.talking_history(), vec![false, true, false]);
        assert_eq!(h.engine.count(|c| matches!(c, EngineCall::Inject(_))), 1);
        assert!(!h.handle.status().injecting_feedback);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_injection_still_releases_talk() {
        let settings = with_transmit_beep(settings_with(TransmissionMode::PushToTalk));
        let mut h = Harness::start(settings, MockEngine::rejecting_audio(), HardwarePtt::disabled());
        h.connect(target()).await;

        h.handle.ptt_pressed().await.unwrap();
        h.handle.ptt_released().await.unwrap();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(h.engine.talking_history().last(), Some(&false));
        assert!(!h.handle.status().injecting_feedback);
        assert!(h
            .drain_notices()
            .iter()
            .any(|n| matches!(n, SessionNotice::FeedbackFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn two_peers_get_two_local_beeps() {
        let settings = with_local_beep(SessionSettings::default());
        let h = Harness::start(settings, MockEngine::new(), HardwarePtt::disabled());
        h.connect(target()).await;

        let t0 = Instant::now();
        h.emit(peer(1, true));
        h.emit(peer(2, true));
        h.emit(peer(1, false));
        sleep_until(t0 + Duration::from_millis(200)).await;
        h.emit(peer(2, false));
        sleep_until(t0 + Duration::from_secs(2)).await;

        let offsets: Vec<u128> = h
            .player
            .plays()
            .iter()
            .map(|(at, _)| (*at - t0).as_millis())
            .collect();
        assert_eq!(offsets.len(), 2, "{offsets:?}");
        assert!((500..=600).contains(&offsets[0]), "{offsets:?}");
        assert!((700..=800).contains(&offsets[1]), "{offsets:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn peer_resume_cancels_local_beep() {
        let settings = with_local_beep(SessionSettings::default());
        let h = Harness::start(settings, MockEngine::new(), HardwarePtt::disabled());
        h.connect(target()).await;

        h.emit(peer(1, false));
        sleep(Duration::from_millis(300)).await;
        h.emit(peer(1, true));
        sleep(Duration::from_secs(2)).await;
        assert!(h.player.plays().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hardware_ptt_follows_peer_talk() {
        let line = RecordingLine::default();
        let timing = PttTiming {
            pre_delay: Duration::from_millis(50),
            post_delay: Duration::from_millis(100),
        };
        let ptt = HardwarePtt::connect(Box::new(line.clone()), timing).await.unwrap();
        let h = Harness::start(SessionSettings::default(), MockEngine::new(), ptt);
        h.connect(target()).await;

        let t0 = Instant::now();
        h.emit(peer(5, true));
        sleep(Duration::from_millis(100)).await;
        assert_eq!(line.states(), vec![false, true]);
        assert_eq!(line.times()[1] - t0, Duration::from_millis(50));

        h.emit(peer(5, false));
        sleep(Duration::from_millis(300)).await;
        assert_eq!(line.states(), vec![false, true, false]);
        assert!(h.handle.status().hardware_ptt_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn hardware_ptt_failure_is_reported_once() {
        let ptt = HardwarePtt::connect(Box::new(DeadLine), PttTiming::default()).await.unwrap();
        let mut h = Harness::start(SessionSettings::default(), MockEngine::new(), ptt);
        h.connect(target()).await;

        h.emit(peer(5, true));
        sleep(Duration::from_millis(200)).await;
        h.emit(peer(5, false));
        h.emit(peer(5, true));
        settle().await;

        let lost = h
            .drain_notices()
            .into_iter()
            .filter(|n| *n == SessionNotice::HardwarePttLost)
            .count();
        assert_eq!(lost, 1);
        assert!(!h.handle.status().hardware_ptt_connected);
        assert_eq!(h.handle.status().connection, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn user_disconnect_halts_reconnect_loop() {
        let mut h = Harness::start(SessionSettings::default(), MockEngine::new(), HardwarePtt::disabled());
        h.connect(target()).await;

        h.emit(EngineEvent::Disconnected {
            cause: Some("connection reset by peer".into()),
        });
        settle().await;
        assert_eq!(h.connects(), 2);
        assert!(h.handle.status().reconnect.is_reconnecting);

        h.handle.disconnect(true).await.unwrap();
        settle().await;
        let status = h.handle.status();
        assert!(!status.reconnect.is_reconnecting);
        assert_eq!(status.reconnect.attempt, 0);
        assert_eq!(status.connection, ConnectionState::Disconnected);

        sleep(Duration::from_secs(300)).await;
        assert_eq!(h.connects(), 2);
        assert!(h.drain_notices().contains(&SessionNotice::ReconnectStopped));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_while_connecting_stays_disconnected() {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let engine = Arc::new(LoopbackEngine::new(event_tx));
        let (session, handle, _notices) = Session::new(
            SessionSettings::default(),
            Collaborators {
                engine: engine.clone(),
                hardware_ptt: HardwarePtt::disabled(),
                player: Arc::new(RecordingPlayer::default()),
                trust: Arc::new(MemoryTrustStore::new()),
                identity: Arc::new(EphemeralIdentityProvider::new()),
            },
        );
        tokio::spawn(session.run(event_rx));

        handle.connect(target()).await.unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.status().connection, ConnectionState::Connecting);

        handle.disconnect(true).await.unwrap();
        sleep(Duration::from_secs(1)).await;

        let status = handle.status();
        assert_eq!(status.connection, ConnectionState::Disconnected);
        assert!(status.server.is_none());
        assert!(status.current_channel.is_none());
        assert!(engine.channel_tree().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn engine_connecting_after_user_disconnect_is_torn_down() {
        let h = Harness::start(
            settings_with(TransmissionMode::Continuous),
            MockEngine::new(),
            HardwarePtt::disabled(),
        );
        h.handle.connect(target()).await.unwrap();
        settle().await;
        h.handle.disconnect(true).await.unwrap();
        settle().await;
        let disconnects = h.engine.count(|c| *c == EngineCall::Disconnect);

        h.emit(EngineEvent::Connected);
        h.emit(EngineEvent::Authenticated);
        sleep(Duration::from_secs(1)).await;

        assert_eq!(h.handle.status().connection, ConnectionState::Disconnected);
        assert!(h.engine.count(|c| *c == EngineCall::Disconnect) > disconnects);
        assert!(h.engine.talking_history().is_empty());
        assert_eq!(h.engine.count(|c| matches!(c, EngineCall::SetTransmitMode(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_injection_releases_talk() {
        let settings = with_transmit_beep(settings_with(TransmissionMode::PushToTalk));
        let h = Harness::start(settings, MockEngine::new(), HardwarePtt::disabled());
        h.connect(target()).await;

        h.handle.ptt_pressed().await.unwrap();
        settle().await;
        h.handle.ptt_released().await.unwrap();
        // Inside the trailing flush of the roger beep.
        sleep(Duration::from_millis(20)).await;
        assert!(h.handle.status().injecting_feedback);

        h.handle.disconnect(true).await.unwrap();
        settle().await;
        let status = h.handle.status();
        assert!(!status.injecting_feedback);
        assert_eq!(status.connection, ConnectionState::Disconnected);

        // The aborted task never touches talk state again.
        sleep(Duration::from_secs(1)).await;
        assert_eq!(h.engine.talking_history(), vec![false, true, false]);
        assert_eq!(h.engine.count(|c| matches!(c, EngineCall::Inject(_))), 1);

        // A press while offline is not forwarded.
        h.handle.ptt_pressed().await.unwrap();
        settle().await;
        assert_eq!(h.engine.talking_history().last(), Some(&false));
    }

    #[tokio::test(start_paused = true)]
    async fn certificate_fallback_happens_once() {
        let h = Harness::start(SessionSettings::default(), MockEngine::new(), HardwarePtt::disabled());
        h.handle.connect(target()).await.unwrap();
        settle().await;

        h.emit(EngineEvent::CertificateRejected {
            chain: vec![vec![0xde, 0xad, 0xbe, 0xef]],
        });
        h.emit(EngineEvent::Disconnected {
            cause: Some("TLS handshake failed".into()),
        });
        sleep(Duration::from_millis(1100)).await;
        assert_eq!(h.verify_flags(), vec![true, false]);
        assert!(h.trust.is_trusted("radio.example.org:64738"));

        h.emit(EngineEvent::CertificateRejected {
            chain: vec![vec![0xde, 0xad, 0xbe, 0xef]],
        });
        h.emit(EngineEvent::Disconnected {
            cause: Some("SSL handshake failed".into()),
        });
        sleep(Duration::from_millis(100)).await;

        // The regular loop took over: one more attempt, no second fallback.
        assert_eq!(h.verify_flags(), vec![true, false, false]);
        let reconnect = h.handle.status().reconnect;
        assert!(reconnect.tried_without_certificate);
        assert!(reconnect.is_reconnecting);
        assert_eq!(reconnect.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let mut settings = SessionSettings::default();
        settings.supervisor.policy.max_attempts = 3;
        let engine = MockEngine::new();
        engine.fail_connects("connection refused");
        let mut h = Harness::start(settings, engine, HardwarePtt::disabled());

        h.handle.connect(target()).await.unwrap();
        sleep(Duration::from_secs(200)).await;

        assert_eq!(h.connects(), 4);
        let status = h.handle.status();
        assert_eq!(status.connection, ConnectionState::Error);
        assert!(!status.reconnect.is_reconnecting);
        assert!(status.server.is_none());
        assert!(h
            .drain_notices()
            .contains(&SessionNotice::ReconnectGaveUp { attempts: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn network_restore_retries_immediately() {
        let engine = MockEngine::new();
        engine.fail_connects("network unreachable");
        let h = Harness::start(SessionSettings::default(), engine, HardwarePtt::disabled());

        h.handle.set_network_available(false).await.unwrap();
        h.handle.connect(target()).await.unwrap();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.connects(), 1);
        assert_eq!(h.handle.status().reconnect.attempt, 1);

        h.handle.set_network_available(true).await.unwrap();
        settle().await;
        assert_eq!(h.connects(), 2);
        assert_eq!(h.handle.status().reconnect.attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_join_after_settle_delay() {
        let tree = Channel::new(0, "Root").with_child(
            Channel::new(1, "Lobby").with_child(Channel::new(7, "Net")),
        );
        let h = Harness::start(
            SessionSettings::default(),
            MockEngine::new().with_tree(tree),
            HardwarePtt::disabled(),
        );
        let mut t = target();
        t.auto_join_channel = Some("lobby/net".into());
        let connected_at = h.connect(t).await;

        sleep(Duration::from_secs(2)).await;
        let joined = h.engine.first(|c| *c == EngineCall::JoinChannel(7)).unwrap();
        assert_eq!(joined - connected_at, Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn roster_and_permission_pass_through() {
        let mut h = Harness::start(SessionSettings::default(), MockEngine::new(), HardwarePtt::disabled());
        h.connect(target()).await;

        h.emit(EngineEvent::RosterChanged {
            root: Channel::new(0, "Root"),
        });
        h.emit(EngineEvent::ChannelChanged { channel: 3 });
        h.emit(EngineEvent::PermissionDenied {
            reason: "Not allowed to register".into(),
        });
        settle().await;

        let status = h.handle.status();
        assert_eq!(status.roster.map(|r| r.name), Some("Root".to_string()));
        assert_eq!(status.current_channel, Some(3));
        assert_eq!(status.server.as_deref(), Some("radio.example.org:64738"));
        assert!(h.drain_notices().contains(&SessionNotice::PermissionDenied {
            reason: "Not allowed to register".into(),
            registration: true,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handles_stops_session() {
        let h = Harness::start(SessionSettings::default(), MockEngine::new(), HardwarePtt::disabled());
        h.connect(target()).await;
        let Harness { handle, engine, .. } = h;
        drop(handle);
        settle().await;
        assert_eq!(engine.count(|c| *c == EngineCall::Disconnect), 1);
    }
}
