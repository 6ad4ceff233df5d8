//! A local rehearsal engine.
//!
//! [`LoopbackEngine`] accepts every connection, publishes a small channel
//! tree, echoes talk-state changes back as [`EngineEvent::SelfTalkStateChanged`]
//! and paces injected audio in real time.  It lets the PTT key, hardware
//! keying and roger beeps be exercised without a server.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    Channel, ChannelId, ConnectRequest, EngineError, EngineEvent, RosterUser, TransmissionMode,
    VoiceEngine,
};
use crate::tone::ENGINE_SAMPLE_RATE;

/// 10 ms of audio at the engine rate.
const FRAME_SAMPLES: usize = (ENGINE_SAMPLE_RATE / 100) as usize;

#[derive(Debug, Default)]
struct LoopbackState {
    connected: bool,
    talking: bool,
    channel: ChannelId,
    username: String,
    mode: TransmissionMode,
}

pub struct LoopbackEngine {
    events: mpsc::UnboundedSender<EngineEvent>,
    state: Mutex<LoopbackState>,
}

impl LoopbackEngine {
    pub fn new(events: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self {
            events,
            state: Mutex::new(LoopbackState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: EngineEvent) {
        if self.events.send(event).is_err() {
            log::debug!("loopback: event receiver dropped");
        }
    }

    fn tree(&self, username: &str, talking: bool) -> Channel {
        let mut lobby = Channel::new(1, "Lobby");
        lobby.users.push(RosterUser {
            session: 1,
            name: username.to_string(),
            talking,
        });
        Channel::new(0, "Root")
            .with_child(lobby)
            .with_child(Channel::new(2, "Nets").with_child(Channel::new(3, "2m")))
    }
}

#[async_trait]
impl VoiceEngine for LoopbackEngine {
    async fn connect(&self, request: ConnectRequest) -> Result<(), EngineError> {
        if request.target.address.trim().is_empty() {
            return Err(EngineError::Connect("server address is empty".into()));
        }
        self.emit(EngineEvent::Connecting);
        log::info!(
            "loopback: connecting to {} as {} (verify certificates: {})",
            request.target.label(),
            request.target.username,
            request.verify_certificates
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let root = {
            let mut state = self.state();
            state.connected = true;
            state.channel = 1;
            state.username = request.target.username.clone();
            state.mode = request.transmit_mode;
            self.tree(&state.username, state.talking)
        };
        self.emit(EngineEvent::Connected);
        self.emit(EngineEvent::RosterChanged { root });
        self.emit(EngineEvent::ChannelChanged { channel: 1 });
        self.emit(EngineEvent::Authenticated);
        Ok(())
    }

    fn disconnect(&self) {
        let was_connected = std::mem::take(&mut self.state().connected);
        if was_connected {
            self.emit(EngineEvent::Disconnected { cause: None });
        }
    }

    fn set_talking(&self, talking: bool) {
        let changed = {
            let mut state = self.state();
            let changed = state.connected && state.talking != talking;
            state.talking = talking;
            changed
        };
        if changed {
            self.emit(EngineEvent::SelfTalkStateChanged { talking });
        }
    }

    fn inject_raw_audio(&self, pcm: &[i16]) -> bool {
        if !self.state().connected {
            return false;
        }
        for _frame in pcm.chunks(FRAME_SAMPLES) {
            std::thread::sleep(Duration::from_millis(10));
        }
        log::debug!("loopback: injected {} samples", pcm.len());
        true
    }

    fn join_channel(&self, channel: ChannelId) -> Result<(), EngineError> {
        let mut state = self.state();
        if !state.connected {
            return Err(EngineError::NotConnected);
        }
        if self.tree(&state.username, false).find_by_id(channel).is_none() {
            return Err(EngineError::UnknownChannel(channel));
        }
        state.channel = channel;
        drop(state);
        self.emit(EngineEvent::ChannelChanged { channel });
        Ok(())
    }

    fn set_transmit_mode(&self, mode: TransmissionMode) {
        self.state().mode = mode;
        log::debug!("loopback: transmit mode = {}", mode.label());
    }

    fn set_detection_threshold(&self, threshold: f32) {
        log::debug!("loopback: detection threshold = {threshold:.2}");
    }

    fn set_voice_hold(&self, hold_ms: u32) {
        log::debug!("loopback: voice hold = {hold_ms} ms");
    }

    fn register_self(&self) -> Result<(), EngineError> {
        let state = self.state();
        if !state.connected {
            return Err(EngineError::NotConnected);
        }
        log::info!("loopback: registered {}", state.username);
        Ok(())
    }

    fn channel_tree(&self) -> Option<Channel> {
        let state = self.state();
        state
            .connected
            .then(|| self.tree(&state.username, state.talking))
    }
}
