//! Recording test double for [`VoiceEngine`].

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{Channel, ChannelId, ConnectRequest, EngineError, TransmissionMode, VoiceEngine};

/// One command received by [`MockEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Connect { verify_certificates: bool },
    Disconnect,
    SetTalking(bool),
    Inject(usize),
    JoinChannel(ChannelId),
    SetTransmitMode(TransmissionMode),
    SetDetectionThreshold(f32),
    SetVoiceHold(u32),
    Register,
}

/// Records every command with a timestamp.  Events are driven by the test.
pub struct MockEngine {
    calls: Mutex<Vec<(Instant, EngineCall)>>,
    connect_error: Mutex<Option<String>>,
    inject_accepts: bool,
    tree: Option<Channel>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            connect_error: Mutex::new(None),
            inject_accepts: true,
            tree: None,
        }
    }

    /// An engine whose `inject_raw_audio` always returns `false`.
    pub fn rejecting_audio() -> Self {
        Self {
            inject_accepts: false,
            ..Self::new()
        }
    }

    pub fn with_tree(mut self, tree: Channel) -> Self {
        self.tree = Some(tree);
        self
    }

    /// Make subsequent `connect` calls fail with `message`.
    pub fn fail_connects(&self, message: &str) {
        *self.connect_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<(Instant, EngineCall)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&EngineCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|(_, c)| predicate(c)).count()
    }

    /// Time of the first call matching `predicate`.
    pub fn first(&self, predicate: impl Fn(&EngineCall) -> bool) -> Option<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|(_, c)| predicate(c))
            .map(|(at, _)| *at)
    }

    /// Only the `SetTalking` values, in order.
    pub fn talking_history(&self) -> Vec<bool> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, c)| match c {
                EngineCall::SetTalking(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().unwrap().push((Instant::now(), call));
    }
}

#[async_trait]
impl VoiceEngine for MockEngine {
    async fn connect(&self, request: ConnectRequest) -> Result<(), EngineError> {
        self.record(EngineCall::Connect {
            verify_certificates: request.verify_certificates,
        });
        match self.connect_error.lock().unwrap().clone() {
            Some(message) => Err(EngineError::Connect(message)),
            None => Ok(()),
        }
    }

    fn disconnect(&self) {
        self.record(EngineCall::Disconnect);
    }

    fn set_talking(&self, talking: bool) {
        self.record(EngineCall::SetTalking(talking));
    }

    fn inject_raw_audio(&self, pcm: &[i16]) -> bool {
        self.record(EngineCall::Inject(pcm.len()));
        self.inject_accepts
    }

    fn join_channel(&self, channel: ChannelId) -> Result<(), EngineError> {
        self.record(EngineCall::JoinChannel(channel));
        Ok(())
    }

    fn set_transmit_mode(&self, mode: TransmissionMode) {
        self.record(EngineCall::SetTransmitMode(mode));
    }

    fn set_detection_threshold(&self, threshold: f32) {
        self.record(EngineCall::SetDetectionThreshold(threshold));
    }

    fn set_voice_hold(&self, hold_ms: u32) {
        self.record(EngineCall::SetVoiceHold(hold_ms));
    }

    fn register_self(&self) -> Result<(), EngineError> {
        self.record(EngineCall::Register);
        Ok(())
    }

    fn channel_tree(&self) -> Option<Channel> {
        self.tree.clone()
    }
}
