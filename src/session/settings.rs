//! Runtime settings for a session, derived from the persisted [`AppConfig`].

use std::time::Duration;

use crate::config::{AppConfig, VoxPreToneConfig};
use crate::tone::FeedbackTone;

use super::feedback::InjectionTiming;
use super::supervisor::SupervisorSettings;
use super::transmit::TransmitSettings;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub transmit: TransmitSettings,
    pub supervisor: SupervisorSettings,
    pub injection: InjectionTiming,
    pub peer_sweep: Duration,
    /// Injected to peers when we stop talking.  `None` when disabled.
    pub transmit_beep: Option<FeedbackTone>,
    /// Played on our speaker when a peer stops talking.  `None` when disabled.
    pub local_beep: Option<FeedbackTone>,
    pub vox_pre_tone: Option<VoxPreToneConfig>,
}

impl SessionSettings {
    /// Build from settings.  Loads custom beep clips, which touches disk.
    pub fn from_config(config: &AppConfig) -> Self {
        let transmit_beep = config
            .transmit_beep
            .enabled
            .then(|| FeedbackTone::from_config(&config.transmit_beep));
        let local_beep = config
            .local_beep
            .enabled
            .then(|| FeedbackTone::from_config(&config.local_beep));
        let vox_pre_tone = config
            .vox_pre_tone
            .enabled
            .then(|| config.vox_pre_tone.clone());

        let transmit = TransmitSettings {
            mode: config.transmission.mode,
            voice_hold: Duration::from_millis(u64::from(config.transmission.voice_hold_ms)),
            detection_threshold: config.transmission.detection_threshold,
            tick: Duration::from_millis(config.timing.voice_hold_tick_ms),
            transmit_beep: transmit_beep.is_some(),
            local_beep: local_beep.is_some(),
            vox_pre_tone: vox_pre_tone.is_some(),
        };

        Self {
            transmit,
            supervisor: SupervisorSettings::from_config(&config.reconnect, &config.timing),
            injection: InjectionTiming::from_config(&config.timing),
            peer_sweep: Duration::from_millis(config.timing.peer_sweep_ms),
            transmit_beep,
            local_beep,
            vox_pre_tone,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}
