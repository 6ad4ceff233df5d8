//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`.
//! Every struct is `#[serde(default)]`, so a hand-edited file only needs the
//! keys it changes.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::engine::{ServerTarget, TransmissionMode};
use crate::tone::{BeepStyle, ENGINE_SAMPLE_RATE};

// ---------------------------------------------------------------------------
// TransmissionConfig
// ---------------------------------------------------------------------------

/// How and when the local party transmits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransmissionConfig {
    pub mode: TransmissionMode,
    /// Voice detector threshold (0.0 – 1.0), VoiceActivity mode only.
    pub detection_threshold: f32,
    /// Grace period after speech stops before the transmission is
    /// considered over.
    pub voice_hold_ms: u32,
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            mode: TransmissionMode::PushToTalk,
            detection_threshold: 0.5,
            voice_hold_ms: 500,
        }
    }
}

// ---------------------------------------------------------------------------
// RogerBeepConfig
// ---------------------------------------------------------------------------

/// A clip file: WAV, or headerless 16-bit little-endian mono when the
/// extension is `.raw` or `.pcm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomClipConfig {
    pub path: PathBuf,
    /// Rate of headerless clips; WAV files carry their own.
    pub sample_rate: u32,
}

/// One roger beep feature.  Used twice: the local beep (speaker only, after
/// a peer finishes) and the transmitted beep (sent to peers when we finish).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RogerBeepConfig {
    pub enabled: bool,
    pub style: BeepStyle,
    /// 0.0 – 1.0, applied after normalization.
    pub volume: f32,
    /// Required when `style` is `Custom`.
    pub custom_clip: Option<CustomClipConfig>,
}

impl Default for RogerBeepConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            style: BeepStyle::Classic8Tone,
            volume: 0.7,
            custom_clip: None,
        }
    }
}

// ---------------------------------------------------------------------------
// VoxPreToneConfig
// ---------------------------------------------------------------------------

/// A short, normally inaudible tone played locally when PTT is pressed, to
/// open a radio's VOX circuit before speech arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxPreToneConfig {
    pub enabled: bool,
    pub frequency_hz: f32,
    pub duration_ms: u32,
    pub volume: f32,
}

impl Default for VoxPreToneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frequency_hz: 20_000.0,
            duration_ms: 100,
            volume: 0.3,
        }
    }
}

// ---------------------------------------------------------------------------
// HardwarePttConfig
// ---------------------------------------------------------------------------

/// External transmitter keying, driven by remote talk activity.
///
/// The line is keyed by running shell-style commands, e.g.
/// `rigctl -m 2 T 1` / `rigctl -m 2 T 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwarePttConfig {
    pub enabled: bool,
    pub activate_command: String,
    pub deactivate_command: String,
    /// Wait before asserting the line (slow VOX / relay).
    pub pre_delay_ms: u64,
    /// Wait after releasing the line.
    pub post_delay_ms: u64,
}

impl Default for HardwarePttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            activate_command: "rigctl -m 2 T 1".into(),
            deactivate_command: "rigctl -m 2 T 0".into(),
            pre_delay_ms: 50,
            post_delay_ms: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

/// Auto-reconnect budget.  The defaults give about an hour of retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub interval_secs: u64,
    /// Delay before the single no-verification retry after a certificate
    /// failure.
    pub certificate_fallback_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 120,
            interval_secs: 30,
            certificate_fallback_delay_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// TimingConfig
// ---------------------------------------------------------------------------

/// Settle delays and tick rates.  These compensate for asynchronous state
/// propagation inside the voice engine; retune them for a different engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Voice-hold countdown resolution.
    pub voice_hold_tick_ms: u64,
    /// Peer hold sweep interval.
    pub peer_sweep_ms: u64,
    /// Wait between asserting talk state and injecting audio.
    pub talk_settle_ms: u64,
    /// Wait after injection before releasing talk state.
    pub injection_trailing_ms: u64,
    /// Wait after releasing talk state before talk events are observed again.
    pub guard_release_ms: u64,
    pub auto_join_delay_ms: u64,
    pub register_delay_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            voice_hold_tick_ms: 50,
            peer_sweep_ms: 100,
            talk_settle_ms: 50,
            injection_trailing_ms: 100,
            guard_release_ms: 100,
            auto_join_delay_ms: 1_500,
            register_delay_ms: 2_000,
        }
    }
}

// ---------------------------------------------------------------------------
// HotkeyConfig
// ---------------------------------------------------------------------------

/// Global hotkey bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Push-to-talk key name (e.g. `"F9"`).
    pub push_to_talk_key: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            push_to_talk_key: "F9".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use ham_voice::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let mut config = AppConfig::load().unwrap();
/// config.local_beep.enabled = true;
/// config.save().unwrap();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub transmission: TransmissionConfig,
    /// Beep played through the speaker when a peer's hold expires.
    pub local_beep: RogerBeepConfig,
    /// Beep injected into our own transmission when we finish talking.
    pub transmit_beep: RogerBeepConfig,
    pub vox_pre_tone: VoxPreToneConfig,
    pub hardware_ptt: HardwarePttConfig,
    pub reconnect: ReconnectConfig,
    pub timing: TimingConfig,
    pub hotkey: HotkeyConfig,
    /// Saved servers; the first with `auto_connect` is joined at startup.
    pub servers: Vec<ServerTarget>,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The first server marked `auto_connect`.
    pub fn auto_connect_server(&self) -> Option<&ServerTarget> {
        self.servers.iter().find(|s| s.auto_connect)
    }
}

impl CustomClipConfig {
    /// A clip recorded at the engine rate.
    pub fn at_engine_rate(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sample_rate: ENGINE_SAMPLE_RATE,
        }
    }

    /// Relative paths are looked up in the `clips/` folder.
    pub fn resolved_path(&self) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            AppPaths::new().clips_dir.join(&self.path)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.transmission.mode, TransmissionMode::PushToTalk);
        assert_eq!(cfg.transmission.voice_hold_ms, 500);
        assert_eq!(cfg.transmission.detection_threshold, 0.5);
        assert!(!cfg.local_beep.enabled);
        assert!(!cfg.transmit_beep.enabled);
        assert_eq!(cfg.transmit_beep.style, BeepStyle::Classic8Tone);
        assert_eq!(cfg.transmit_beep.volume, 0.7);
        assert_eq!(cfg.vox_pre_tone.frequency_hz, 20_000.0);
        assert_eq!(cfg.hardware_ptt.pre_delay_ms, 50);
        assert_eq!(cfg.hardware_ptt.post_delay_ms, 100);
        assert_eq!(cfg.reconnect.max_attempts, 120);
        assert_eq!(cfg.reconnect.interval_secs, 30);
        assert_eq!(cfg.timing.voice_hold_tick_ms, 50);
        assert_eq!(cfg.timing.peer_sweep_ms, 100);
        assert_eq!(cfg.hotkey.push_to_talk_key, "F9");
        assert!(cfg.servers.is_empty());
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config.reconnect.max_attempts, 120);
        assert_eq!(config.hotkey.push_to_talk_key, "F9");
    }

    #[test]
    fn round_trip_modified_values() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let mut cfg = AppConfig::default();
        cfg.transmission.mode = TransmissionMode::VoiceActivity;
        cfg.transmission.voice_hold_ms = 750;
        cfg.transmit_beep.enabled = true;
        cfg.transmit_beep.style = BeepStyle::Morse('K');
        cfg.local_beep.style = BeepStyle::Custom;
        cfg.local_beep.custom_clip = Some(CustomClipConfig::at_engine_rate("/tmp/beep.raw"));
        cfg.hardware_ptt.enabled = true;
        cfg.reconnect.max_attempts = 10;
        let mut server = ServerTarget::new("radio.example.org", 64738, "N0CALL");
        server.auto_join_channel = Some("Root/Nets/2m".into());
        server.auto_connect = true;
        cfg.servers.push(server.clone());

        cfg.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(loaded.transmission.mode, TransmissionMode::VoiceActivity);
        assert_eq!(loaded.transmission.voice_hold_ms, 750);
        assert!(loaded.transmit_beep.enabled);
        assert_eq!(loaded.transmit_beep.style, BeepStyle::Morse('K'));
        assert_eq!(loaded.local_beep.style, BeepStyle::Custom);
        assert_eq!(
            loaded.local_beep.custom_clip,
            Some(CustomClipConfig::at_engine_rate("/tmp/beep.raw"))
        );
        assert!(loaded.hardware_ptt.enabled);
        assert_eq!(loaded.reconnect.max_attempts, 10);
        assert_eq!(loaded.auto_connect_server(), Some(&server));
    }

    #[test]
    fn relative_clip_paths_resolve_into_clips_dir() {
        let absolute = CustomClipConfig::at_engine_rate("/tmp/beep.raw");
        assert_eq!(absolute.resolved_path(), PathBuf::from("/tmp/beep.raw"));

        let relative = CustomClipConfig::at_engine_rate("k.raw");
        assert_eq!(
            relative.resolved_path(),
            AppPaths::new().clips_dir.join("k.raw")
        );
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "[transmission]\nmode = \"Continuous\"\n\n[[servers]]\naddress = \"10.0.0.5\"\nusername = \"W1AW\"\n",
        )
        .unwrap();

        let loaded = AppConfig::load_from(&path).expect("load");
        assert_eq!(loaded.transmission.mode, TransmissionMode::Continuous);
        assert_eq!(loaded.transmission.voice_hold_ms, 500);
        assert_eq!(loaded.servers.len(), 1);
        assert_eq!(loaded.servers[0].port, 64738);
        assert!(loaded.auto_connect_server().is_none());
    }
}
