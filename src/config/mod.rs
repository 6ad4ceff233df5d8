//! Configuration module.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for transmission,
//! feedback tones, hardware PTT, reconnection and timing, `AppPaths` for the
//! platform config directory, and TOML persistence via `AppConfig::load` /
//! `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{
    AppConfig, CustomClipConfig, HardwarePttConfig, HotkeyConfig, ReconnectConfig,
    RogerBeepConfig, TimingConfig, TransmissionConfig, VoxPreToneConfig,
};
