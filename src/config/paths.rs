//! Cross-platform application paths using the `dirs` crate.
//!
//! Config dir (settings + custom beep clips):
//!   Windows: %APPDATA%\ham-voice\
//!   macOS:   ~/Library/Application Support/ham-voice/
//!   Linux:   ~/.config/ham-voice/

use std::path::PathBuf;

/// Holds all resolved application directory/file paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for `settings.toml` and the `clips/` folder.
    pub config_dir: PathBuf,
    /// Full path to `settings.toml`.
    pub settings_file: PathBuf,
    /// Default home for custom roger beep clips.
    pub clips_dir: PathBuf,
}

impl AppPaths {
    const APP_NAME: &'static str = "ham-voice";

    /// Resolves all paths, falling back to the current directory when the
    /// platform has no config dir.
    pub fn new() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(Self::APP_NAME);

        Self {
            settings_file: config_dir.join("settings.toml"),
            clips_dir: config_dir.join("clips"),
            config_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_the_config_dir() {
        let paths = AppPaths::new();
        assert!(paths.config_dir.ends_with("ham-voice"));
        assert!(paths
            .settings_file
            .file_name()
            .is_some_and(|n| n == "settings.toml"));
        assert!(paths.clips_dir.starts_with(&paths.config_dir));
    }
}
