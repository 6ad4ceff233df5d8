//! PTT keying through external commands (hamlib `rigctl`, GPIO helpers …).

use std::process::Command;

use super::{PttError, PttLine};
use crate::config::HardwarePttConfig;

/// Runs one command to key the transmitter and another to unkey it.
#[derive(Debug, Clone)]
pub struct CommandPttLine {
    activate: Vec<String>,
    deactivate: Vec<String>,
}

impl CommandPttLine {
    /// Parse both command lines with shell quoting rules.
    ///
    /// ```
    /// use ham_voice::hardware::CommandPttLine;
    ///
    /// let line = CommandPttLine::new("rigctl -m 2 T 1", "rigctl -m 2 'T' 0").unwrap();
    /// assert!(CommandPttLine::new("", "true").is_err());
    /// ```
    pub fn new(activate: &str, deactivate: &str) -> Result<Self, PttError> {
        Ok(Self {
            activate: split_command(activate)?,
            deactivate: split_command(deactivate)?,
        })
    }

    pub fn from_config(config: &HardwarePttConfig) -> Result<Self, PttError> {
        Self::new(&config.activate_command, &config.deactivate_command)
    }
}

fn split_command(raw: &str) -> Result<Vec<String>, PttError> {
    let parts =
        shell_words::split(raw.trim()).map_err(|e| PttError::InvalidCommand(e.to_string()))?;
    if parts.is_empty() {
        return Err(PttError::EmptyCommand);
    }
    Ok(parts)
}

impl PttLine for CommandPttLine {
    fn set_line(&mut self, active: bool) -> Result<(), PttError> {
        let argv = if active { &self.activate } else { &self.deactivate };
        let command = argv.join(" ");
        let status = Command::new(&argv[0])
            .args(&argv[1..])
            .status()
            .map_err(|source| PttError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !status.success() {
            return Err(PttError::Status { command, status });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("command `{}`", self.activate.join(" "))
    }
}
