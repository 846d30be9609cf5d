//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use cm_protocol::{TerminalSize, MAX_FRAME_SIZE};

use crate::error::ConfigError;

/// Configuration for the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Controller address to connect to (`host:port`)
    pub controller_address: String,

    /// Execution history this agent reports for
    pub history_id: Option<u64>,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Interactive process settings
    pub terminal: TerminalConfig,

    /// Per-connection buffering limits
    pub limits: LimitsConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            controller_address: "localhost:5050".to_string(),
            history_id: None,
            connect_timeout_secs: 30,
            terminal: TerminalConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Connection timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// History id, required before a connection can greet the controller
    pub fn require_history_id(&self) -> Result<u64, ConfigError> {
        self.history_id
            .ok_or_else(|| ConfigError::MissingField("history_id".to_string()))
    }

    /// Check values that would make a connection unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller_address.trim().is_empty() {
            return Err(ConfigError::MissingField("controller_address".to_string()));
        }
        if self.terminal.shell.trim().is_empty() {
            return Err(ConfigError::Invalid("terminal.shell must not be empty".to_string()));
        }
        if self.terminal.size.rows == 0 || self.terminal.size.cols == 0 {
            return Err(ConfigError::Invalid(format!(
                "terminal.size must be non-zero, got {}x{}",
                self.terminal.size.cols, self.terminal.size.rows
            )));
        }
        self.limits.validate()
    }
}

/// Settings for the process spawned on `launchModel`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Program that runs the launched script
    pub shell: String,

    /// Value of `TERM` for the spawned process
    pub term: String,

    /// Working directory (defaults to the home directory)
    pub working_dir: Option<PathBuf>,

    /// Geometry bound at spawn time
    pub size: TerminalSize,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            term: "xterm-color".to_string(),
            working_dir: None,
            size: TerminalSize::new(14, 181),
        }
    }
}

impl TerminalConfig {
    /// Directory the spawned process starts in
    pub fn resolved_working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Buffering limits for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Bytes requested per socket read
    pub read_buffer_size: usize,

    /// Largest text frame buffered while waiting for its delimiter
    pub max_frame_size: usize,

    /// Outbound messages queued before senders wait
    pub outbound_queue: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 64 * 1024,
            max_frame_size: MAX_FRAME_SIZE,
            outbound_queue: 256,
        }
    }
}

impl LimitsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("limits.read_buffer_size", self.read_buffer_size),
            ("limits.max_frame_size", self.max_frame_size),
            ("limits.outbound_queue", self.outbound_queue),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }
        Ok(())
    }
}
