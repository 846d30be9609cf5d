//! cm-core: Configuration for the chameleon agent
//!
//! Holds the settings shared by the connection engine and the command line
//! shell: where the controller lives, how the interactive process is
//! spawned, and how much a single connection may buffer.

pub mod config;
pub mod error;

pub use config::{AgentConfig, LimitsConfig, TerminalConfig};
pub use error::ConfigError;
