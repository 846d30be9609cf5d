//! Pseudo-terminal collaborator
//!
//! The terminal bridge never touches a pty directly. It asks a [`PtyHost`]
//! to spawn a process and then consumes the process's output and exit as a
//! stream of [`PtyEvent`]s.

mod native;

pub use native::NativePtyHost;

use std::path::PathBuf;

use tokio::sync::mpsc;

use cm_protocol::TerminalSize;

use crate::error::EngineError;

/// Capacity of the event channel between a pty reader and the bridge
pub const EVENT_QUEUE: usize = 256;

/// What to run on a new pty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Program to execute
    pub program: String,
    /// Program arguments
    pub args: Vec<String>,
    /// Geometry bound at spawn time
    pub size: TerminalSize,
    /// Working directory
    pub cwd: PathBuf,
    /// Variables set on top of the inherited environment
    pub env: Vec<(String, String)>,
}

/// Output or exit of a pty process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// Bytes read from the pty master
    Output(Vec<u8>),
    /// Process exited with optional exit code
    Exited(Option<i32>),
}

/// Control over a running pty process
pub trait PtyControl: Send {
    /// Change the terminal geometry
    fn resize(&mut self, size: TerminalSize) -> Result<(), EngineError>;

    /// Terminate the process
    fn kill(&mut self) -> Result<(), EngineError>;
}

/// A spawned process: its control handle and its event stream
pub struct PtyProcess {
    pub control: Box<dyn PtyControl>,
    pub events: mpsc::Receiver<PtyEvent>,
}

/// Spawns processes on pseudo-terminals
pub trait PtyHost: Send + Sync {
    /// Start a process. The event stream ends after one `Exited` event.
    fn spawn(&self, request: SpawnRequest) -> Result<PtyProcess, EngineError>;
}
