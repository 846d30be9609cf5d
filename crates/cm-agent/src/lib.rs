//! cm-agent: the Chameleon execution agent
//!
//! One TCP connection to the controller carries both NUL-delimited JSON
//! control messages and raw file bytes. The [`Connection`] driver splits the
//! stream into the two, dispatches control messages through a [`Registry`],
//! streams files to and from local storage, and bridges a pty process's
//! output back to the controller.

pub mod cli;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod outbound;
pub mod pty;
pub mod session;
pub mod storage;
pub mod terminal;
pub mod transfer;

pub use connection::{Collaborators, Connection};
pub use dispatch::{DispatchContext, Handler, Registry};
pub use error::EngineError;
pub use outbound::Outbound;
pub use session::{ModeKind, Session};
pub use storage::{FsStorage, Sink, Source, Storage};
pub use terminal::TerminalBridge;
pub use transfer::{Transfer, TransferOutcome};
