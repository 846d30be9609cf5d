//! Engine error types

use std::path::PathBuf;

use thiserror::Error;

use cm_protocol::ProtocolError;

/// Errors that end a connection
#[derive(Error, Debug)]
pub enum EngineError {
    /// The byte stream violated the protocol
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Persisting binary bytes failed
    #[error("Failed to write {}: {source}", path.display())]
    SinkWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading a requested file failed
    #[error("Failed to read {}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source ended before its announced size
    #[error("Source ended early: announced {expected} bytes, sent {actual}")]
    SourceTruncated { expected: u64, actual: u64 },

    /// The interactive process could not be started
    #[error("Failed to spawn interactive process: {0}")]
    SpawnFailed(String),

    /// A transfer was announced while another was still receiving
    #[error("Transfer announced while another transfer is in progress")]
    TransferInProgress,

    /// The outbound writer is gone
    #[error("Outbound channel closed")]
    OutboundClosed,

    /// I/O error on the connection itself
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the inbound stream lost its framing
    pub fn is_fatal_protocol(&self) -> bool {
        match self {
            Self::Protocol(e) => e.is_desync(),
            Self::TransferInProgress => true,
            _ => false,
        }
    }
}
