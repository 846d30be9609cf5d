//! Byte counting for an incoming binary span
//!
//! A [`Transfer`] owns the sink for one announced file. Every chunk read
//! while the session is in binary mode goes through [`Transfer::feed`], which
//! writes at most the bytes still owed and reports whatever belongs to the
//! text stream that follows.

use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use cm_protocol::{take_binary_span, ProtocolError, DELIMITER};

use crate::error::EngineError;
use crate::storage::Sink;

/// Result of feeding one chunk to a transfer
#[derive(Debug, PartialEq, Eq)]
pub enum TransferOutcome {
    /// More bytes are owed
    InProgress,
    /// The span is complete and the sink is finalized
    Completed {
        /// Bytes after the span and its delimiter, to be read as text
        remainder: Bytes,
        /// The chunk ended exactly at the span end; the delimiter is still
        /// to come and must be dropped from the next read
        awaiting_delimiter: bool,
    },
}

/// An incoming binary span in progress
pub struct Transfer {
    /// Where the bytes are going
    target: PathBuf,
    /// Size announced by the controller
    declared_size: NonZeroU64,
    /// Bytes written so far
    consumed: u64,
    /// Open write target
    sink: Box<dyn Sink>,
}

impl Transfer {
    /// Start counting a span of `declared_size` bytes into `sink`
    pub fn new(target: PathBuf, declared_size: NonZeroU64, sink: Box<dyn Sink>) -> Self {
        Self {
            target,
            declared_size,
            consumed: 0,
            sink,
        }
    }

    /// Target path of the span
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Announced size of the span
    pub fn declared_size(&self) -> u64 {
        self.declared_size.get()
    }

    /// Bytes written to the sink so far
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Bytes still owed
    pub fn remaining(&self) -> u64 {
        self.declared_size.get() - self.consumed
    }

    /// Write the part of `incoming` that belongs to the span.
    ///
    /// On completion the sink is finalized and exactly one delimiter byte
    /// right after the span is dropped. Any other byte in that position is
    /// a framing violation.
    pub async fn feed(&mut self, incoming: Bytes) -> Result<TransferOutcome, EngineError> {
        // Take only what the announcement still owes us
        let need = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        let (taken, _) = take_binary_span(&incoming, need);
        let taken_len = taken.len();

        if taken_len > 0 {
            self.sink
                .write(taken)
                .await
                .map_err(|source| EngineError::SinkWrite {
                    path: self.target.clone(),
                    source,
                })?;
            self.consumed += taken_len as u64;
        }

        tracing::trace!(
            "Transfer {:?}: {}/{} bytes",
            self.target,
            self.consumed,
            self.declared_size
        );

        if self.consumed < self.declared_size.get() {
            return Ok(TransferOutcome::InProgress); // Need more data
        }

        self.sink
            .finalize()
            .await
            .map_err(|source| EngineError::SinkWrite {
                path: self.target.clone(),
                source,
            })?;

        // Exactly one delimiter follows the span
        let rest = incoming.slice(taken_len..);
        match rest.first() {
            // Owed by the next read
            None => Ok(TransferOutcome::Completed {
                remainder: Bytes::new(),
                awaiting_delimiter: true,
            }),
            Some(&DELIMITER) => Ok(TransferOutcome::Completed {
                remainder: rest.slice(1..),
                awaiting_delimiter: false,
            }),
            Some(&found) => Err(ProtocolError::MissingDelimiter { found }.into()),
        }
    }
}
