//! Per-connection parsing state
//!
//! A session is either reading text frames or counting a binary span. The
//! two modes carry different data, so they are separate variants: there is
//! no transfer to touch while reading text, and no carry while counting.

use bytes::{Buf, Bytes, BytesMut};

use cm_protocol::{ProtocolError, DELIMITER};

use crate::error::EngineError;
use crate::storage::Source;
use crate::transfer::Transfer;

/// Text-mode state
#[derive(Debug, Default)]
struct TextState {
    /// Bytes of a frame whose delimiter has not arrived yet
    carry: BytesMut,
    /// A binary span ended exactly at the previous read boundary; its
    /// trailing delimiter is the next byte on the wire
    awaiting_delimiter: bool,
}

/// Current parsing mode
enum Mode {
    /// Reading delimiter-terminated control messages
    Text(TextState),
    /// Counting an announced binary span
    Binary(Transfer),
}

/// Label of a mode, for logging and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    /// Reading control messages
    Text,
    /// Counting a binary span
    Binary,
}

/// State of one open connection
pub struct Session {
    /// Parsing mode
    mode: Mode,
    /// Source announced to the controller and waiting for `waitReceive`
    staged_source: Option<Source>,
}

impl Session {
    /// Create a session in text mode with nothing buffered
    pub fn new() -> Self {
        Self {
            mode: Mode::Text(TextState::default()),
            staged_source: None,
        }
    }

    /// Which mode the session is in
    pub fn mode(&self) -> ModeKind {
        match self.mode {
            Mode::Text(_) => ModeKind::Text,
            Mode::Binary(_) => ModeKind::Binary,
        }
    }

    /// Whether a binary span is being counted
    pub fn is_binary(&self) -> bool {
        matches!(self.mode, Mode::Binary(_))
    }

    /// Buffered partial frame (always empty in binary mode)
    pub fn carry(&self) -> &[u8] {
        match &self.mode {
            Mode::Text(text) => &text.carry,
            Mode::Binary(_) => &[],
        }
    }

    /// The active transfer, if counting
    pub fn transfer(&self) -> Option<&Transfer> {
        match &self.mode {
            Mode::Binary(transfer) => Some(transfer),
            Mode::Text(_) => None,
        }
    }

    pub(crate) fn transfer_mut(&mut self) -> Option<&mut Transfer> {
        match &mut self.mode {
            Mode::Binary(transfer) => Some(transfer),
            Mode::Text(_) => None,
        }
    }

    /// Switch to binary mode for `transfer`.
    ///
    /// Only valid from text mode. The driver holds the unread text while
    /// dispatching, so whatever follows the announcing frame is fed to the
    /// transfer rather than left behind as carry.
    pub fn begin_transfer(&mut self, transfer: Transfer) -> Result<(), EngineError> {
        match &self.mode {
            Mode::Binary(_) => Err(EngineError::TransferInProgress),
            Mode::Text(_) => {
                tracing::debug!(
                    "Entering binary mode for {:?} ({} bytes)",
                    transfer.target(),
                    transfer.declared_size()
                );
                self.mode = Mode::Binary(transfer);
                Ok(())
            }
        }
    }

    /// Leave binary mode after a completed span
    pub(crate) fn complete_transfer(&mut self, awaiting_delimiter: bool) -> Option<Transfer> {
        let previous = std::mem::replace(
            &mut self.mode,
            Mode::Text(TextState {
                carry: BytesMut::new(),
                awaiting_delimiter,
            }),
        );
        match previous {
            Mode::Binary(transfer) => Some(transfer),
            Mode::Text(_) => None,
        }
    }

    /// Take the carry and append `input` to it.
    ///
    /// A delimiter still owed by the last binary span is dropped first. The
    /// returned buffer is owned by the caller until [`Session::restore_carry`].
    pub(crate) fn take_text(&mut self, mut input: Bytes) -> Result<BytesMut, ProtocolError> {
        let Mode::Text(text) = &mut self.mode else {
            return Ok(BytesMut::from(&input[..]));
        };

        if text.awaiting_delimiter && !input.is_empty() {
            match input[0] {
                DELIMITER => input.advance(1),
                found => return Err(ProtocolError::MissingDelimiter { found }),
            }
            text.awaiting_delimiter = false;
        }

        let mut buffer = std::mem::take(&mut text.carry);
        buffer.extend_from_slice(&input);
        Ok(buffer)
    }

    /// Put unconsumed text back as the carry
    pub(crate) fn restore_carry(&mut self, carry: BytesMut) {
        if let Mode::Text(text) = &mut self.mode {
            text.carry = carry;
        }
    }

    /// Stage a source until the controller is ready for it
    pub fn stage_source(&mut self, source: Source) -> Option<Source> {
        self.staged_source.replace(source)
    }

    /// Take the staged source
    pub fn take_staged_source(&mut self) -> Option<Source> {
        self.staged_source.take()
    }

    /// Drop every handle the session holds.
    ///
    /// An unfinished transfer is discarded without finalizing its sink.
    pub fn close(&mut self) {
        if let Some(transfer) = self.transfer() {
            tracing::warn!(
                "Discarding unfinished transfer to {:?} at {}/{} bytes",
                transfer.target(),
                transfer.consumed(),
                transfer.declared_size()
            );
        }
        self.mode = Mode::Text(TextState::default());
        self.staged_source = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
