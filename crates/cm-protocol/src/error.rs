//! Protocol error types

use thiserror::Error;

/// Longest rendering of offending bytes kept in a diagnostic
const PREVIEW_LIMIT: usize = 256;

/// Errors that can occur while framing or decoding control messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// A complete frame could not be decoded into a control message
    #[error("Malformed frame ({reason}): {preview}")]
    MalformedFrame { reason: String, preview: String },

    /// A frame named a message kind nobody handles
    #[error("Unknown message kind: {0}")]
    UnknownMessageKind(String),

    /// Buffered text grew past the frame limit without a delimiter
    #[error("Frame too large: {size} bytes buffered exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// A binary span was not followed by the frame delimiter
    #[error("Expected delimiter after binary span, found byte 0x{found:02x}")]
    MissingDelimiter { found: u8 },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Build a `MalformedFrame` error that carries a preview of the frame
    pub fn malformed(frame: &[u8], reason: impl std::fmt::Display) -> Self {
        Self::MalformedFrame {
            reason: reason.to_string(),
            preview: preview(frame),
        }
    }

    /// Whether this error means the byte stream can no longer be trusted
    pub fn is_desync(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

/// Render bytes for a diagnostic, lossy and length-capped
pub fn preview(bytes: &[u8]) -> String {
    let shown = &bytes[..bytes.len().min(PREVIEW_LIMIT)];
    let mut text = format!("{:?}", String::from_utf8_lossy(shown));
    if bytes.len() > PREVIEW_LIMIT {
        text.push_str(&format!(" (+{} more bytes)", bytes.len() - PREVIEW_LIMIT));
    }
    text
}
