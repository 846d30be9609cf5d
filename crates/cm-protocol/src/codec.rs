//! Control message encoding and the tokio codec for text frames

use bytes::{BufMut, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{next_frame, DELIMITER};
use crate::message::{ControlMessage, MessageKind};

/// Default limit on buffered bytes of a single text frame (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Decode one complete, already isolated frame into a control message.
///
/// Bytes that are not a JSON object with a string `msg` field fail with
/// `MalformedFrame`; a `msg` token outside the known set fails with
/// `UnknownMessageKind`.
pub fn decode(frame: &[u8]) -> Result<ControlMessage, ProtocolError> {
    let value: Value =
        serde_json::from_slice(frame).map_err(|e| ProtocolError::malformed(frame, e))?;

    let token = value
        .get("msg")
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::malformed(frame, "missing string field `msg`"))?;

    // Distinguish an unknown kind from a malformed known one
    if MessageKind::from_wire(token).is_none() {
        return Err(ProtocolError::UnknownMessageKind(token.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::malformed(frame, e))
}

/// Encode a control message followed by the frame delimiter
pub fn encode(message: &ControlMessage, dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = serde_json::to_vec(message).map_err(|e| ProtocolError::MalformedFrame {
        reason: e.to_string(),
        preview: format!("{:?}", message.kind()),
    })?;
    dst.reserve(payload.len() + 1);
    dst.extend_from_slice(&payload);
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Codec for delimiter-terminated control messages.
///
/// This only understands the text half of the protocol. The agent's
/// inbound side switches modes itself and uses the free functions above;
/// the codec serves the outbound writer and controller-side readers.
#[derive(Debug)]
pub struct ControlCodec {
    /// Largest frame accepted before giving up on a delimiter
    max_frame_size: usize,
}

impl ControlCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a new codec with a custom frame limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for ControlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ControlCodec {
    type Item = ControlMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(frame) = next_frame(src) else {
                // Need more data, unless the partial frame is already too big
                if src.len() > self.max_frame_size {
                    return Err(ProtocolError::FrameTooLarge {
                        size: src.len(),
                        max: self.max_frame_size,
                    });
                }
                return Ok(None);
            };

            // Back-to-back delimiters
            if frame.is_empty() {
                continue;
            }

            return decode(&frame).map(Some);
        }
    }
}

impl Encoder<ControlMessage> for ControlCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode(&message, dst)
    }
}
