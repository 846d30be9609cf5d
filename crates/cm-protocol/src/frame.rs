//! Frame boundaries on the shared byte stream
//!
//! Text frames are terminated by a single [`DELIMITER`] byte. Binary spans
//! carry no framing of their own; their length is announced beforehand and
//! they are followed by one delimiter that belongs to neither side.

use bytes::{Buf, Bytes, BytesMut};

/// Reserved byte terminating every text frame
pub const DELIMITER: u8 = 0x00;

/// Split a buffer into every delimiter-terminated frame plus the remainder.
///
/// Frames are returned in order and without their delimiters. Empty frames
/// (back-to-back delimiters) are kept so that joining the frames with
/// delimiters and appending the remainder reproduces `buffer` exactly.
pub fn split_frames(buffer: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut frames = Vec::new();
    let mut rest = buffer;
    while let Some(pos) = rest.iter().position(|&b| b == DELIMITER) {
        frames.push(&rest[..pos]);
        rest = &rest[pos + 1..];
    }
    (frames, rest)
}

/// Take the next complete frame off the front of `buffer`.
///
/// The delimiter is consumed along with the frame. Returns `None` and leaves
/// `buffer` untouched if no delimiter has arrived yet.
pub fn next_frame(buffer: &mut BytesMut) -> Option<Bytes> {
    next_frame_from(buffer, 0)
}

/// [`next_frame`] for a buffer whose first `scanned` bytes are known to hold
/// no delimiter, so the search starts after them.
pub fn next_frame_from(buffer: &mut BytesMut, scanned: usize) -> Option<Bytes> {
    let start = scanned.min(buffer.len());
    let pos = start + buffer[start..].iter().position(|&b| b == DELIMITER)?;
    let frame = buffer.split_to(pos).freeze();
    buffer.advance(1);
    Some(frame)
}

/// Split off at most `need` bytes from the front of `buffer`
pub fn take_binary_span(buffer: &[u8], need: usize) -> (&[u8], &[u8]) {
    buffer.split_at(need.min(buffer.len()))
}
