//! cm-protocol: Wire protocol for the chameleon agent
//!
//! One byte stream carries two kinds of payload: delimiter-terminated JSON
//! control messages and raw binary spans whose length was announced by a
//! preceding control message. This crate holds the pure framing functions,
//! the message taxonomy, and a tokio codec for the text half.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{decode, encode, ControlCodec, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use frame::{next_frame, next_frame_from, split_frames, take_binary_span, DELIMITER};
pub use message::{ControlMessage, ExecutionData, MessageKind, TerminalSize};
