//! Message codec
//!
//! A message on the wire is one [`Frame`] whose payload is the
//! MessagePack encoding of [`Message`] with named fields.

use crate::{Frame, Message, Result};
use bytes::Bytes;

/// Encode a message into a complete frame
pub fn encode_message(message: &Message) -> Result<Bytes> {
    let payload = rmp_serde::to_vec_named(message)?;
    Frame::new(payload)
        .with_persistent(message.is_persistent)
        .encode()
}

/// Decode a complete frame into a message
pub fn decode_message(buf: &[u8]) -> Result<Message> {
    let frame = Frame::decode(buf)?;
    Ok(rmp_serde::from_slice(&frame.payload)?)
}
