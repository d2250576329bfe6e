//! Message schema: construction, deserialization and validation
//!
//! The router and the stream pipeline only talk to messages through the
//! [`MessageSchema`] trait, so deployments can swap in stricter rules
//! without touching routing code.

use crate::{Error, Message, Result, Value};

/// Maximum length of a channel or sender identifier, in bytes
pub const MAX_ID_LEN: usize = 255;

/// Builds, parses and checks [`Message`]s
pub trait MessageSchema: Send + Sync {
    /// Create a new message, failing when the inputs break schema rules
    fn create_message(
        &self,
        channel_id: &str,
        sender_id: &str,
        payload: Value,
        is_persistent: bool,
    ) -> Result<Message>;

    /// Deserialize a frame payload into a message
    fn deserialize(&self, data: &[u8]) -> Result<Message>;

    /// Check that a message has every required field in a valid form
    fn validate(&self, message: &Message) -> Result<()>;
}

/// Schema used by the router unless another one is injected.
///
/// Payloads are MessagePack; identifiers must be non-empty, at most
/// [`MAX_ID_LEN`] bytes and free of control characters.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSchema;

impl DefaultSchema {
    pub fn new() -> Self {
        Self
    }
}

fn check_id(field: &str, value: &str) -> std::result::Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} is empty", field));
    }
    if value.len() > MAX_ID_LEN {
        return Err(format!(
            "{} is {} bytes (max {})",
            field,
            value.len(),
            MAX_ID_LEN
        ));
    }
    if value.chars().any(char::is_control) {
        return Err(format!("{} contains control characters", field));
    }
    Ok(())
}

impl MessageSchema for DefaultSchema {
    fn create_message(
        &self,
        channel_id: &str,
        sender_id: &str,
        payload: Value,
        is_persistent: bool,
    ) -> Result<Message> {
        check_id("channel_id", channel_id).map_err(Error::InvalidMessage)?;
        check_id("sender_id", sender_id).map_err(Error::InvalidMessage)?;

        Ok(Message {
            channel_id: channel_id.to_string(),
            sender_id: sender_id.to_string(),
            payload,
            is_persistent,
        })
    }

    fn deserialize(&self, data: &[u8]) -> Result<Message> {
        Ok(rmp_serde::from_slice(data)?)
    }

    fn validate(&self, message: &Message) -> Result<()> {
        check_id("channel_id", &message.channel_id).map_err(Error::Validation)?;
        check_id("sender_id", &message.sender_id).map_err(Error::Validation)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_empty_channel() {
        let schema = DefaultSchema::new();
        let err = schema
            .create_message("", "u1", Value::from("hi"), false)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
    }

    #[test]
    fn test_create_and_validate() {
        let schema = DefaultSchema::new();
        let msg = schema
            .create_message("chat", "u1", Value::from("hi"), true)
            .unwrap();
        assert_eq!(msg.channel_id, "chat");
        assert!(msg.is_persistent);
        assert!(schema.validate(&msg).is_ok());
    }

    #[test]
    fn test_validate_rejects_long_sender() {
        let schema = DefaultSchema::new();
        let msg = Message {
            channel_id: "chat".into(),
            sender_id: "x".repeat(MAX_ID_LEN + 1),
            payload: Value::Null,
            is_persistent: false,
        };
        assert!(matches!(schema.validate(&msg), Err(Error::Validation(_))));
    }

    #[test]
    fn test_deserialize_wrong_shape() {
        let schema = DefaultSchema::new();
        let data = rmp_serde::to_vec(&vec![1u32, 2, 3]).unwrap();
        assert!(matches!(
            schema.deserialize(&data),
            Err(Error::DecodeError(_))
        ));
    }
}
