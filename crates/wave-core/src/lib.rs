//! Wave Core
//!
//! Core types, encoding, and symbol coding for the Wave protocol.
//!
//! This crate provides:
//! - The routed message type ([`Message`], [`Value`])
//! - The message schema seam ([`MessageSchema`], [`DefaultSchema`])
//! - Binary frame encoding/decoding ([`Frame`], [`codec`])
//! - Four-point phase symbol coding ([`modulation`])
//! - Line coding of stream bytes ([`LineCoding`], [`LineDecoder`])

pub mod codec;
pub mod error;
pub mod frame;
pub mod line;
pub mod modulation;
pub mod schema;
pub mod types;

pub use codec::{decode_message, encode_message};
pub use error::{Error, Result};
pub use frame::Frame;
pub use line::{LineCoding, LineDecoder, LineEncoder};
pub use modulation::Symbol;
pub use schema::{DefaultSchema, MessageSchema};
pub use types::{Message, Value};

/// Magic byte for frame identification
pub const MAGIC_BYTE: u8 = 0x57; // 'W' for Wave

/// Default QUIC listen port
pub const DEFAULT_PORT: u16 = 4242;

/// Channel the server subscribes to for its own diagnostics
pub const SERVER_CHANNEL: &str = "server-channel";
