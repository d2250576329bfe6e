//! Error types for Wave

use thiserror::Error;

/// Result type alias for Wave operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wave error types
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid magic byte in frame header
    #[error("invalid magic byte: expected 0x57, got 0x{0:02x}")]
    InvalidMagic(u8),

    /// Frame payload too large
    #[error("payload too large: {0} bytes (max 65535)")]
    PayloadTooLarge(usize),

    /// Frame buffer too small
    #[error("buffer too small: need {needed} bytes, have {have}")]
    BufferTooSmall { needed: usize, have: usize },

    /// MessagePack encoding error
    #[error("encode error: {0}")]
    EncodeError(String),

    /// MessagePack decoding error
    #[error("decode error: {0}")]
    DecodeError(String),

    /// A 2-bit code outside 0..=3 was handed to the symbol encoder
    #[error("invalid symbol code: {0} (expected 0..=3)")]
    InvalidSymbolCode(u8),

    /// A received symbol is not close enough to any canonical phase
    #[error("ambiguous symbol at index {index}")]
    AmbiguousSymbol { index: usize },

    /// Code sequence cannot be packed into whole bytes
    #[error("code sequence length {0} is not a multiple of 4")]
    UnalignedCodes(usize),

    /// Schema rejected the inputs of a new message
    #[error("cannot create message: {0}")]
    InvalidMessage(String),

    /// Message failed validation
    #[error("validation failed: {0}")]
    Validation(String),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::EncodeError(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}
