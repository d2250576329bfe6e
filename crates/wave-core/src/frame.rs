//! Binary frame encoding/decoding
//!
//! Wave frame format:
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Byte 0:     Magic (0x57 = 'W')                                  │
//! │ Byte 1:     Flags                                               │
//! │             [7]   Persistent hint                               │
//! │             [6:0] Reserved                                      │
//! │ Byte 2-3:   Payload Length (uint16 big-endian, max 65535)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Payload (MessagePack encoded Message)                           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use crate::{Error, Result, MAGIC_BYTE};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frame header size
pub const HEADER_SIZE: usize = 4;

/// Maximum payload size
pub const MAX_PAYLOAD_SIZE: usize = 65535;

const FLAG_PERSISTENT: u8 = 0x80;

/// Frame flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
    pub persistent: bool,
}

impl FrameFlags {
    pub fn to_byte(&self) -> u8 {
        if self.persistent {
            FLAG_PERSISTENT
        } else {
            0
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            persistent: (byte & FLAG_PERSISTENT) != 0,
        }
    }
}

/// A Wave frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub flags: FrameFlags,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with payload
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            flags: FrameFlags::default(),
            payload: payload.into(),
        }
    }

    /// Set the persistent hint
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.flags.persistent = persistent;
        self
    }

    /// Calculate the total frame size
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Result<Bytes> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::PayloadTooLarge(self.payload.len()));
        }

        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u8(MAGIC_BYTE);
        buf.put_u8(self.flags.to_byte());
        buf.put_u16(self.payload.len() as u16);
        buf.extend_from_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Decode frame from bytes
    pub fn decode(mut buf: impl Buf) -> Result<Self> {
        if buf.remaining() < HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                needed: HEADER_SIZE,
                have: buf.remaining(),
            });
        }

        let magic = buf.get_u8();
        if magic != MAGIC_BYTE {
            return Err(Error::InvalidMagic(magic));
        }

        let flags = FrameFlags::from_byte(buf.get_u8());
        let payload_len = buf.get_u16() as usize;

        if buf.remaining() < payload_len {
            return Err(Error::BufferTooSmall {
                needed: HEADER_SIZE + payload_len,
                have: HEADER_SIZE + buf.remaining(),
            });
        }

        let payload = buf.copy_to_bytes(payload_len);

        Ok(Self { flags, payload })
    }

    /// Check if buffer starts with a complete frame, returning its size
    pub fn check_complete(buf: &[u8]) -> Option<usize> {
        if buf.len() < HEADER_SIZE || buf[0] != MAGIC_BYTE {
            return None;
        }

        let payload_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let total_size = HEADER_SIZE + payload_len;

        if buf.len() >= total_size {
            Some(total_size)
        } else {
            None
        }
    }

    /// Position of the next candidate frame start, skipping index 0
    pub fn next_magic(buf: &[u8]) -> Option<usize> {
        buf.iter()
            .skip(1)
            .position(|&b| b == MAGIC_BYTE)
            .map(|i| i + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encode_decode() {
        let payload = b"hello world";
        let frame = Frame::new(payload.as_slice()).with_persistent(true);

        let encoded = frame.encode().unwrap();
        let decoded = Frame::decode(&encoded[..]).unwrap();

        assert!(decoded.flags.persistent);
        assert_eq!(decoded.payload.as_ref(), payload);
    }

    #[test]
    fn test_check_complete() {
        let frame = Frame::new(b"test".as_slice());
        let encoded = frame.encode().unwrap();

        assert_eq!(Frame::check_complete(&encoded), Some(encoded.len()));
        assert_eq!(Frame::check_complete(&encoded[..2]), None);
        assert_eq!(Frame::check_complete(&encoded[..5]), None);
    }

    #[test]
    fn test_bad_magic() {
        let err = Frame::decode(&[0x00u8, 0, 0, 0][..]).unwrap_err();
        assert!(matches!(err, Error::InvalidMagic(0x00)));
        assert_eq!(Frame::check_complete(&[0x00, 0, 0, 0]), None);
    }

    #[test]
    fn test_next_magic() {
        assert_eq!(Frame::next_magic(&[MAGIC_BYTE, 1, 2, MAGIC_BYTE]), Some(3));
        assert_eq!(Frame::next_magic(&[1, 2, 3]), None);
    }

    #[test]
    fn test_payload_too_large() {
        let frame = Frame::new(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(frame.encode(), Err(Error::PayloadTooLarge(_))));
    }
}
