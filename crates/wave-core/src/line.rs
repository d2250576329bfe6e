//! Line coding of stream bytes
//!
//! With [`LineCoding::Qpsk`] every payload byte travels as four phase
//! symbols, and every symbol as two signed sample bytes (I then Q) scaled
//! by [`SAMPLE_SCALE`]:
//!
//! ```text
//! payload byte 0b11_10_01_00
//!   -> codes     3, 2, 1, 0
//!   -> symbols   (0,-1) (-1,0) (0,1) (1,0)
//!   -> samples   00 9c | 9c 00 | 00 64 | 64 00
//! ```
//!
//! [`LineCoding::Raw`] carries payload bytes unchanged.
//!
//! Reads split the sample stream at arbitrary points, so [`LineDecoder`]
//! keeps the odd trailing sample and any incomplete group of codes until
//! the next chunk arrives.

use crate::modulation::{self, Symbol, CODES_PER_BYTE};
use crate::Result;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

/// Sample value of a unit-magnitude component
pub const SAMPLE_SCALE: f32 = 100.0;

/// Wire bytes produced per payload byte by [`LineCoding::Qpsk`]
pub const QPSK_EXPANSION: usize = CODES_PER_BYTE * 2;

/// How payload bytes are represented on a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineCoding {
    /// Phase symbols carried as I/Q sample pairs
    #[default]
    Qpsk,
    /// Bytes carried directly
    Raw,
}

impl LineCoding {
    pub fn encoder(self) -> LineEncoder {
        LineEncoder { coding: self }
    }

    pub fn decoder(self) -> LineDecoder {
        LineDecoder::new(self)
    }
}

impl fmt::Display for LineCoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineCoding::Qpsk => write!(f, "qpsk"),
            LineCoding::Raw => write!(f, "raw"),
        }
    }
}

impl FromStr for LineCoding {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "qpsk" => Ok(LineCoding::Qpsk),
            "raw" => Ok(LineCoding::Raw),
            other => Err(format!("unknown line coding: {}", other)),
        }
    }
}

fn to_sample(component: f32) -> u8 {
    (component * SAMPLE_SCALE).round().clamp(-127.0, 127.0) as i8 as u8
}

fn from_sample(sample: u8) -> f32 {
    (sample as i8) as f32 / SAMPLE_SCALE
}

/// Stateless encoder for the sending side of a stream
#[derive(Debug, Clone, Copy)]
pub struct LineEncoder {
    coding: LineCoding,
}

impl LineEncoder {
    /// Encode payload bytes into wire bytes
    pub fn encode(&self, data: &[u8]) -> Bytes {
        match self.coding {
            LineCoding::Raw => Bytes::copy_from_slice(data),
            LineCoding::Qpsk => {
                let codes = modulation::unpack_codes(data);
                let mut buf = BytesMut::with_capacity(data.len() * QPSK_EXPANSION);
                // unpack_codes only yields 0..=3, so every code has a point
                for code in codes {
                    let symbol = modulation::CONSTELLATION[code as usize];
                    buf.put_u8(to_sample(symbol.i));
                    buf.put_u8(to_sample(symbol.q));
                }
                buf.freeze()
            }
        }
    }
}

/// Incremental decoder owned by one stream
#[derive(Debug)]
pub struct LineDecoder {
    coding: LineCoding,
    pending_sample: Option<u8>,
    pending_codes: Vec<u8>,
}

impl LineDecoder {
    pub fn new(coding: LineCoding) -> Self {
        Self {
            coding,
            pending_sample: None,
            pending_codes: Vec::with_capacity(CODES_PER_BYTE),
        }
    }

    /// Drop any partially received symbol or byte
    pub fn reset(&mut self) {
        self.pending_sample = None;
        self.pending_codes.clear();
    }

    /// Decode one chunk, appending recovered payload bytes to `out`.
    ///
    /// Returns the number of bytes appended. On error nothing is appended
    /// and the carried state is discarded.
    pub fn feed(&mut self, chunk: &[u8], out: &mut BytesMut) -> Result<usize> {
        match self.coding {
            LineCoding::Raw => {
                out.extend_from_slice(chunk);
                Ok(chunk.len())
            }
            LineCoding::Qpsk => self.feed_qpsk(chunk, out),
        }
    }

    fn feed_qpsk(&mut self, chunk: &[u8], out: &mut BytesMut) -> Result<usize> {
        let mut samples = chunk.iter().copied();
        let mut symbols = Vec::with_capacity((chunk.len() + 1) / 2);

        if let Some(i) = self.pending_sample.take() {
            match samples.next() {
                Some(q) => symbols.push(Symbol::new(from_sample(i), from_sample(q))),
                None => {
                    self.pending_sample = Some(i);
                    return Ok(0);
                }
            }
        }

        loop {
            match (samples.next(), samples.next()) {
                (Some(i), Some(q)) => symbols.push(Symbol::new(from_sample(i), from_sample(q))),
                (Some(i), None) => {
                    self.pending_sample = Some(i);
                    break;
                }
                _ => break,
            }
        }

        let codes = match modulation::decode(&symbols) {
            Ok(codes) => codes,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };
        self.pending_codes.extend_from_slice(&codes);

        let whole = self.pending_codes.len() - self.pending_codes.len() % CODES_PER_BYTE;
        let bytes = modulation::pack_codes(&self.pending_codes[..whole])?;
        self.pending_codes.drain(..whole);
        out.extend_from_slice(&bytes);

        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_sample_layout() {
        let wire = LineCoding::Qpsk.encoder().encode(&[0b1110_0100]);
        assert_eq!(
            wire.as_ref(),
            &[0x00, 0x9c, 0x9c, 0x00, 0x00, 0x64, 0x64, 0x00]
        );
    }

    #[test]
    fn test_odd_split() {
        let wire = LineCoding::Qpsk.encoder().encode(b"ok");
        let mut decoder = LineCoding::Qpsk.decoder();
        let mut out = BytesMut::new();

        assert_eq!(decoder.feed(&wire[..3], &mut out).unwrap(), 0);
        assert_eq!(decoder.feed(&wire[3..9], &mut out).unwrap(), 1);
        assert_eq!(decoder.feed(&wire[9..], &mut out).unwrap(), 1);
        assert_eq!(out.as_ref(), b"ok");
    }

    #[test]
    fn test_ambiguous_chunk_resets() {
        let mut decoder = LineCoding::Qpsk.decoder();
        let mut out = BytesMut::new();

        // half a byte worth of codes, then a diagonal point
        let wire = LineCoding::Qpsk.encoder().encode(&[0xff]);
        decoder.feed(&wire[..5], &mut out).unwrap();
        let err = decoder.feed(&[64, 64, 64], &mut out).unwrap_err();
        assert!(matches!(err, Error::AmbiguousSymbol { .. }));
        assert!(out.is_empty());

        decoder.feed(&wire, &mut out).unwrap();
        assert_eq!(out.as_ref(), &[0xff]);
    }

    #[test]
    fn test_parse() {
        assert_eq!("QPSK".parse::<LineCoding>().unwrap(), LineCoding::Qpsk);
        assert_eq!("raw".parse::<LineCoding>().unwrap(), LineCoding::Raw);
        assert!("bpsk".parse::<LineCoding>().is_err());
    }
}
