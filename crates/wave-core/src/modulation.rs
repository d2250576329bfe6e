//! Four-point phase symbol coding
//!
//! Each 2-bit code maps to one point of a QPSK-style constellation:
//!
//! ```text
//!            Q
//!            │  1 (90°)
//!            │
//!  2 (180°) ─┼─ 0 (0°)    I
//!            │
//!            │  3 (270°)
//! ```
//!
//! Decoding classifies a point by its nearest canonical phase. Points are
//! floating-point, so exact angle comparison is never used; anything within
//! [`PHASE_TOLERANCE`] of a canonical phase and at least [`MIN_MAGNITUDE`]
//! from the origin is accepted.

use crate::{Error, Result};
use std::f32::consts::{FRAC_PI_2, FRAC_PI_8};

/// Maximum angular distance from a canonical phase, in radians
pub const PHASE_TOLERANCE: f32 = FRAC_PI_8;

/// Points closer to the origin than this carry no usable phase
pub const MIN_MAGNITUDE: f32 = 0.25;

/// Codes carried per byte
pub const CODES_PER_BYTE: usize = 4;

/// A constellation point (in-phase, quadrature)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Symbol {
    pub i: f32,
    pub q: f32,
}

impl Symbol {
    pub const fn new(i: f32, q: f32) -> Self {
        Self { i, q }
    }

    /// Phase angle in radians, in (-pi, pi]
    pub fn phase(&self) -> f32 {
        self.q.atan2(self.i)
    }

    pub fn magnitude(&self) -> f32 {
        self.i.hypot(self.q)
    }

    /// Nearest canonical code, or `None` when the point is too weak or
    /// too far from every canonical phase
    pub fn classify(&self) -> Option<u8> {
        if !self.i.is_finite() || !self.q.is_finite() || self.magnitude() < MIN_MAGNITUDE {
            return None;
        }

        let angle = self.phase();
        let quadrant = (angle / FRAC_PI_2).round();
        if (angle - quadrant * FRAC_PI_2).abs() > PHASE_TOLERANCE {
            return None;
        }

        Some((quadrant as i32).rem_euclid(4) as u8)
    }
}

/// Canonical constellation, indexed by code
pub const CONSTELLATION: [Symbol; 4] = [
    Symbol::new(1.0, 0.0),
    Symbol::new(0.0, 1.0),
    Symbol::new(-1.0, 0.0),
    Symbol::new(0.0, -1.0),
];

/// Map 2-bit codes to constellation points
pub fn encode(codes: &[u8]) -> Result<Vec<Symbol>> {
    codes
        .iter()
        .map(|&code| {
            CONSTELLATION
                .get(code as usize)
                .copied()
                .ok_or(Error::InvalidSymbolCode(code))
        })
        .collect()
}

/// Recover 2-bit codes from constellation points
pub fn decode(symbols: &[Symbol]) -> Result<Vec<u8>> {
    symbols
        .iter()
        .enumerate()
        .map(|(index, symbol)| symbol.classify().ok_or(Error::AmbiguousSymbol { index }))
        .collect()
}

/// Split bytes into 2-bit codes, most significant pair first
pub fn unpack_codes(bytes: &[u8]) -> Vec<u8> {
    let mut codes = Vec::with_capacity(bytes.len() * CODES_PER_BYTE);
    for &byte in bytes {
        codes.extend_from_slice(&[byte >> 6, (byte >> 4) & 0x03, (byte >> 2) & 0x03, byte & 0x03]);
    }
    codes
}

/// Join 2-bit codes back into bytes
pub fn pack_codes(codes: &[u8]) -> Result<Vec<u8>> {
    if codes.len() % CODES_PER_BYTE != 0 {
        return Err(Error::UnalignedCodes(codes.len()));
    }

    codes
        .chunks_exact(CODES_PER_BYTE)
        .map(|group| {
            group.iter().try_fold(0u8, |acc, &code| {
                if code > 3 {
                    Err(Error::InvalidSymbolCode(code))
                } else {
                    Ok((acc << 2) | code)
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_points() {
        for code in 0..4u8 {
            assert_eq!(CONSTELLATION[code as usize].classify(), Some(code));
        }
    }

    #[test]
    fn test_negative_zero_and_pi() {
        assert_eq!(Symbol::new(-1.0, -0.0).classify(), Some(2));
        assert_eq!(Symbol::new(-1.0, 0.0).classify(), Some(2));
        assert_eq!(Symbol::new(0.0, -1.0).classify(), Some(3));
    }

    #[test]
    fn test_boundary_is_ambiguous() {
        let diagonal = Symbol::new(1.0, 1.0);
        assert_eq!(diagonal.classify(), None);
        assert_eq!(Symbol::new(0.0, 0.0).classify(), None);
        assert_eq!(Symbol::new(f32::NAN, 1.0).classify(), None);
    }

    #[test]
    fn test_encode_rejects_wide_code() {
        assert!(matches!(encode(&[0, 4]), Err(Error::InvalidSymbolCode(4))));
    }

    #[test]
    fn test_unpack_pack() {
        let codes = unpack_codes(&[0b1110_0100]);
        assert_eq!(codes, vec![3, 2, 1, 0]);
        assert_eq!(pack_codes(&codes).unwrap(), vec![0b1110_0100]);
        assert!(matches!(pack_codes(&[1, 2]), Err(Error::UnalignedCodes(2))));
    }
}
