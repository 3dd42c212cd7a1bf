// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Integer values manipulated by the engine, and hex-string parsing.

use super::bits;
use core::fmt;
use core::fmt::Display;
use thiserror::Error;

/// An unsigned value as seen by expressions and primitives.
///
/// Arithmetic wraps at 128 bits; values are truncated to a field's width
/// when they are written back to the field vector.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Data(pub u128);

impl Data {
    pub const fn new(v: u128) -> Self {
        Self(v)
    }

    pub const fn get(&self) -> u128 {
        self.0
    }

    /// Parse a hex string such as `0x0800`, with or without the prefix.
    /// A leading `-` yields the two's complement of the magnitude.
    pub fn from_hexstr(s: &str) -> Result<Self, HexError> {
        let (neg, s) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let bytes = hexstr_to_bytes(s)?;
        let v = bits::be_to_u128(&bytes);
        Ok(Self(if neg { v.wrapping_neg() } else { v }))
    }

    /// The value as a big-endian string of `nbytes` bytes.
    pub fn to_bytes(&self, nbytes: usize) -> Vec<u8> {
        bits::u128_to_be(self.0, nbytes)
    }
}

impl From<u128> for Data {
    fn from(v: u128) -> Self {
        Self(v)
    }
}

impl From<u64> for Data {
    fn from(v: u64) -> Self {
        Self(u128::from(v))
    }
}

impl Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("bad hex string: {0}")]
pub struct HexError(pub String);

/// Parse a hex string into big-endian bytes. An odd number of digits is
/// padded with a leading zero nibble.
pub fn hexstr_to_bytes(s: &str) -> Result<Vec<u8>, HexError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);

    if digits.is_empty() {
        return Err(HexError(s.to_string()));
    }

    let nibbles = digits
        .chars()
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| HexError(s.to_string()))?;

    let mut out = Vec::with_capacity(nibbles.len().div_ceil(2));
    let mut iter = nibbles.iter();
    if nibbles.len() % 2 == 1 {
        if let Some(n) = iter.next() {
            out.push(*n);
        }
    }
    while let (Some(hi), Some(lo)) = (iter.next(), iter.next()) {
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

/// Parse a hex string into exactly `nbytes` bytes, dropping high bytes
/// that do not fit and left-padding with zeroes.
pub fn hexstr_to_width(s: &str, nbytes: usize) -> Result<Vec<u8>, HexError> {
    let bytes = hexstr_to_bytes(s)?;
    Ok(fit_to_width(&bytes, nbytes))
}

/// Right-align `bytes` into a buffer of `nbytes` bytes.
pub fn fit_to_width(bytes: &[u8], nbytes: usize) -> Vec<u8> {
    if bytes.len() >= nbytes {
        return bytes[bytes.len() - nbytes..].to_vec();
    }

    let mut out = vec![0u8; nbytes - bytes.len()];
    out.extend_from_slice(bytes);
    out
}
