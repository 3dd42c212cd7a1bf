// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Bit-granular access to network-order byte buffers.
//!
//! Bit 0 is the most significant bit of byte 0, which is the order in
//! which bits appear on the wire. Values pulled out of a buffer are
//! returned right-aligned: an `n`-bit value occupies the low `n` bits of
//! a `ceil(n / 8)` byte big-endian string.

/// The number of bytes needed to hold `nbits` bits.
pub const fn nbytes_for(nbits: usize) -> usize {
    nbits.div_ceil(8)
}

fn get_bit(src: &[u8], bit: usize) -> bool {
    (src[bit / 8] >> (7 - (bit % 8))) & 1 == 1
}

fn put_bit(dst: &mut [u8], bit: usize, val: bool) {
    let mask = 1u8 << (7 - (bit % 8));
    if val {
        dst[bit / 8] |= mask;
    } else {
        dst[bit / 8] &= !mask;
    }
}

/// Extract `nbits` bits starting at bit `bit_off` of `src`.
///
/// The caller guarantees `bit_off + nbits <= src.len() * 8`.
pub fn extract_bits(src: &[u8], bit_off: usize, nbits: usize) -> Vec<u8> {
    let out_len = nbytes_for(nbits);

    if bit_off % 8 == 0 && nbits % 8 == 0 {
        let start = bit_off / 8;
        return src[start..start + out_len].to_vec();
    }

    let mut out = vec![0u8; out_len];
    let pad = out_len * 8 - nbits;
    for i in 0..nbits {
        if get_bit(src, bit_off + i) {
            put_bit(&mut out, pad + i, true);
        }
    }
    out
}

/// Write the low `nbits` bits of the right-aligned value `src` into
/// `dst` starting at bit `bit_off`. Bits of `dst` outside the range are
/// left untouched.
pub fn deposit_bits(dst: &mut [u8], bit_off: usize, nbits: usize, src: &[u8]) {
    let src_bits = src.len() * 8;

    if bit_off % 8 == 0 && nbits % 8 == 0 && src.len() == nbits / 8 {
        let start = bit_off / 8;
        dst[start..start + src.len()].copy_from_slice(src);
        return;
    }

    for i in 0..nbits {
        // Source bits beyond what `src` holds are zero.
        let val = if nbits - i > src_bits {
            false
        } else {
            get_bit(src, src_bits - (nbits - i))
        };
        put_bit(dst, bit_off + i, val);
    }
}

/// Interpret a big-endian byte string as an integer, keeping the low 128
/// bits.
pub fn be_to_u128(bytes: &[u8]) -> u128 {
    let tail = &bytes[bytes.len().saturating_sub(16)..];
    tail.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b))
}

/// Write `val` as a big-endian string of `nbytes` bytes, truncating high
/// bits that do not fit.
pub fn u128_to_be(val: u128, nbytes: usize) -> Vec<u8> {
    let mut out = vec![0u8; nbytes];
    let full = val.to_be_bytes();
    let n = nbytes.min(16);
    out[nbytes - n..].copy_from_slice(&full[16 - n..]);
    out
}

/// Clear the bits of a right-aligned value above `nbits`.
pub fn mask_to_width(bytes: &mut [u8], nbits: usize) {
    let total = bytes.len() * 8;
    if nbits >= total {
        return;
    }

    let excess = total - nbits;
    for (i, b) in bytes.iter_mut().enumerate() {
        let lo = i * 8;
        if lo + 8 <= excess {
            *b = 0;
        } else if lo < excess {
            *b &= 0xFF >> (excess - lo);
        }
    }
}

/// The all-ones mask for a `nbits` wide integer.
pub const fn width_mask(nbits: u32) -> u128 {
    if nbits >= 128 { u128::MAX } else { (1u128 << nbits) - 1 }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extract_unaligned() {
        // 1010_1100 0101_0011
        let buf = [0xAC, 0x53];
        assert_eq!(extract_bits(&buf, 0, 4), vec![0x0A]);
        assert_eq!(extract_bits(&buf, 4, 4), vec![0x0C]);
        assert_eq!(extract_bits(&buf, 3, 9), vec![0x00, 0xC5]);
        assert_eq!(extract_bits(&buf, 0, 16), vec![0xAC, 0x53]);
        assert_eq!(extract_bits(&buf, 15, 1), vec![0x01]);
    }

    #[test]
    fn deposit_preserves_neighbours() {
        let mut buf = [0xFF, 0xFF];
        deposit_bits(&mut buf, 4, 8, &[0x00]);
        assert_eq!(buf, [0xF0, 0x0F]);

        let mut buf = [0x00, 0x00];
        deposit_bits(&mut buf, 3, 9, &[0x01, 0xC5]);
        assert_eq!(buf, [0x1C, 0x50]);
    }

    #[test]
    fn ipv4_version_ihl() {
        let hdr = [0x45u8];
        assert_eq!(extract_bits(&hdr, 0, 4), vec![4]);
        assert_eq!(extract_bits(&hdr, 4, 4), vec![5]);
    }

    #[test]
    fn integer_conversions() {
        assert_eq!(be_to_u128(&[0x01, 0x02]), 0x0102);
        assert_eq!(u128_to_be(0x1_0203, 2), vec![0x02, 0x03]);
        assert_eq!(u128_to_be(0x7, 3), vec![0, 0, 7]);
        let mut b = [0xFF, 0xFF];
        mask_to_width(&mut b, 9);
        assert_eq!(b, [0x01, 0xFF]);
        assert_eq!(width_mask(13), 0x1FFF);
        assert_eq!(width_mask(128), u128::MAX);
    }
}
