// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The internet checksum, and checksums bound to PHV fields.
//!
//! [`Checksum`] is a rolling one's complement sum (RFC 1071). Summed
//! bytes are in network order and are treated as native 16-bit words,
//! so the finalized sum is already in network order when written back
//! with `to_ne_bytes()`. No byte swapping is ever performed on the
//! checksum itself.
//!
//! A [`FieldChecksum`] owns one destination field and is recomputed at
//! deparse time, overwriting whatever the field held.

use super::calc::Calculation;
use super::data::Data;
use super::packet::Packet;
use super::phv::FieldId;
use std::sync::Arc;

/// The checksum bytes as stored in a header, one's complement applied.
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }
}

impl From<Checksum> for HeaderChecksum {
    fn from(mut csum: Checksum) -> HeaderChecksum {
        Self { inner: (!csum.finalize()).to_ne_bytes() }
    }
}

/// A one's complement sum. Carries are folded only when the sum is
/// finalized.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    /// Sum `bytes` as a run of 16-bit words.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Fold the carries and return the sum.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        (self.inner & 0xFFFF) as u16
    }
}

fn csum_add(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        csum += u32::from(u16::from_ne_bytes([pair[0], pair[1]]));
        // Fold early so long buffers cannot overflow the accumulator.
        if csum & 0x8000_0000 != 0 {
            csum = (csum >> 16) + (csum & 0xFFFF);
        }
    }

    if let [last] = chunks.remainder() {
        csum += u32::from(u16::from_ne_bytes([*last, 0]));
    }

    csum
}

/// How a [`FieldChecksum`] computes its value.
#[derive(Clone, Debug)]
pub enum ChecksumKind {
    /// The IPv4 header checksum over the header holding the field.
    Ipv4,
    /// The result of a named calculation.
    Calc(Arc<Calculation>),
}

/// A checksum bound to one destination field.
#[derive(Clone, Debug)]
pub struct FieldChecksum {
    pub name: String,
    pub id: u32,
    dst: FieldId,
    kind: ChecksumKind,
}

impl FieldChecksum {
    pub fn new(name: &str, id: u32, dst: FieldId, kind: ChecksumKind) -> Self {
        Self { name: name.to_string(), id, dst, kind }
    }

    pub fn target(&self) -> FieldId {
        self.dst
    }

    pub fn kind(&self) -> &ChecksumKind {
        &self.kind
    }

    fn compute(&self, pkt: &mut Packet) -> Data {
        match &self.kind {
            ChecksumKind::Ipv4 => {
                if let Some(f) = pkt.phv.field_mut(self.dst) {
                    f.set(Data(0));
                }
                let bytes = pkt.phv.header(self.dst.header).deparse();
                let hc = HeaderChecksum::from(Checksum::compute(&bytes));
                Data(u128::from(u16::from_be_bytes(hc.bytes())))
            }

            ChecksumKind::Calc(calc) => Data(u128::from(calc.compute(pkt))),
        }
    }

    /// Recompute and store the checksum. Does nothing if the header
    /// holding the destination field is invalid.
    pub fn update(&self, pkt: &mut Packet) {
        if !pkt.phv.header(self.dst.header).is_valid() {
            return;
        }

        let v = self.compute(pkt);
        if let Some(f) = pkt.phv.field_mut(self.dst) {
            f.set(v);
        }
    }

    /// Does the destination field hold the correct checksum? An invalid
    /// header verifies trivially.
    pub fn verify(&self, pkt: &Packet) -> bool {
        if !pkt.phv.header(self.dst.header).is_valid() {
            return true;
        }

        let current = pkt.phv.field(self.dst).get();
        let mut scratch = pkt.clone();
        self.compute(&mut scratch) == current
    }
}
