// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Calculations: a byte buffer assembled from a packet, reduced by a
//! named hash function.

use super::bits;
use super::hash::HashFn;
use super::packet::Packet;
use super::phv::FieldId;
use super::phv::HeaderId;

/// One segment of a calculation's input buffer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BufSegment {
    /// All bits of a field.
    Field { field: FieldId, bits: u32 },
    /// A right-aligned constant of `bits` bits.
    Constant { value: Vec<u8>, bits: u32 },
    /// The wire image of a header; skipped when the header is invalid.
    Header(HeaderId),
    /// Everything after the parsed headers.
    Payload,
}

/// Packs segments back to back at bit granularity.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BufBuilder {
    segments: Vec<BufSegment>,
}

struct BitWriter {
    buf: Vec<u8>,
    nbits: usize,
}

impl BitWriter {
    fn push(&mut self, src: &[u8], nbits: usize) {
        if nbits == 0 {
            return;
        }

        let need = bits::nbytes_for(self.nbits + nbits);
        if self.buf.len() < need {
            self.buf.resize(need, 0);
        }
        bits::deposit_bits(&mut self.buf, self.nbits, nbits, src);
        self.nbits += nbits;
    }
}

impl BufBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back_field(&mut self, field: FieldId, bits: u32) {
        self.segments.push(BufSegment::Field { field, bits });
    }

    pub fn push_back_constant(&mut self, value: Vec<u8>, bits: u32) {
        self.segments.push(BufSegment::Constant { value, bits });
    }

    pub fn push_back_header(&mut self, header: HeaderId) {
        self.segments.push(BufSegment::Header(header));
    }

    pub fn append_payload(&mut self) {
        self.segments.push(BufSegment::Payload);
    }

    pub fn segments(&self) -> &[BufSegment] {
        &self.segments
    }

    /// Build the input buffer for `pkt`.
    pub fn build(&self, pkt: &Packet) -> Vec<u8> {
        let mut w = BitWriter { buf: vec![], nbits: 0 };

        for seg in &self.segments {
            match seg {
                BufSegment::Field { field, bits } => {
                    w.push(pkt.phv.field(*field).bytes(), *bits as usize);
                }

                BufSegment::Constant { value, bits } => {
                    w.push(value, *bits as usize);
                }

                BufSegment::Header(hid) => {
                    let hdr = pkt.phv.header(*hid);
                    if hdr.is_valid() {
                        let bytes = hdr.deparse();
                        w.push(&bytes, bytes.len() * 8);
                    }
                }

                BufSegment::Payload => {
                    let payload = pkt.payload();
                    w.push(payload, payload.len() * 8);
                }
            }
        }

        w.buf
    }
}

/// A buffer specification bound to a hash function.
#[derive(Clone, Debug)]
pub struct Calculation {
    pub name: String,
    pub id: u32,
    algo: String,
    builder: BufBuilder,
    hash: HashFn,
}

impl Calculation {
    pub fn new(
        name: &str,
        id: u32,
        algo: &str,
        builder: BufBuilder,
        hash: HashFn,
    ) -> Self {
        Self {
            name: name.to_string(),
            id,
            algo: algo.to_string(),
            builder,
            hash,
        }
    }

    /// The name of the algorithm actually in use.
    pub fn algo(&self) -> &str {
        &self.algo
    }

    pub fn builder(&self) -> &BufBuilder {
        &self.builder
    }

    pub fn compute(&self, pkt: &Packet) -> u64 {
        (self.hash)(&self.builder.build(pkt))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::data::Data;
    use crate::engine::hash;
    use crate::engine::header::HeaderType;
    use crate::engine::phv::PhvTemplate;
    use std::sync::Arc;

    fn pkt() -> (PhvTemplate, Packet) {
        let ht = Arc::new(HeaderType::new(
            "h_t",
            0,
            &[("a".to_string(), 4), ("b".to_string(), 12)],
        ));
        let mut t = PhvTemplate::new();
        t.push_header("h", ht, false);
        let mut pkt = Packet::new(0, vec![0xab, 0xcd, 0x01, 0x02], t.new_phv());
        pkt.phv.header_mut(HeaderId(0)).extract(&[0xab, 0xcd]);
        pkt.set_payload_offset(2);
        (t, pkt)
    }

    #[test]
    fn fields_pack_at_bit_granularity() {
        let (t, pkt) = pkt();
        let mut b = BufBuilder::new();
        b.push_back_field(t.field_id("h", "a").unwrap(), 4);
        b.push_back_constant(vec![0x05], 4);
        b.push_back_field(t.field_id("h", "b").unwrap(), 12);
        // a=0xa, 0x5, b=0xbcd -> 1010 0101 1011 1100 1101
        assert_eq!(b.build(&pkt), vec![0xa5, 0xbc, 0xd0]);
    }

    #[test]
    fn header_and_payload() {
        let (_, mut pkt) = pkt();
        let mut b = BufBuilder::new();
        b.push_back_header(HeaderId(0));
        b.append_payload();
        assert_eq!(b.build(&pkt), vec![0xab, 0xcd, 0x01, 0x02]);

        pkt.phv.header_mut(HeaderId(0)).mark_invalid();
        assert_eq!(b.build(&pkt), vec![0x01, 0x02]);
    }

    #[test]
    fn compute_uses_hash() {
        let (t, mut pkt) = pkt();
        let mut b = BufBuilder::new();
        b.push_back_field(t.field_id("h", "b").unwrap(), 12);
        let calc = Calculation::new("c", 0, "crc16", b, hash::crc16);
        let first = calc.compute(&pkt);
        assert_eq!(first, hash::crc16(&[0xbc, 0xd0]));
        let fid = t.field_id("h", "b").unwrap();
        pkt.phv.field_mut(fid).unwrap().set(Data(0x123));
        assert_ne!(calc.compute(&pkt), first);
    }
}
