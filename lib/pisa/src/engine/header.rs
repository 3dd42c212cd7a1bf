// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Header types, and the per-packet header and field instances built
//! from them.

use super::bits;
use super::data::Data;
use std::sync::Arc;

/// One field of a [`HeaderType`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub bits: u32,
    /// Bit offset of the field from the start of the header.
    pub offset: u32,
}

/// A named, ordered bit-field layout.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeaderType {
    pub name: String,
    pub id: u32,
    fields: Vec<FieldSpec>,
    bits: u32,
}

impl HeaderType {
    pub fn new(name: &str, id: u32, fields: &[(String, u32)]) -> Self {
        let mut offset = 0;
        let fields = fields
            .iter()
            .map(|(name, bits)| {
                let spec =
                    FieldSpec { name: name.clone(), bits: *bits, offset };
                offset += bits;
                spec
            })
            .collect();

        Self { name: name.to_string(), id, fields, bits: offset }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Position of the named field within the header.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn bit_width(&self) -> u32 {
        self.bits
    }

    /// Width of the header on the wire, in bytes.
    pub fn byte_width(&self) -> usize {
        bits::nbytes_for(self.bits as usize)
    }
}

/// Storage for one field of one packet.
///
/// The wire representation (a right-aligned big-endian byte string) is
/// always authoritative. Fields flagged arithmetic additionally keep
/// their integer value decoded so that instructions do not have to
/// convert on every read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Field {
    nbits: u32,
    bytes: Vec<u8>,
    arith: bool,
    value: u128,
}

impl Field {
    pub fn new(nbits: u32) -> Self {
        Self {
            nbits,
            bytes: vec![0; bits::nbytes_for(nbits as usize)],
            arith: false,
            value: 0,
        }
    }

    pub fn nbits(&self) -> u32 {
        self.nbits
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_arith(&self) -> bool {
        self.arith
    }

    pub fn set_arith(&mut self, arith: bool) {
        self.arith = arith;
        if arith {
            self.value = bits::be_to_u128(&self.bytes);
        }
    }

    pub fn get(&self) -> Data {
        if self.arith {
            Data(self.value)
        } else {
            Data(bits::be_to_u128(&self.bytes))
        }
    }

    /// Store `v`, truncated to the width of the field.
    pub fn set(&mut self, v: Data) {
        let v = v.get() & bits::width_mask(self.nbits);
        self.bytes = bits::u128_to_be(v, self.bytes.len());
        if self.arith {
            self.value = v;
        }
    }

    /// Store a right-aligned big-endian value, truncated or zero-extended
    /// to the width of the field.
    pub fn set_bytes(&mut self, src: &[u8]) {
        let len = self.bytes.len();
        self.bytes = super::data::fit_to_width(src, len);
        bits::mask_to_width(&mut self.bytes, self.nbits as usize);
        if self.arith {
            self.value = bits::be_to_u128(&self.bytes);
        }
    }
}

/// One header instance in a packet's field vector.
#[derive(Clone, Debug)]
pub struct Header {
    name: Arc<str>,
    htype: Arc<HeaderType>,
    metadata: bool,
    valid: bool,
    fields: Vec<Field>,
}

impl Header {
    pub fn new(name: &str, htype: Arc<HeaderType>, metadata: bool) -> Self {
        let fields =
            htype.fields().iter().map(|f| Field::new(f.bits)).collect();

        // Metadata is never parsed, so it is always valid.
        Self { name: name.into(), htype, metadata, valid: metadata, fields }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header_type(&self) -> &HeaderType {
        &self.htype
    }

    pub fn is_metadata(&self) -> bool {
        self.metadata
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn mark_valid(&mut self) {
        self.valid = true;
    }

    pub fn mark_invalid(&mut self) {
        if !self.metadata {
            self.valid = false;
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn field_mut(&mut self, idx: usize) -> Option<&mut Field> {
        self.fields.get_mut(idx)
    }

    /// Zero every field, leaving validity untouched.
    pub fn reset(&mut self) {
        for f in &mut self.fields {
            f.set(Data(0));
        }
    }

    /// Copy the header from the start of `buf`, returning the number of
    /// bytes consumed, or `None` if `buf` is too short.
    pub fn extract(&mut self, buf: &[u8]) -> Option<usize> {
        let len = self.htype.byte_width();
        if buf.len() < len {
            return None;
        }

        for (field, spec) in self.fields.iter_mut().zip(self.htype.fields()) {
            let v = bits::extract_bits(
                buf,
                spec.offset as usize,
                spec.bits as usize,
            );
            field.set_bytes(&v);
        }

        self.valid = true;
        Some(len)
    }

    /// Serialize the header to its wire image.
    pub fn deparse(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.htype.byte_width()];
        for (field, spec) in self.fields.iter().zip(self.htype.fields()) {
            bits::deposit_bits(
                &mut out,
                spec.offset as usize,
                spec.bits as usize,
                field.bytes(),
            );
        }
        out
    }

    /// Copy the validity and field values of `other`, which must share
    /// this header's type.
    pub fn copy_from(&mut self, other: &Header) {
        for (dst, src) in self.fields.iter_mut().zip(other.fields.iter()) {
            dst.set_bytes(src.bytes());
        }
        self.valid = other.valid || self.metadata;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ipv4_type() -> HeaderType {
        let fields: Vec<(String, u32)> = [
            ("version", 4),
            ("ihl", 4),
            ("diffserv", 8),
            ("totalLen", 16),
            ("identification", 16),
            ("flags", 3),
            ("fragOffset", 13),
            ("ttl", 8),
            ("protocol", 8),
            ("hdrChecksum", 16),
            ("srcAddr", 32),
            ("dstAddr", 32),
        ]
        .iter()
        .map(|(n, b)| (n.to_string(), *b))
        .collect();
        HeaderType::new("ipv4_t", 1, &fields)
    }

    #[test]
    fn layout() {
        let ht = ipv4_type();
        assert_eq!(ht.bit_width(), 160);
        assert_eq!(ht.byte_width(), 20);
        assert_eq!(ht.field_index("ttl"), Some(7));
        assert_eq!(ht.fields()[6].offset, 51);
    }

    #[test]
    fn extract_then_deparse() {
        let wire = [
            0x45, 0x00, 0x00, 0x34, 0x70, 0x90, 0x40, 0x00, 0x40, 0x06,
            0x35, 0x08, 0x0a, 0x36, 0xc1, 0x21, 0x4e, 0x28, 0x7b, 0xac,
        ];
        let mut hdr = Header::new("ipv4", Arc::new(ipv4_type()), false);
        assert!(!hdr.is_valid());
        assert_eq!(hdr.extract(&wire), Some(20));
        assert!(hdr.is_valid());
        assert_eq!(hdr.field(0).unwrap().get(), Data(4));
        assert_eq!(hdr.field(5).unwrap().get(), Data(2));
        assert_eq!(hdr.field(9).unwrap().get(), Data(0x3508));
        assert_eq!(hdr.deparse(), wire.to_vec());
        assert_eq!(hdr.extract(&wire[..19]), None);
    }

    #[test]
    fn arith_field_tracks_writes() {
        let mut f = Field::new(13);
        f.set_arith(true);
        f.set(Data(0xFFFF));
        assert_eq!(f.get(), Data(0x1FFF));
        assert_eq!(f.bytes(), &[0x1F, 0xFF]);
        f.set_bytes(&[0x01]);
        assert_eq!(f.get(), Data(1));
    }

    #[test]
    fn metadata_stays_valid() {
        let mut hdr = Header::new("meta", Arc::new(ipv4_type()), true);
        assert!(hdr.is_valid());
        hdr.mark_invalid();
        assert!(hdr.is_valid());
    }
}
