// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Match keys.
//!
//! A table's key is the concatenation, in declaration order, of one
//! byte string per key element: a field contributes its wire bytes
//! (`ceil(bits / 8)`, right-aligned), and a header validity check
//! contributes one byte holding 0 or 1. The width of a key therefore
//! never depends on field values.

use super::bits;
use super::phv::FieldId;
use super::phv::HeaderId;
use super::phv::Phv;
use crate::api::MatchKind;
use crate::api::MatchParam;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MatchKeyElem {
    Field { field: FieldId, bits: u32, kind: MatchKind },
    Valid { header: HeaderId },
}

impl MatchKeyElem {
    pub fn nbytes(&self) -> usize {
        match self {
            Self::Field { bits, .. } => bits::nbytes_for(*bits as usize),
            Self::Valid { .. } => 1,
        }
    }

    pub fn kind(&self) -> MatchKind {
        match self {
            Self::Field { kind, .. } => *kind,
            Self::Valid { .. } => MatchKind::Valid,
        }
    }
}

/// How entries of a table are matched as a whole.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchUnitKind {
    /// Every element is exact or valid: a hash lookup.
    Exact,
    /// Longest prefix wins.
    Lpm,
    /// Lowest priority value wins.
    Ternary,
}

/// A key in entry form: bytes with the mask already applied, the mask
/// itself, and the total prefix length of its LPM elements.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EntryKey {
    pub key: Vec<u8>,
    pub mask: Vec<u8>,
    pub prefix_len: u32,
}

impl EntryKey {
    /// Does the packet key `pkt_key` fall under this entry?
    pub fn matches(&self, pkt_key: &[u8]) -> bool {
        pkt_key.len() == self.key.len()
            && pkt_key
                .iter()
                .zip(self.mask.iter())
                .zip(self.key.iter())
                .all(|((p, m), k)| p & m == *k)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MatchKeyBuilder {
    elems: Vec<MatchKeyElem>,
}

impl MatchKeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back_field(
        &mut self,
        field: FieldId,
        bits: u32,
        kind: MatchKind,
    ) {
        self.elems.push(MatchKeyElem::Field { field, bits, kind });
    }

    pub fn push_back_valid_header(&mut self, header: HeaderId) {
        self.elems.push(MatchKeyElem::Valid { header });
    }

    pub fn elems(&self) -> &[MatchKeyElem] {
        &self.elems
    }

    /// Width of the key in bytes.
    pub fn key_len(&self) -> usize {
        self.elems.iter().map(MatchKeyElem::nbytes).sum()
    }

    /// Build the lookup key for a packet.
    pub fn build(&self, phv: &Phv) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.key_len());
        for e in &self.elems {
            match e {
                MatchKeyElem::Field { field, .. } => {
                    key.extend_from_slice(phv.field(*field).bytes());
                }
                MatchKeyElem::Valid { header } => {
                    key.push(u8::from(phv.header(*header).is_valid()));
                }
            }
        }
        key
    }

    /// The match unit implied by the key elements. A table with no
    /// element that settles it falls back to `fallback`.
    pub fn unit_kind(&self, fallback: Option<MatchKind>) -> MatchUnitKind {
        let kinds = self.elems.iter().map(MatchKeyElem::kind);
        let mut unit = match fallback {
            Some(MatchKind::Lpm) => MatchUnitKind::Lpm,
            Some(MatchKind::Ternary) => MatchUnitKind::Ternary,
            _ => MatchUnitKind::Exact,
        };

        if !self.elems.is_empty() {
            unit = MatchUnitKind::Exact;
        }
        for k in kinds {
            match k {
                MatchKind::Ternary => unit = MatchUnitKind::Ternary,
                MatchKind::Lpm if unit == MatchUnitKind::Exact => {
                    unit = MatchUnitKind::Lpm
                }
                _ => (),
            }
        }
        unit
    }

    /// Convert control-plane match parameters into an entry key.
    pub fn entry_key(&self, params: &[MatchParam]) -> Result<EntryKey, String> {
        if params.len() != self.elems.len() {
            return Err(format!(
                "expected {} key elements, got {}",
                self.elems.len(),
                params.len()
            ));
        }

        let mut out = EntryKey {
            key: Vec::with_capacity(self.key_len()),
            mask: Vec::with_capacity(self.key_len()),
            prefix_len: 0,
        };

        for (i, (e, p)) in self.elems.iter().zip(params).enumerate() {
            let nbytes = e.nbytes();
            let check = |v: &[u8]| {
                if v.len() == nbytes {
                    Ok(())
                } else {
                    Err(format!(
                        "key element {i}: expected {nbytes} bytes, got {}",
                        v.len()
                    ))
                }
            };

            let (value, mask) = match (e, p) {
                (MatchKeyElem::Valid { .. }, MatchParam::Valid(v)) => {
                    (vec![u8::from(*v)], vec![0xFF])
                }

                (
                    MatchKeyElem::Field { kind: MatchKind::Exact, .. },
                    MatchParam::Exact(v),
                ) => {
                    check(v)?;
                    (v.clone(), vec![0xFF; nbytes])
                }

                (
                    MatchKeyElem::Field { kind: MatchKind::Lpm, bits, .. },
                    MatchParam::Lpm { value, prefix_len },
                ) => {
                    check(value)?;
                    if *prefix_len > *bits {
                        return Err(format!(
                            "key element {i}: prefix {prefix_len} longer \
                             than {bits} bits"
                        ));
                    }
                    let mut mask = vec![0u8; nbytes];
                    let pad = nbytes * 8 - *bits as usize;
                    let ones = vec![0xFF; nbytes];
                    let plen = *prefix_len as usize;
                    bits::deposit_bits(&mut mask, pad, plen, &ones);
                    out.prefix_len += prefix_len;
                    (value.clone(), mask)
                }

                (
                    MatchKeyElem::Field { kind: MatchKind::Ternary, .. },
                    MatchParam::Ternary { value, mask },
                ) => {
                    check(value)?;
                    check(mask)?;
                    (value.clone(), mask.clone())
                }

                _ => {
                    return Err(format!(
                        "key element {i}: expected a {} parameter",
                        e.kind()
                    ));
                }
            };

            out.key.extend(value.iter().zip(&mask).map(|(v, m)| v & m));
            out.mask.extend_from_slice(&mask);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fid(h: usize, f: usize) -> FieldId {
        FieldId { header: HeaderId(h), field: f }
    }

    #[test]
    fn unit_kind_from_elements() {
        let mut b = MatchKeyBuilder::new();
        let ternary = Some(MatchKind::Ternary);
        assert_eq!(b.unit_kind(ternary), MatchUnitKind::Ternary);
        assert_eq!(b.unit_kind(None), MatchUnitKind::Exact);

        b.push_back_field(fid(0, 0), 16, MatchKind::Exact);
        b.push_back_valid_header(HeaderId(1));
        assert_eq!(b.unit_kind(Some(MatchKind::Ternary)), MatchUnitKind::Exact);

        b.push_back_field(fid(0, 1), 32, MatchKind::Lpm);
        assert_eq!(b.unit_kind(None), MatchUnitKind::Lpm);

        b.push_back_field(fid(0, 2), 8, MatchKind::Ternary);
        assert_eq!(b.unit_kind(None), MatchUnitKind::Ternary);
        assert_eq!(b.key_len(), 2 + 1 + 4 + 1);
    }

    #[test]
    fn lpm_mask_accounts_for_padding() {
        let mut b = MatchKeyBuilder::new();
        b.push_back_field(fid(0, 0), 12, MatchKind::Lpm);
        let p = MatchParam::Lpm { value: vec![0x0a, 0xbc], prefix_len: 4 };
        let ek = b.entry_key(&[p]).unwrap();
        assert_eq!(ek.mask, vec![0x0f, 0x00]);
        assert_eq!(ek.key, vec![0x0a, 0x00]);
        assert_eq!(ek.prefix_len, 4);
        assert!(ek.matches(&[0x0a, 0xff]));
        assert!(!ek.matches(&[0x0b, 0x00]));
    }

    #[test]
    fn bad_params() {
        let mut b = MatchKeyBuilder::new();
        b.push_back_field(fid(0, 0), 16, MatchKind::Exact);
        assert!(b.entry_key(&[]).is_err());
        assert!(b.entry_key(&[MatchParam::Exact(vec![1])]).is_err());
        assert!(b.entry_key(&[MatchParam::Valid(true)]).is_err());
        assert!(b.entry_key(&[MatchParam::Exact(vec![1, 2])]).is_ok());
    }
}
