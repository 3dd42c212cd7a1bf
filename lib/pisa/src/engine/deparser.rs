// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Reassemble a frame from the header vector.

use super::checksum::FieldChecksum;
use super::packet::Packet;
use super::phv::HeaderId;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Deparser {
    pub name: String,
    pub id: u32,
    order: Vec<HeaderId>,
    checksums: Vec<Arc<FieldChecksum>>,
}

impl Deparser {
    pub fn new(name: &str, id: u32, order: Vec<HeaderId>) -> Self {
        Self { name: name.to_string(), id, order, checksums: vec![] }
    }

    pub fn order(&self) -> &[HeaderId] {
        &self.order
    }

    pub fn push_back_checksum(&mut self, csum: Arc<FieldChecksum>) {
        self.checksums.push(csum);
    }

    pub fn checksums(&self) -> &[Arc<FieldChecksum>] {
        &self.checksums
    }

    /// Recompute every checksum, then emit the valid headers in order
    /// followed by the payload. Metadata never reaches the wire.
    pub fn deparse(&self, pkt: &mut Packet) -> Vec<u8> {
        for csum in &self.checksums {
            csum.update(pkt);
        }

        let mut out = Vec::with_capacity(pkt.len());
        for id in &self.order {
            let hdr = pkt.phv.header(*id);
            if hdr.is_valid() && !hdr.is_metadata() {
                out.extend_from_slice(&hdr.deparse());
            }
        }
        out.extend_from_slice(pkt.payload());
        out
    }
}
