// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A packet in flight.

use super::phv::Phv;
use crate::api::PortNum;

/// A packet together with its header vector.
///
/// The raw frame is kept for the lifetime of the packet; once parsing
/// completes, everything past `payload_offset` is the payload that the
/// deparser appends after the emitted headers.
#[derive(Clone, Debug)]
pub struct Packet {
    ingress_port: PortNum,
    buf: Vec<u8>,
    payload_offset: usize,
    drop: bool,
    pub phv: Phv,
}

impl Packet {
    pub fn new(ingress_port: PortNum, buf: Vec<u8>, phv: Phv) -> Self {
        Self { ingress_port, buf, payload_offset: 0, drop: false, phv }
    }

    pub fn ingress_port(&self) -> PortNum {
        self.ingress_port
    }

    /// The frame as it was received.
    pub fn buf(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[self.payload_offset.min(self.buf.len())..]
    }

    pub fn payload_offset(&self) -> usize {
        self.payload_offset
    }

    pub fn set_payload_offset(&mut self, off: usize) {
        self.payload_offset = off;
    }

    pub fn mark_to_drop(&mut self) {
        self.drop = true;
    }

    pub fn is_dropped(&self) -> bool {
        self.drop
    }
}
