// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Hash and checksum functions selectable by name.

use super::checksum::Checksum;
use super::checksum::HeaderChecksum;
use std::collections::BTreeMap;

/// Reduce a byte buffer to a fixed-width value.
pub type HashFn = fn(&[u8]) -> u64;

/// The name of the function used when none, or an unknown one, is named.
pub const DEFAULT_HASH: &str = "xxh64";

/// CRC-16/ARC: reflected polynomial 0x8005, zero initial value, no final
/// xor.
pub fn crc16(buf: &[u8]) -> u64 {
    let mut crc: u16 = 0;
    for b in buf {
        crc ^= u16::from(*b);
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
    }
    u64::from(crc)
}

/// The internet checksum of `buf`, as the value that would be stored in
/// a header.
pub fn csum16(buf: &[u8]) -> u64 {
    let hc = HeaderChecksum::from(Checksum::compute(buf));
    u64::from(u16::from_be_bytes(hc.bytes()))
}

pub fn xxh64(buf: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(buf, 0)
}

pub fn crc32(buf: &[u8]) -> u64 {
    u64::from(crc32fast::hash(buf))
}

/// Name-to-function table for hash algorithms.
///
/// Populated before any program is loaded and only read afterwards.
#[derive(Clone, Debug)]
pub struct HashRegistry {
    fns: BTreeMap<String, HashFn>,
}

impl Default for HashRegistry {
    fn default() -> Self {
        let mut reg = Self { fns: BTreeMap::new() };
        reg.register("crc16", crc16);
        reg.register("csum16", csum16);
        reg.register("xxh64", xxh64);
        reg.register("crc32", crc32);
        reg
    }
}

impl HashRegistry {
    pub fn register(&mut self, name: &str, f: HashFn) {
        self.fns.insert(name.to_string(), f);
    }

    pub fn get(&self, name: &str) -> Option<HashFn> {
        self.fns.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fns.keys().map(String::as_str)
    }
}
