// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Multicast and link-aggregation types.

use super::PortNum;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// Maximum number of ports addressable by a [`PortMap`].
pub const PRE_PORTS_MAX: usize = 512;

/// Maximum number of LAGs addressable by a [`LagMap`].
pub const LAG_MAX_ENTRIES: usize = 256;

/// A multicast group identifier.
pub type McGrpId = u16;

/// A LAG identifier.
pub type LagId = u16;

/// A replication identifier, attached to each copy of a packet.
pub type Rid = u16;

/// Handle to a multicast group.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct MgrpHdl(pub u32);

/// Handle to a level-1 replication node.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct L1Hdl(pub u32);

/// A fixed-width bitmap of `W * 64` bits.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BitMap<const W: usize> {
    #[serde(with = "words")]
    words: [u64; W],
}

impl<const W: usize> Default for BitMap<W> {
    fn default() -> Self {
        Self { words: [0; W] }
    }
}

impl<const W: usize> BitMap<W> {
    pub const BITS: usize = W * 64;

    pub fn new() -> Self {
        Self::default()
    }

    /// Set bit `idx`; returns `false` if `idx` is out of range.
    pub fn set(&mut self, idx: usize) -> bool {
        if idx >= Self::BITS {
            return false;
        }

        self.words[idx / 64] |= 1u64 << (idx % 64);
        true
    }

    pub fn clear(&mut self, idx: usize) {
        if idx < Self::BITS {
            self.words[idx / 64] &= !(1u64 << (idx % 64));
        }
    }

    pub fn test(&self, idx: usize) -> bool {
        idx < Self::BITS && (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Iterate over the set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..Self::BITS).filter(move |idx| self.test(*idx))
    }

    /// Return the `n`th set bit, counting from zero in ascending order.
    pub fn nth_set(&self, n: usize) -> Option<usize> {
        let mut remaining = n;
        for (w_idx, word) in self.words.iter().enumerate() {
            let ones = word.count_ones() as usize;
            if remaining >= ones {
                remaining -= ones;
                continue;
            }

            let mut w = *word;
            for _ in 0..remaining {
                // Clear the lowest set bit.
                w &= w - 1;
            }
            return Some(w_idx * 64 + w.trailing_zeros() as usize);
        }

        None
    }
}

impl<const W: usize> FromIterator<usize> for BitMap<W> {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut map = Self::new();
        for idx in iter {
            map.set(idx);
        }
        map
    }
}

impl<const W: usize> Display for BitMap<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        write!(f, "{{")?;
        for idx in self.iter() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{idx}")?;
            first = false;
        }
        write!(f, "}}")
    }
}

// Serde only derives arrays up to 32 elements and not for const generic
// lengths, so go through a slice.
mod words {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;
    use serde::de::Error;

    pub fn serialize<S, const W: usize>(
        words: &[u64; W],
        ser: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ser.collect_seq(words.iter())
    }

    pub fn deserialize<'de, D, const W: usize>(
        de: D,
    ) -> Result<[u64; W], D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Vec::<u64>::deserialize(de)?;
        let len = v.len();
        v.try_into().map_err(|_| D::Error::invalid_length(len, &"bitmap words"))
    }
}

/// Set of egress ports.
pub type PortMap = BitMap<{ PRE_PORTS_MAX / 64 }>;

/// Set of LAG identifiers.
pub type LagMap = BitMap<{ LAG_MAX_ENTRIES / 64 }>;

/// Input to the replication engine for one packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct McIn {
    /// The multicast group to replicate to.
    pub mgid: McGrpId,
    /// A value derived from the packet which is stable for the life of a
    /// flow. It drives LAG member selection.
    pub flow_hash: u64,
}

/// One copy produced by the replication engine.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct McOut {
    pub egress_port: PortNum,
    pub rid: Rid,
}

/// The dumped state of a LAG.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LagEntryDump {
    pub lag_id: LagId,
    pub member_count: u16,
    pub members: PortMap,
}

/// The dumped state of a level-1 node.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct McNodeDump {
    pub handle: L1Hdl,
    pub rid: Rid,
    pub ports: PortMap,
    pub lags: LagMap,
}

/// The dumped state of a multicast group.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct McGroupDump {
    pub handle: MgrpHdl,
    pub mgid: McGrpId,
    pub nodes: Vec<McNodeDump>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nth_set_walks_words() {
        let map: PortMap = [3, 64, 65, 511].into_iter().collect();
        assert_eq!(map.count(), 4);
        assert_eq!(map.nth_set(0), Some(3));
        assert_eq!(map.nth_set(1), Some(64));
        assert_eq!(map.nth_set(2), Some(65));
        assert_eq!(map.nth_set(3), Some(511));
        assert_eq!(map.nth_set(4), None);
    }

    #[test]
    fn out_of_range() {
        let mut map = LagMap::new();
        assert!(!map.set(LAG_MAX_ENTRIES));
        assert!(map.is_empty());
        assert!(!map.test(LAG_MAX_ENTRIES + 1));
    }

    #[test]
    fn display() {
        let map: LagMap = [1, 7].into_iter().collect();
        assert_eq!(map.to_string(), "{1,7}");
    }
}
