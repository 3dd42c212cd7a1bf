// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Counter, meter, and register arrays.

use super::bits;
use super::data::Data;
use crate::sync::KMutex;
use crate::time::MICROS;
use crate::time::Moment;
use core::str::FromStr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

#[derive(Debug, Default)]
struct CounterCell {
    packets: AtomicU64,
    bytes: AtomicU64,
}

/// An array of packet and byte counters.
#[derive(Debug)]
pub struct CounterArray {
    pub name: String,
    pub id: u32,
    cells: Vec<CounterCell>,
}

impl CounterArray {
    pub fn new(name: &str, id: u32, size: u32) -> Self {
        let cells = (0..size).map(|_| CounterCell::default()).collect();
        Self { name: name.to_string(), id, cells }
    }

    pub fn size(&self) -> usize {
        self.cells.len()
    }

    /// Count one packet of `bytes` bytes. Out-of-range indexes are
    /// ignored.
    pub fn increment(&self, idx: usize, bytes: u64) {
        if let Some(c) = self.cells.get(idx) {
            c.packets.fetch_add(1, Ordering::Relaxed);
            c.bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }

    /// Return `(packets, bytes)` for a cell.
    pub fn read(&self, idx: usize) -> Option<(u64, u64)> {
        self.cells.get(idx).map(|c| {
            (c.packets.load(Ordering::Relaxed), c.bytes.load(Ordering::Relaxed))
        })
    }

    pub fn reset(&self) {
        for c in &self.cells {
            c.packets.store(0, Ordering::Relaxed);
            c.bytes.store(0, Ordering::Relaxed);
        }
    }
}

/// What a meter measures.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MeterType {
    Packets,
    Bytes,
}

impl FromStr for MeterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "packets" => Ok(Self::Packets),
            "bytes" => Ok(Self::Bytes),
            _ => Err(format!("unknown meter type: {s}")),
        }
    }
}

/// The colour returned by a meter. Green is 0; each rate that a packet
/// exceeds moves it one colour further.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Color(pub u32);

impl Color {
    pub const GREEN: Color = Color(0);
    pub const YELLOW: Color = Color(1);
    pub const RED: Color = Color(2);
}

/// A token-bucket rate: `info_rate` units per second with a bucket of
/// `burst_size` units.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MeterRate {
    pub info_rate: u64,
    pub burst_size: u64,
}

#[derive(Clone, Debug)]
struct Bucket {
    rate: MeterRate,
    tokens: u64,
    last: Moment,
}

impl Bucket {
    fn refill(&mut self, now: Moment) {
        let elapsed = now.delta_as_micros(self.last);
        let add = u128::from(elapsed) * u128::from(self.rate.info_rate)
            / u128::from(MICROS);
        if add > 0 {
            let t = u128::from(self.tokens) + add;
            self.tokens = t.min(u128::from(self.rate.burst_size)) as u64;
            self.last = now;
        }
    }
}

#[derive(Clone, Debug, Default)]
struct MeterCell {
    /// Ordered from the lowest rate (committed) to the highest (peak).
    buckets: Vec<Bucket>,
}

/// An array of multi-rate meters.
#[derive(Debug)]
pub struct MeterArray {
    pub name: String,
    pub id: u32,
    pub kind: MeterType,
    rate_count: usize,
    cells: Vec<KMutex<MeterCell>>,
}

impl MeterArray {
    pub fn new(
        name: &str,
        id: u32,
        kind: MeterType,
        rate_count: u32,
        size: u32,
    ) -> Self {
        let cells =
            (0..size).map(|_| KMutex::new(MeterCell::default())).collect();
        Self {
            name: name.to_string(),
            id,
            kind,
            rate_count: rate_count as usize,
            cells,
        }
    }

    pub fn size(&self) -> usize {
        self.cells.len()
    }

    pub fn rate_count(&self) -> usize {
        self.rate_count
    }

    /// Configure the rates of one meter. Returns `false` if the index is
    /// out of range or the wrong number of rates is given.
    pub fn set_rates(
        &self,
        idx: usize,
        rates: &[MeterRate],
        now: Moment,
    ) -> bool {
        let Some(cell) = self.cells.get(idx) else {
            return false;
        };
        if rates.len() != self.rate_count {
            return false;
        }

        cell.lock().buckets = rates
            .iter()
            .map(|r| Bucket { rate: *r, tokens: r.burst_size, last: now })
            .collect();
        true
    }

    /// Meter `units` packets or bytes. Unconfigured meters are green.
    pub fn execute(&self, idx: usize, units: u64, now: Moment) -> Color {
        let Some(cell) = self.cells.get(idx) else {
            return Color::GREEN;
        };
        let mut cell = cell.lock();
        for b in cell.buckets.iter_mut() {
            b.refill(now);
        }

        let color = cell
            .buckets
            .iter()
            .rposition(|b| b.tokens < units)
            .map_or(0, |i| i + 1);

        for b in cell.buckets.iter_mut().skip(color) {
            b.tokens -= units;
        }
        Color(color as u32)
    }

    pub fn reset(&self) {
        for c in &self.cells {
            c.lock().buckets.clear();
        }
    }
}

/// An array of fixed-width registers.
#[derive(Debug)]
pub struct RegisterArray {
    pub name: String,
    pub id: u32,
    bitwidth: u32,
    cells: KMutex<Vec<u128>>,
}

impl RegisterArray {
    pub fn new(name: &str, id: u32, size: u32, bitwidth: u32) -> Self {
        Self {
            name: name.to_string(),
            id,
            bitwidth,
            cells: KMutex::new(vec![0; size as usize]),
        }
    }

    pub fn bitwidth(&self) -> u32 {
        self.bitwidth
    }

    pub fn size(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn read(&self, idx: usize) -> Option<Data> {
        self.cells.lock().get(idx).map(|v| Data(*v))
    }

    /// Store `v` truncated to the register width.
    pub fn write(&self, idx: usize, v: Data) -> bool {
        let mut cells = self.cells.lock();
        match cells.get_mut(idx) {
            Some(cell) => {
                *cell = v.get() & bits::width_mask(self.bitwidth);
                true
            }
            None => false,
        }
    }

    pub fn reset(&self) {
        self.cells.lock().iter_mut().for_each(|c| *c = 0);
    }
}
