// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Moments and time-to-live values.

use core::time::Duration;
use std::time::Instant;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;
/// The number of microseconds in a second.
pub const MICROS: u64 = 1_000_000;

/// A moment in time, as read from a monotonic clock.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Moment {
    inner: Instant,
}

impl Default for Moment {
    fn default() -> Self {
        Self::now()
    }
}

impl Moment {
    pub fn now() -> Self {
        Self { inner: Instant::now() }
    }

    /// Milliseconds elapsed from `earlier` to `self`, saturating at zero.
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        self.inner.saturating_duration_since(earlier.inner).as_millis() as u64
    }

    /// Microseconds elapsed from `earlier` to `self`, saturating at zero.
    pub fn delta_as_micros(&self, earlier: Moment) -> u64 {
        self.inner.saturating_duration_since(earlier.inner).as_micros() as u64
    }

    /// Return the moment `ms` milliseconds after this one.
    pub fn add_millis(&self, ms: u64) -> Moment {
        Moment { inner: self.inner + Duration::from_millis(ms) }
    }
}

/// A time-to-live in milliseconds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Ttl(u64);

impl Ttl {
    /// Does an idle period of `idle_ms` exceed this TTL?
    pub fn is_expired_millis(&self, idle_ms: u64) -> bool {
        idle_ms >= self.0
    }

    /// Create a new TTL based on seconds.
    pub const fn new_seconds(seconds: u64) -> Self {
        Ttl(seconds * MILLIS)
    }

    pub const fn new_millis(ms: u64) -> Self {
        Ttl(ms)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ttl_expiry() {
        let ttl = Ttl::new_seconds(2);
        let start = Moment::now();
        let idle = |ms| start.add_millis(ms).delta_as_millis(start);
        assert!(!ttl.is_expired_millis(idle(1_999)));
        assert!(ttl.is_expired_millis(idle(2_000)));
        assert_eq!(ttl, Ttl::new_millis(2_000));
    }

    #[test]
    fn delta_saturates() {
        let a = Moment::now();
        let b = a.add_millis(5);
        assert_eq!(a.delta_as_millis(b), 0);
        assert_eq!(b.delta_as_micros(a), 5_000);
    }
}
