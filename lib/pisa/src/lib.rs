// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A software packet-processing pipeline assembled at load time from a
//! declarative IR.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub use pisa_api as api;

pub mod engine;
#[cfg(any(feature = "std", test))]
pub mod print;
pub mod provider;
pub mod sync;
pub mod time;
