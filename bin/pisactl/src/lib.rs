// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Support routines for pisactl: logging, switch configuration files,
//! and packet captures.

pub mod config;
pub mod log;
pub mod pcap;

pub use config::CtlConfig;
pub use log::logger;
pub use log::providers;
