// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Types shared between the pisa engine and its consumers: the load-time
//! IR document, control-plane request types, and dump types.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod ir;
pub mod mc;
pub mod table;

pub use ir::*;
pub use mc::*;
pub use table::*;

/// The overall version of the API. Anytime an API is added, removed,
/// or modified, this number should increment.
pub const API_VERSION: u64 = 3;

/// Major version of the pisa package.
pub const MAJOR_VERSION: u64 = 0;

/// An egress or ingress port number.
pub type PortNum = u16;

/// The port number that signals "drop this packet" when written to the
/// egress specification.
pub const DROP_PORT: PortNum = 511;

/// Which half of the switch a pipeline belongs to.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Stage {
    Ingress,
    Egress,
}

impl core::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ingress" => Ok(Stage::Ingress),
            "egress" => Ok(Stage::Egress),
            _ => Err(format!("invalid stage: {}", s)),
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Stage::Ingress => "INGRESS",
            Stage::Egress => "EGRESS",
        };

        write!(f, "{}", s)
    }
}
