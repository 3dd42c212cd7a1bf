// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The packet-processing engine.
//!
//! Leaf modules describe packets ([`header`], [`phv`], [`packet`]); the
//! middle layer interprets them ([`parser`], [`expr`], [`calc`],
//! [`table`], [`checksum`]); [`loader`] links an IR document into a
//! [`loader::Program`] and [`switch`] runs packets through one.
pub mod action;
pub mod ageing;
pub mod bits;
pub mod calc;
pub mod checksum;
pub mod data;
pub mod deparser;
pub mod expr;
pub mod hash;
pub mod header;
pub mod learn;
pub mod loader;
pub mod match_key;
pub mod packet;
pub mod parser;
pub mod phv;
pub mod pipeline;
pub mod pre;
pub mod primitives;
pub mod stateful;
pub mod switch;
pub mod table;

pub use loader::LoadError;
pub use loader::LoadOptions;
pub use loader::Program;
pub use switch::EgressPacket;
pub use switch::Switch;
pub use switch::SwitchConfig;
pub use switch::SwitchError;
