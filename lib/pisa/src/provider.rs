// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Providers plug host-specific services into the engine: where log
//! messages go, and how learned data and ageing notifications leave the
//! switch. The engine never talks to a transport directly.

use crate::api::EntryHdl;
use std::fmt;
use std::fmt::Display;
use std::sync::Arc;
#[cfg(test)]
use std::sync::Mutex;

/// The set of host-specific providers required by the loader.
pub struct Providers {
    pub log: Box<dyn LogProvider>,
    pub learn: Arc<dyn LearnWriter>,
    pub ageing: Arc<dyn AgeingWriter>,
}

impl Default for Providers {
    fn default() -> Self {
        Self {
            log: Box::new(PrintlnLog),
            learn: Arc::new(NullWriter),
            ageing: Arc::new(NullWriter),
        }
    }
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog;

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// Keeps every message in memory so tests can assert on warnings.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryLog {
    msgs: Mutex<Vec<(LogLevel, String)>>,
}

#[cfg(test)]
impl MemoryLog {
    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        match self.msgs.lock() {
            Ok(msgs) => msgs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[cfg(test)]
impl LogProvider for MemoryLog {
    fn log(&self, level: LogLevel, msg: &str) {
        let mut msgs = match self.msgs.lock() {
            Ok(msgs) => msgs,
            Err(poisoned) => poisoned.into_inner(),
        };
        msgs.push((level, msg.to_string()));
    }
}

impl<L: LogProvider> LogProvider for Arc<L> {
    fn log(&self, level: LogLevel, msg: &str) {
        (**self).log(level, msg)
    }
}

/// Carries learned samples off the switch.
///
/// A buffer holds `nsamples` samples laid back to back; each sample is the
/// concatenation of the learn list's field values.
pub trait LearnWriter: Send + Sync {
    fn send(&self, list_id: u32, buffer: &[u8], nsamples: usize);
}

/// Carries idle-entry notifications off the switch.
pub trait AgeingWriter: Send + Sync {
    fn send(&self, table_id: u32, table_name: &str, entries: &[EntryHdl]);
}

/// Discards everything.
#[derive(Clone, Copy)]
pub struct NullWriter;

impl LearnWriter for NullWriter {
    fn send(&self, _list_id: u32, _buffer: &[u8], _nsamples: usize) {}
}

impl AgeingWriter for NullWriter {
    fn send(&self, _table_id: u32, _table_name: &str, _entries: &[EntryHdl]) {}
}
