// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Route engine logs, learned samples, and ageing notifications to slog.

use pisa::api::EntryHdl;
use pisa::api::HexBytes;
use pisa::provider::AgeingWriter;
use pisa::provider::LearnWriter;
use pisa::provider::LogLevel;
use pisa::provider::LogProvider;
use pisa::provider::Providers;
use slog::Drain;
use slog::Logger;
use slog::error;
use slog::info;
use slog::o;
use slog::warn;
use std::sync::Arc;

/// Build the root logger. Filtering follows `RUST_LOG`.
pub fn logger() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("component" => "pisactl"))
}

/// Providers that log everything through `log`.
pub fn providers(log: &Logger) -> Providers {
    Providers {
        log: Box::new(SlogProvider { log: log.new(o!("unit" => "engine")) }),
        learn: Arc::new(SlogLearn { log: log.new(o!("unit" => "learn")) }),
        ageing: Arc::new(SlogAgeing { log: log.new(o!("unit" => "ageing")) }),
    }
}

pub struct SlogProvider {
    log: Logger,
}

impl LogProvider for SlogProvider {
    fn log(&self, level: LogLevel, msg: &str) {
        match level {
            LogLevel::Note => info!(self.log, "{}", msg),
            LogLevel::Warn => warn!(self.log, "{}", msg),
            LogLevel::Error => error!(self.log, "{}", msg),
        }
    }
}

pub struct SlogLearn {
    log: Logger,
}

impl LearnWriter for SlogLearn {
    fn send(&self, list_id: u32, buffer: &[u8], nsamples: usize) {
        info!(
            self.log,
            "learned samples";
            "list" => list_id,
            "samples" => nsamples,
            "data" => %HexBytes(buffer)
        );
    }
}

pub struct SlogAgeing {
    log: Logger,
}

impl AgeingWriter for SlogAgeing {
    fn send(&self, table_id: u32, table_name: &str, entries: &[EntryHdl]) {
        let handles: Vec<u32> = entries.iter().map(|h| h.0).collect();
        info!(
            self.log,
            "idle entries";
            "table" => table_name,
            "table_id" => table_id,
            "entries" => ?handles
        );
    }
}
