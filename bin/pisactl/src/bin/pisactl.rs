// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use std::fs;
use std::fs::File;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use clap::Parser;
use slog::Logger;
use slog::debug;
use slog::warn;

use pisa::api::API_VERSION;
use pisa::api::HexBytes;
use pisa::api::MAJOR_VERSION;
use pisa::api::PortNum;
use pisa::engine::Switch;
use pisa::engine::SwitchError;
use pisa::engine::data::hexstr_to_bytes;
use pisa::print::print_lags;
use pisa::print::print_mgrps;
use pisa::print::print_program;
use pisa::print::print_table;
use pisa::time::Moment;
use pisactl::CtlConfig;
use pisactl::pcap::PcapWriter;
use pisactl::pcap::read_frames;

/// Load, inspect, and exercise packet pipeline programs
#[derive(Debug, Parser)]
#[command(version, about)]
enum Command {
    /// Check that an IR document loads. Exits with the load status on
    /// failure.
    Validate {
        #[command(flatten)]
        prog: ProgArgs,
    },

    /// Print a summary of the headers, parser, and pipelines of a program.
    Dump {
        #[command(flatten)]
        prog: ProgArgs,
    },

    /// Run frames through a program and report what leaves the switch.
    Run {
        #[command(flatten)]
        prog: ProgArgs,

        /// Port the frames arrive on.
        #[arg(short, long, default_value_t = 0)]
        port: PortNum,

        /// Read frames from a capture file.
        #[arg(long)]
        pcap: Option<PathBuf>,

        /// A frame as a hex string. May be repeated.
        #[arg(long)]
        hex: Vec<String>,

        /// Write every egress frame to a capture file.
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Print every table once all frames have run.
        #[arg(long)]
        dump_tables: bool,

        /// Sweep for idle entries this many seconds after the last frame.
        #[arg(long)]
        age_after: Option<u64>,
    },

    /// Print every table after applying the configuration.
    Tables {
        #[command(flatten)]
        prog: ProgArgs,
    },

    /// Print LAG membership and multicast groups after applying the
    /// configuration.
    Replication {
        #[command(flatten)]
        prog: ProgArgs,
    },

    /// Print the control API version.
    ApiVersion,
}

#[derive(Debug, Args)]
struct ProgArgs {
    /// The IR document.
    ir: PathBuf,

    /// A TOML switch configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<CtlConfig> {
    match path {
        Some(p) => CtlConfig::load(p),
        None => Ok(CtlConfig::default()),
    }
}

/// Build a switch, load the program, and install the configured state.
fn build_switch(log: &Logger, args: &ProgArgs) -> anyhow::Result<Switch> {
    let cfg = load_config(args.config.as_deref())?;
    let sw = Switch::new(cfg.switch.clone(), pisactl::providers(log));
    let json = fs::read_to_string(&args.ir)
        .with_context(|| format!("reading {}", args.ir.display()))?;
    if let Err(e) = sw.load_json(&json) {
        eprintln!("failed to load {}: {e}", args.ir.display());
        std::process::exit(e.status());
    }
    cfg.apply(&sw)?;
    Ok(sw)
}

fn run(
    log: &Logger,
    sw: &Switch,
    port: PortNum,
    frames: Vec<Vec<u8>>,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let mut cap = match out {
        Some(p) => {
            let f = File::create(p)
                .with_context(|| format!("creating {}", p.display()))?;
            Some(PcapWriter::new(BufWriter::new(f))?)
        }
        None => None,
    };

    for (i, frame) in frames.iter().enumerate() {
        debug!(log, "frame in"; "idx" => i, "data" => %HexBytes(frame));
        let copies = match sw.process(port, frame) {
            Ok(copies) => copies,
            Err(SwitchError::Parse(e)) => {
                warn!(log, "frame {} not parsed: {}", i, e);
                println!("frame {i}: parse error");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if copies.is_empty() {
            println!("frame {i}: dropped");
        }
        for c in &copies {
            println!(
                "frame {i}: port {} rid {} len {}",
                c.port,
                c.rid,
                c.bytes.len()
            );
            if let Some(cap) = cap.as_mut() {
                cap.add_frame(&c.bytes)?;
            }
        }
    }

    if let Some(cap) = cap {
        cap.into_inner().flush()?;
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let log = pisactl::logger();
    let cmd = Command::parse();

    match cmd {
        Command::Validate { prog } => {
            build_switch(&log, &prog)?;
            println!("{}: ok", prog.ir.display());
        }

        Command::Dump { prog } => {
            let sw = build_switch(&log, &prog)?;
            if let Some(p) = sw.program() {
                print_program(&p)?;
            }
        }

        Command::Run { prog, port, pcap, hex, out, dump_tables, age_after } => {
            let sw = build_switch(&log, &prog)?;

            let mut frames = vec![];
            if let Some(path) = pcap {
                let bytes = fs::read(&path)
                    .with_context(|| format!("reading {}", path.display()))?;
                frames.extend(read_frames(&bytes)?);
            }
            for h in &hex {
                frames.push(hexstr_to_bytes(h)?);
            }

            run(&log, &sw, port, frames, out.as_deref())?;

            if let Some(secs) = age_after {
                let n = sw.sweep_ageing(Moment::now().add_millis(secs * 1000));
                println!("{n} idle entries");
            }

            if let Some(p) = sw.program() {
                p.learn().flush_all();
                if dump_tables {
                    for t in p.tables() {
                        print_table(&t.dump())?;
                    }
                }
            }
        }

        Command::Tables { prog } => {
            let sw = build_switch(&log, &prog)?;
            if let Some(p) = sw.program() {
                for t in p.tables() {
                    print_table(&t.dump())?;
                }
            }
        }

        Command::Replication { prog } => {
            let sw = build_switch(&log, &prog)?;
            print_lags(&sw.pre().lag_dump())?;
            println!();
            print_mgrps(&sw.pre().mgrp_dump())?;
        }

        Command::ApiVersion => {
            println!("package: {MAJOR_VERSION}");
            println!("api: {API_VERSION}");
        }
    }

    Ok(())
}
