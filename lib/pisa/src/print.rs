// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print dumps in a human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both pisactl and integration tests.

use crate::api::DumpTableResp;
use crate::api::EntryTargetDump;
use crate::api::LagEntryDump;
use crate::api::McGroupDump;
use crate::engine::loader::Program;
use crate::engine::pipeline::NodeRef;
use itertools::Itertools;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a [`DumpTableResp`].
pub fn print_table(resp: &DumpTableResp) -> std::io::Result<()> {
    print_table_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpTableResp`] into a given writer.
pub fn print_table_into(
    writer: &mut impl Write,
    resp: &DumpTableResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(
        t,
        "Table {} ({}, {}/{})",
        resp.name,
        resp.kind,
        resp.entries.len(),
        resp.max_size
    )?;
    write_hrb(&mut t)?;
    writeln!(t, "HDL\tPRI\tKEY\tTARGET\tPKTS\tBYTES")?;
    for e in &resp.entries {
        let key = e.key.iter().join(", ");
        let target = match &e.target {
            EntryTargetDump::Action { name, data } => {
                format!("{name}({})", data.join(", "))
            }
            EntryTargetDump::Member(m) => format!("member {}", m.0),
            EntryTargetDump::Group(g) => format!("group {}", g.0),
        };
        writeln!(
            t,
            "{}\t{}\t{key}\t{target}\t{}\t{}",
            e.handle.0, e.priority, e.packets, e.bytes
        )?;
    }
    let def = resp.default_action.as_deref().unwrap_or("--");
    writeln!(t, "DEF\t--\t*\t{def}\t--\t--")?;
    t.flush()?;

    if !resp.members.is_empty() {
        writeln!(t, "\nMembers")?;
        write_hr(&mut t)?;
        writeln!(t, "HDL\tACTION")?;
        for m in &resp.members {
            writeln!(t, "{}\t{}({})", m.handle.0, m.action, m.data.join(", "))?;
        }
        t.flush()?;
    }

    if !resp.groups.is_empty() {
        writeln!(t, "\nGroups")?;
        write_hr(&mut t)?;
        writeln!(t, "HDL\tMEMBERS")?;
        for g in &resp.groups {
            let members =
                g.members.iter().map(|(m, w)| format!("{}x{w}", m.0)).join(" ");
            writeln!(t, "{}\t{members}", g.handle.0)?;
        }
        t.flush()?;
    }

    writeln!(t)?;
    t.flush()
}

/// Print LAG membership.
pub fn print_lags(lags: &[LagEntryDump]) -> std::io::Result<()> {
    print_lags_into(&mut std::io::stdout(), lags)
}

/// Print LAG membership into a given writer.
pub fn print_lags_into(
    writer: &mut impl Write,
    lags: &[LagEntryDump],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "LAG\tCOUNT\tMEMBERS")?;
    for l in lags {
        writeln!(t, "{}\t{}\t{}", l.lag_id, l.member_count, l.members)?;
    }
    t.flush()
}

/// Print multicast groups and their nodes.
pub fn print_mgrps(groups: &[McGroupDump]) -> std::io::Result<()> {
    print_mgrps_into(&mut std::io::stdout(), groups)
}

/// Print multicast groups and their nodes into a given writer.
pub fn print_mgrps_into(
    writer: &mut impl Write,
    groups: &[McGroupDump],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "MGID\tNODE\tRID\tPORTS\tLAGS")?;
    for g in groups {
        if g.nodes.is_empty() {
            writeln!(t, "{}\t--\t--\t--\t--", g.mgid)?;
        }
        for n in &g.nodes {
            writeln!(
                t,
                "{}\t{}\t{}\t{}\t{}",
                g.mgid, n.handle.0, n.rid, n.ports, n.lags
            )?;
        }
    }
    t.flush()
}

/// Print a summary of a loaded program.
pub fn print_program(prog: &Program) -> std::io::Result<()> {
    print_program_into(&mut std::io::stdout(), prog)
}

/// Print a summary of a loaded program into a given writer.
pub fn print_program_into(
    writer: &mut impl Write,
    prog: &Program,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Headers")?;
    write_hr(&mut t)?;
    writeln!(t, "NAME\tTYPE\tBITS\tMETADATA")?;
    for h in prog.phv().headers() {
        let ht = h.header_type();
        writeln!(
            t,
            "{}\t{}\t{}\t{}",
            h.name(),
            ht.name,
            ht.bit_width(),
            h.is_metadata()
        )?;
    }
    t.flush()?;

    writeln!(t, "\nParsers")?;
    write_hr(&mut t)?;
    writeln!(t, "NAME\tSTATE\tOPS\tCASES")?;
    for p in prog.parsers() {
        for s in p.states() {
            writeln!(
                t,
                "{}\t{}\t{}\t{}",
                p.name,
                s.name,
                s.ops().len(),
                s.ncases()
            )?;
        }
    }
    t.flush()?;

    writeln!(t, "\nPipelines")?;
    write_hr(&mut t)?;
    writeln!(t, "PIPELINE\tNODE\tKIND")?;
    let graph = prog.graph();
    for p in prog.pipelines() {
        let nodes = graph.reachable(p.init());
        if nodes.is_empty() {
            writeln!(t, "{}\t--\t--", p.name)?;
        }
        for n in nodes {
            let kind = match n {
                NodeRef::Table(i) => graph.tables[i].kind().to_string(),
                NodeRef::Conditional(_) => "conditional".to_string(),
            };
            writeln!(t, "{}\t{}\t{kind}", p.name, graph.node_name(n))?;
        }
    }
    t.flush()?;

    writeln!(t)?;
    t.flush()
}

/// Output a horizontal rule in bold to the given writer.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Output a horizontal rule to the given writer.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
