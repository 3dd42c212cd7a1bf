// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The pisactl configuration file.
//!
//! A TOML document holding the [`SwitchConfig`] plus the control-plane
//! state to install once a program is loaded:
//!
//! ```toml
//! [switch]
//! lag_hash = "flow_hash"
//!
//! [[entries]]
//! table = "ipv4_lpm"
//! key = ["0x0a000000/8"]
//! action = "set_egress"
//! data = ["0x3"]
//!
//! [[lags]]
//! id = 4
//! ports = [10, 11, 12]
//!
//! [[groups]]
//! mgid = 7
//! nodes = [{ rid = 1, ports = [1, 2], lags = [4] }]
//! ```
//!
//! Key elements are hex strings: `value` for exact, `value/len` for LPM,
//! `value&&&mask` for ternary, and `true` or `false` for validity.

use anyhow::Context;
use anyhow::anyhow;
use anyhow::bail;
use pisa::api::LagId;
use pisa::api::LagMap;
use pisa::api::MatchKind;
use pisa::api::MatchParam;
use pisa::api::McGrpId;
use pisa::api::PortMap;
use pisa::api::Rid;
use pisa::engine::Switch;
use pisa::engine::SwitchConfig;
use pisa::engine::data::Data;
use pisa::engine::data::hexstr_to_width;
use pisa::engine::table::MatchTable;
use pisa::time::Ttl;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CtlConfig {
    pub switch: SwitchConfig,
    pub entries: Vec<EntryCfg>,
    pub defaults: Vec<DefaultCfg>,
    pub lags: Vec<LagCfg>,
    pub groups: Vec<GroupCfg>,
}

#[derive(Debug, Deserialize)]
pub struct EntryCfg {
    pub table: String,
    pub key: Vec<String>,
    #[serde(default)]
    pub priority: u32,
    pub action: String,
    #[serde(default)]
    pub data: Vec<String>,
    /// Idle timeout, for tables that support one.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct DefaultCfg {
    pub table: String,
    pub action: String,
    #[serde(default)]
    pub data: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LagCfg {
    pub id: LagId,
    pub ports: Vec<usize>,
}

#[derive(Debug, Deserialize)]
pub struct GroupCfg {
    pub mgid: McGrpId,
    #[serde(default)]
    pub nodes: Vec<NodeCfg>,
}

#[derive(Debug, Deserialize)]
pub struct NodeCfg {
    pub rid: Rid,
    #[serde(default)]
    pub ports: Vec<usize>,
    #[serde(default)]
    pub lags: Vec<usize>,
}

fn action_data(data: &[String]) -> anyhow::Result<Vec<Data>> {
    data.iter()
        .map(|d| Data::from_hexstr(d).map_err(anyhow::Error::from))
        .collect()
}

fn port_map(ports: &[usize]) -> anyhow::Result<PortMap> {
    let mut map = PortMap::new();
    for p in ports {
        if !map.set(*p) {
            bail!("port {p} out of range");
        }
    }
    Ok(map)
}

fn lag_map(lags: &[usize]) -> anyhow::Result<LagMap> {
    let mut map = LagMap::new();
    for l in lags {
        if !map.set(*l) {
            bail!("LAG {l} out of range");
        }
    }
    Ok(map)
}

/// Parse the textual key of an entry against the key layout of `table`.
pub fn parse_key(
    table: &MatchTable,
    key: &[String],
) -> anyhow::Result<Vec<MatchParam>> {
    let elems = table.key().elems();
    if elems.len() != key.len() {
        bail!(
            "table {} takes {} key elements, got {}",
            table.name,
            elems.len(),
            key.len()
        );
    }

    let mut params = Vec::with_capacity(key.len());
    for (elem, s) in elems.iter().zip(key) {
        let nbytes = elem.nbytes();
        let p = match elem.kind() {
            MatchKind::Exact => MatchParam::Exact(hexstr_to_width(s, nbytes)?),
            MatchKind::Lpm => {
                let (value, len) = s
                    .split_once('/')
                    .ok_or_else(|| anyhow!("expected value/len: {s}"))?;
                MatchParam::Lpm {
                    value: hexstr_to_width(value, nbytes)?,
                    prefix_len: len
                        .parse()
                        .with_context(|| format!("bad prefix length: {s}"))?,
                }
            }
            MatchKind::Ternary => {
                let (value, mask) = s
                    .split_once("&&&")
                    .ok_or_else(|| anyhow!("expected value&&&mask: {s}"))?;
                MatchParam::Ternary {
                    value: hexstr_to_width(value, nbytes)?,
                    mask: hexstr_to_width(mask, nbytes)?,
                }
            }
            MatchKind::Valid => MatchParam::Valid(
                s.parse().with_context(|| format!("bad validity: {s}"))?,
            ),
        };
        params.push(p);
    }
    Ok(params)
}

impl CtlConfig {
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&s)
            .with_context(|| format!("parsing {}", path.display()))
    }

    /// Install the configured control-plane state into `sw`, which must
    /// have a program loaded.
    pub fn apply(&self, sw: &Switch) -> anyhow::Result<()> {
        let prog = sw.program().ok_or_else(|| anyhow!("no program loaded"))?;
        let table = |name: &str| {
            prog.table(name).ok_or_else(|| anyhow!("no table named {name}"))
        };

        for d in &self.defaults {
            table(&d.table)?
                .set_default_action(&d.action, &action_data(&d.data)?)
                .with_context(|| format!("default action of {}", d.table))?;
        }

        for e in &self.entries {
            let t = table(&e.table)?;
            let params = parse_key(t, &e.key)?;
            let data = action_data(&e.data)?;
            let hdl = t
                .add_entry(&params, e.priority, &e.action, &data)
                .with_context(|| format!("adding entry to {}", e.table))?;
            if let Some(secs) = e.ttl_secs {
                t.set_entry_ttl(hdl, Ttl::new_seconds(secs))?;
            }
        }

        let pre = sw.pre();
        for g in &self.groups {
            let grp = pre.mc_mgrp_create(g.mgid)?;
            for n in &g.nodes {
                let node = pre.mc_node_create(
                    n.rid,
                    &port_map(&n.ports)?,
                    &lag_map(&n.lags)?,
                )?;
                pre.mc_node_associate(grp, node)?;
            }
        }

        for l in &self.lags {
            pre.mc_set_lag_membership(l.id, &port_map(&l.ports)?)?;
        }

        Ok(())
    }
}
