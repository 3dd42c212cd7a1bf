// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The packet replication engine with LAG support.
//!
//! A multicast group (identified by its `mgid`) holds an ordered list of
//! level-1 nodes. Each node carries a replication id, a set of plain
//! ports, and a set of LAGs. Replicating a packet to a group emits one
//! copy per port of every node, plus one copy per LAG on a single member
//! port chosen from the packet's flow hash.
//!
//! Groups and nodes live behind one lock, LAG membership behind another.
//! Every path that needs both takes the group lock first.

use crate::api::L1Hdl;
use crate::api::LAG_MAX_ENTRIES;
use crate::api::LagEntryDump;
use crate::api::LagId;
use crate::api::LagMap;
use crate::api::McGroupDump;
use crate::api::McGrpId;
use crate::api::McIn;
use crate::api::McNodeDump;
use crate::api::McOut;
use crate::api::MgrpHdl;
use crate::api::PortMap;
use crate::api::PortNum;
use crate::api::Rid;
use crate::sync::KRwLock;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum McError {
    #[error("multicast group {0} already exists")]
    GroupExists(McGrpId),

    #[error("invalid multicast group handle {0}")]
    InvalidMgrp(u32),

    #[error("invalid node handle {0}")]
    InvalidL1(u32),

    #[error("node {0} is already associated with a group")]
    NodeAssociated(u32),

    #[error("node {node} is not associated with group {mgrp}")]
    NodeNotAssociated { mgrp: u32, node: u32 },

    #[error("LAG index {0} out of range")]
    LagOutOfRange(LagId),
}

#[derive(Clone, Debug)]
struct L1Node {
    rid: Rid,
    ports: PortMap,
    lags: LagMap,
    mgrp: Option<MgrpHdl>,
}

#[derive(Clone, Debug)]
struct Mgrp {
    mgid: McGrpId,
    nodes: Vec<L1Hdl>,
}

#[derive(Debug, Default)]
struct PreState {
    mgrps: BTreeMap<MgrpHdl, Mgrp>,
    by_mgid: BTreeMap<McGrpId, MgrpHdl>,
    nodes: BTreeMap<L1Hdl, L1Node>,
    next_mgrp: u32,
    next_l1: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct LagEntry {
    member_count: u16,
    members: PortMap,
}

impl LagEntry {
    fn new(members: PortMap) -> Self {
        let member_count = u16::try_from(members.count()).unwrap_or(u16::MAX);
        Self { member_count, members }
    }

    /// The member chosen for `flow_hash`: the `flow_hash % member_count`th
    /// set port, in ascending port order.
    fn select(&self, flow_hash: u64) -> Option<PortNum> {
        if self.member_count == 0 {
            return None;
        }
        let n = flow_hash % u64::from(self.member_count);
        let port = self.members.nth_set(n as usize)?;
        PortNum::try_from(port).ok()
    }
}

#[derive(Debug, Default)]
pub struct McSimplePreLag {
    state: KRwLock<PreState>,
    lags: KRwLock<BTreeMap<LagId, LagEntry>>,
}

impl McSimplePreLag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the group `mgid`.
    pub fn mc_mgrp_create(&self, mgid: McGrpId) -> Result<MgrpHdl, McError> {
        let mut state = self.state.write();
        if state.by_mgid.contains_key(&mgid) {
            return Err(McError::GroupExists(mgid));
        }
        let hdl = MgrpHdl(state.next_mgrp);
        state.next_mgrp += 1;
        state.mgrps.insert(hdl, Mgrp { mgid, nodes: vec![] });
        state.by_mgid.insert(mgid, hdl);
        Ok(hdl)
    }

    /// Destroy a group. Its nodes survive, unassociated.
    pub fn mc_mgrp_destroy(&self, mgrp: MgrpHdl) -> Result<(), McError> {
        let mut state = self.state.write();
        let grp =
            state.mgrps.remove(&mgrp).ok_or(McError::InvalidMgrp(mgrp.0))?;
        state.by_mgid.remove(&grp.mgid);
        for l1 in grp.nodes {
            if let Some(node) = state.nodes.get_mut(&l1) {
                node.mgrp = None;
            }
        }
        Ok(())
    }

    /// Give every LAG in `lags` an entry, empty if it has none yet.
    fn ensure_lags(&self, lags: &LagMap) {
        let mut entries = self.lags.write();
        for idx in lags.iter() {
            if let Ok(id) = LagId::try_from(idx) {
                entries.entry(id).or_default();
            }
        }
    }

    pub fn mc_node_create(
        &self,
        rid: Rid,
        ports: &PortMap,
        lags: &LagMap,
    ) -> Result<L1Hdl, McError> {
        let mut state = self.state.write();
        self.ensure_lags(lags);
        let hdl = L1Hdl(state.next_l1);
        state.next_l1 += 1;
        state.nodes.insert(
            hdl,
            L1Node { rid, ports: *ports, lags: *lags, mgrp: None },
        );
        Ok(hdl)
    }

    pub fn mc_node_update(
        &self,
        l1: L1Hdl,
        ports: &PortMap,
        lags: &LagMap,
    ) -> Result<(), McError> {
        let mut state = self.state.write();
        let node = state.nodes.get_mut(&l1).ok_or(McError::InvalidL1(l1.0))?;
        self.ensure_lags(lags);
        node.ports = *ports;
        node.lags = *lags;
        Ok(())
    }

    /// Destroy a node, removing it from its group if it has one.
    pub fn mc_node_destroy(&self, l1: L1Hdl) -> Result<(), McError> {
        let mut state = self.state.write();
        let node = state.nodes.remove(&l1).ok_or(McError::InvalidL1(l1.0))?;
        if let Some(grp) = node.mgrp.and_then(|m| state.mgrps.get_mut(&m)) {
            grp.nodes.retain(|n| *n != l1);
        }
        Ok(())
    }

    pub fn mc_node_associate(
        &self,
        mgrp: MgrpHdl,
        l1: L1Hdl,
    ) -> Result<(), McError> {
        let mut state = self.state.write();
        if !state.mgrps.contains_key(&mgrp) {
            return Err(McError::InvalidMgrp(mgrp.0));
        }
        let node = state.nodes.get_mut(&l1).ok_or(McError::InvalidL1(l1.0))?;
        if node.mgrp.is_some() {
            return Err(McError::NodeAssociated(l1.0));
        }
        node.mgrp = Some(mgrp);
        if let Some(grp) = state.mgrps.get_mut(&mgrp) {
            grp.nodes.push(l1);
        }
        Ok(())
    }

    pub fn mc_node_dissociate(
        &self,
        mgrp: MgrpHdl,
        l1: L1Hdl,
    ) -> Result<(), McError> {
        let mut state = self.state.write();
        if !state.mgrps.contains_key(&mgrp) {
            return Err(McError::InvalidMgrp(mgrp.0));
        }
        let node = state.nodes.get_mut(&l1).ok_or(McError::InvalidL1(l1.0))?;
        if node.mgrp != Some(mgrp) {
            return Err(McError::NodeNotAssociated { mgrp: mgrp.0, node: l1.0 });
        }
        node.mgrp = None;
        if let Some(grp) = state.mgrps.get_mut(&mgrp) {
            grp.nodes.retain(|n| *n != l1);
        }
        Ok(())
    }

    /// Overwrite the membership of LAG `lag`.
    pub fn mc_set_lag_membership(
        &self,
        lag: LagId,
        members: &PortMap,
    ) -> Result<(), McError> {
        if usize::from(lag) >= LAG_MAX_ENTRIES {
            return Err(McError::LagOutOfRange(lag));
        }
        self.lags.write().insert(lag, LagEntry::new(*members));
        Ok(())
    }

    /// Compute the copies of a packet sent to group `input.mgid`.
    ///
    /// An unknown group, and an empty LAG, contribute no copies. The
    /// whole call observes one snapshot of groups and LAG membership.
    pub fn replicate(&self, input: McIn) -> Vec<McOut> {
        let state = self.state.read();
        let lags = self.lags.read();
        let mut out = vec![];

        let Some(grp) =
            state.by_mgid.get(&input.mgid).and_then(|h| state.mgrps.get(h))
        else {
            return out;
        };

        for node in grp.nodes.iter().filter_map(|l1| state.nodes.get(l1)) {
            for port in node.ports.iter() {
                if let Ok(egress_port) = PortNum::try_from(port) {
                    out.push(McOut { egress_port, rid: node.rid });
                }
            }

            for lag in node.lags.iter() {
                let port = LagId::try_from(lag)
                    .ok()
                    .and_then(|id| lags.get(&id))
                    .and_then(|e| e.select(input.flow_hash));
                if let Some(egress_port) = port {
                    out.push(McOut { egress_port, rid: node.rid });
                }
            }
        }

        out
    }

    pub fn lag_dump(&self) -> Vec<LagEntryDump> {
        self.lags
            .read()
            .iter()
            .map(|(id, e)| LagEntryDump {
                lag_id: *id,
                member_count: e.member_count,
                members: e.members,
            })
            .collect()
    }

    pub fn mgrp_dump(&self) -> Vec<McGroupDump> {
        let state = self.state.read();
        state
            .mgrps
            .iter()
            .map(|(h, g)| McGroupDump {
                handle: *h,
                mgid: g.mgid,
                nodes: g
                    .nodes
                    .iter()
                    .filter_map(|l1| {
                        let n = state.nodes.get(l1)?;
                        Some(McNodeDump {
                            handle: *l1,
                            rid: n.rid,
                            ports: n.ports,
                            lags: n.lags,
                        })
                    })
                    .collect(),
            })
            .collect()
    }

    /// Forget every group, node, and LAG.
    pub fn reset_state(&self) {
        let mut state = self.state.write();
        let mut lags = self.lags.write();
        *state = PreState::default();
        lags.clear();
    }
}
