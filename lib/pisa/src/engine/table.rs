// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Match-action tables.
//!
//! All three kinds share key construction and the per-action successor
//! map. They differ in what an entry resolves to:
//!
//! * simple: an action plus its data;
//! * indirect: a member of the table's action profile;
//! * indirect with selection: a member, or a weighted group of members
//!   from which one is picked per packet by hashing the selector input.
//!
//! Entries, members, groups, and the default action live behind one
//! readers-writer lock. Lookups take it for reading and control-plane
//! calls take it for writing, so [`MatchTable::reset_state`] is atomic
//! with respect to lookups. Hit counters and last-hit times are atomics
//! inside each entry and are updated under the read lock.

use super::action::ActionCtx;
use super::action::ActionFn;
use super::bits;
use super::calc::Calculation;
use super::data::Data;
use super::learn::LearnEngine;
use super::match_key::EntryKey;
use super::match_key::MatchKeyBuilder;
use super::match_key::MatchUnitKind;
use super::packet::Packet;
use super::pipeline::NodeRef;
use crate::api::DumpTableResp;
use crate::api::EntryHdl;
use crate::api::EntryTargetDump;
use crate::api::GroupDump;
use crate::api::GrpHdl;
use crate::api::MatchParam;
use crate::api::MbrHdl;
use crate::api::MemberDump;
use crate::api::TableEntryDump;
use crate::sync::KRwLock;
use crate::time::Moment;
use crate::time::Ttl;
use core::fmt;
use core::fmt::Display;
use core::str::FromStr;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TableKind {
    Simple,
    Indirect,
    IndirectWs,
}

impl FromStr for TableKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "indirect" => Ok(Self::Indirect),
            "indirect_ws" => Ok(Self::IndirectWs),
            _ => Err(format!("invalid table type: {s}")),
        }
    }
}

impl Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Simple => "simple",
            Self::Indirect => "indirect",
            Self::IndirectWs => "indirect_ws",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TableError {
    #[error("table is full")]
    Full,

    #[error("invalid handle {0}")]
    InvalidHandle(u32),

    #[error("operation not supported by a {0} table")]
    WrongTableType(TableKind),

    #[error("bad match key: {0}")]
    BadMatchKey(String),

    #[error("unknown action {0}")]
    UnknownAction(String),

    #[error("action {action} takes {expected} parameters, got {got}")]
    BadActionData { action: String, expected: usize, got: usize },

    #[error("an entry with this key already exists")]
    DuplicateEntry,

    #[error("member {0} is still referenced")]
    MemberInUse(u32),
}

/// An action to run with its data.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActionEntry {
    pub action: usize,
    pub data: Vec<Data>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum EntryTarget {
    Action(ActionEntry),
    Member(MbrHdl),
    Group(GrpHdl),
}

#[derive(Debug)]
struct Entry {
    key: EntryKey,
    params: Vec<MatchParam>,
    priority: u32,
    target: EntryTarget,
    packets: AtomicU64,
    bytes: AtomicU64,
    /// Milliseconds since the table epoch.
    last_hit: AtomicU64,
    ttl: Option<Ttl>,
}

#[derive(Clone, Debug, Default)]
struct Group {
    members: Vec<(MbrHdl, u32)>,
}

#[derive(Debug, Default)]
struct TableState {
    entries: BTreeMap<EntryHdl, Entry>,
    exact: HashMap<Vec<u8>, EntryHdl>,
    members: BTreeMap<MbrHdl, ActionEntry>,
    groups: BTreeMap<GrpHdl, Group>,
    default: Option<ActionEntry>,
    next_entry: u32,
    next_mbr: u32,
    next_grp: u32,
    /// Entries already reported idle by [`MatchTable::take_newly_idle`].
    idle_notified: BTreeSet<EntryHdl>,
}

/// The outcome of a lookup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LookupResult {
    Hit { handle: EntryHdl, entry: ActionEntry },
    /// No entry matched; the default action, if any, applies.
    Miss { default: Option<ActionEntry> },
}

/// Load-time table configuration.
#[derive(Clone, Debug)]
pub struct TableConfig {
    pub name: String,
    pub id: u32,
    pub kind: TableKind,
    pub max_size: u32,
    pub with_counters: bool,
    pub support_timeout: bool,
    pub unit: MatchUnitKind,
}

#[derive(Debug)]
pub struct MatchTable {
    pub name: String,
    pub id: u32,
    kind: TableKind,
    max_size: usize,
    with_counters: bool,
    support_timeout: bool,
    key: MatchKeyBuilder,
    unit: MatchUnitKind,
    selector: Option<Arc<Calculation>>,
    actions: Vec<Arc<ActionFn>>,
    next_nodes: Vec<Option<NodeRef>>,
    base_default_next: Option<NodeRef>,
    initial_default: Option<ActionEntry>,
    epoch: Moment,
    state: KRwLock<TableState>,
}

impl MatchTable {
    pub fn new(
        cfg: TableConfig,
        key: MatchKeyBuilder,
        actions: Vec<Arc<ActionFn>>,
    ) -> Self {
        let nactions = actions.len();
        Self {
            name: cfg.name,
            id: cfg.id,
            kind: cfg.kind,
            max_size: cfg.max_size as usize,
            with_counters: cfg.with_counters,
            support_timeout: cfg.support_timeout,
            key,
            unit: cfg.unit,
            selector: None,
            actions,
            next_nodes: vec![None; nactions],
            base_default_next: None,
            initial_default: None,
            epoch: Moment::now(),
            state: KRwLock::new(TableState::default()),
        }
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn key(&self) -> &MatchKeyBuilder {
        &self.key
    }

    pub fn unit(&self) -> MatchUnitKind {
        self.unit
    }

    pub fn supports_timeout(&self) -> bool {
        self.support_timeout
    }

    pub fn actions(&self) -> &[Arc<ActionFn>] {
        &self.actions
    }

    pub fn selector(&self) -> Option<&Arc<Calculation>> {
        self.selector.as_ref()
    }

    pub fn set_selector(&mut self, calc: Arc<Calculation>) {
        self.selector = Some(calc);
    }

    pub fn action_index(&self, name: &str) -> Option<usize> {
        self.actions.iter().position(|a| a.name == name)
    }

    /// Set the successor taken after running action `action`.
    pub fn set_next_node(&mut self, action: usize, next: Option<NodeRef>) {
        if let Some(slot) = self.next_nodes.get_mut(action) {
            *slot = next;
        }
    }

    pub fn next_node(&self, action: usize) -> Option<NodeRef> {
        self.next_nodes.get(action).copied().flatten()
    }

    pub fn set_base_default_next(&mut self, next: Option<NodeRef>) {
        self.base_default_next = next;
    }

    /// Every successor this table can lead to.
    pub fn successors(&self) -> impl Iterator<Item = NodeRef> + '_ {
        self.next_nodes
            .iter()
            .chain([&self.base_default_next])
            .flatten()
            .copied()
    }

    /// Install the default action declared by the program. It survives
    /// [`Self::reset_state`].
    pub fn set_initial_default(
        &mut self,
        action: &str,
        data: &[Data],
    ) -> Result<(), TableError> {
        let entry = self.action_entry(action, data)?;
        self.initial_default = Some(entry.clone());
        self.state.write().default = Some(entry);
        Ok(())
    }

    fn action_entry(
        &self,
        action: &str,
        data: &[Data],
    ) -> Result<ActionEntry, TableError> {
        let idx = self
            .action_index(action)
            .ok_or_else(|| TableError::UnknownAction(action.to_string()))?;
        let rd = self.actions[idx].runtime_data();
        if rd.len() != data.len() {
            return Err(TableError::BadActionData {
                action: action.to_string(),
                expected: rd.len(),
                got: data.len(),
            });
        }

        let data = data
            .iter()
            .zip(rd)
            .map(|(d, r)| Data(d.get() & bits::width_mask(r.bits)))
            .collect();
        Ok(ActionEntry { action: idx, data })
    }

    fn now_ms(&self) -> u64 {
        Moment::now().delta_as_millis(self.epoch)
    }

    fn insert(
        &self,
        params: &[MatchParam],
        priority: u32,
        target: EntryTarget,
    ) -> Result<EntryHdl, TableError> {
        let key = self.key.entry_key(params).map_err(TableError::BadMatchKey)?;
        let mut state = self.state.write();

        if state.entries.len() >= self.max_size {
            return Err(TableError::Full);
        }

        let dup = match self.unit {
            MatchUnitKind::Exact => state.exact.contains_key(&key.key),
            _ => state.entries.values().any(|e| {
                e.key == key
                    && (self.unit == MatchUnitKind::Lpm
                        || e.priority == priority)
            }),
        };
        if dup {
            return Err(TableError::DuplicateEntry);
        }

        match &target {
            EntryTarget::Member(m) if !state.members.contains_key(m) => {
                return Err(TableError::InvalidHandle(m.0));
            }
            EntryTarget::Group(g) if !state.groups.contains_key(g) => {
                return Err(TableError::InvalidHandle(g.0));
            }
            _ => (),
        }

        let hdl = EntryHdl(state.next_entry);
        state.next_entry += 1;
        if self.unit == MatchUnitKind::Exact {
            state.exact.insert(key.key.clone(), hdl);
        }
        state.entries.insert(
            hdl,
            Entry {
                key,
                params: params.to_vec(),
                priority,
                target,
                packets: AtomicU64::new(0),
                bytes: AtomicU64::new(0),
                last_hit: AtomicU64::new(self.now_ms()),
                ttl: None,
            },
        );
        Ok(hdl)
    }

    /// Add an entry to a simple table.
    pub fn add_entry(
        &self,
        params: &[MatchParam],
        priority: u32,
        action: &str,
        data: &[Data],
    ) -> Result<EntryHdl, TableError> {
        if self.kind != TableKind::Simple {
            return Err(TableError::WrongTableType(self.kind));
        }
        let ae = self.action_entry(action, data)?;
        self.insert(params, priority, EntryTarget::Action(ae))
    }

    /// Add an entry pointing at an action-profile member.
    pub fn add_entry_to_member(
        &self,
        params: &[MatchParam],
        priority: u32,
        mbr: MbrHdl,
    ) -> Result<EntryHdl, TableError> {
        if self.kind == TableKind::Simple {
            return Err(TableError::WrongTableType(self.kind));
        }
        self.insert(params, priority, EntryTarget::Member(mbr))
    }

    /// Add an entry pointing at a selector group.
    pub fn add_entry_to_group(
        &self,
        params: &[MatchParam],
        priority: u32,
        grp: GrpHdl,
    ) -> Result<EntryHdl, TableError> {
        if self.kind != TableKind::IndirectWs {
            return Err(TableError::WrongTableType(self.kind));
        }
        self.insert(params, priority, EntryTarget::Group(grp))
    }

    /// Replace the action of an entry in a simple table.
    pub fn modify_entry(
        &self,
        hdl: EntryHdl,
        action: &str,
        data: &[Data],
    ) -> Result<(), TableError> {
        if self.kind != TableKind::Simple {
            return Err(TableError::WrongTableType(self.kind));
        }
        let ae = self.action_entry(action, data)?;
        let mut state = self.state.write();
        let entry = state
            .entries
            .get_mut(&hdl)
            .ok_or(TableError::InvalidHandle(hdl.0))?;
        entry.target = EntryTarget::Action(ae);
        Ok(())
    }

    pub fn delete_entry(&self, hdl: EntryHdl) -> Result<(), TableError> {
        let mut state = self.state.write();
        let entry =
            state.entries.remove(&hdl).ok_or(TableError::InvalidHandle(hdl.0))?;
        if self.unit == MatchUnitKind::Exact {
            state.exact.remove(&entry.key.key);
        }
        Ok(())
    }

    pub fn set_default_action(
        &self,
        action: &str,
        data: &[Data],
    ) -> Result<(), TableError> {
        let ae = self.action_entry(action, data)?;
        self.state.write().default = Some(ae);
        Ok(())
    }

    /// Set the idle timeout of an entry.
    pub fn set_entry_ttl(
        &self,
        hdl: EntryHdl,
        ttl: Ttl,
    ) -> Result<(), TableError> {
        if !self.support_timeout {
            return Err(TableError::WrongTableType(self.kind));
        }
        let mut state = self.state.write();
        let entry = state
            .entries
            .get_mut(&hdl)
            .ok_or(TableError::InvalidHandle(hdl.0))?;
        entry.ttl = Some(ttl);
        Ok(())
    }

    /// Return `(packets, bytes)` matched by an entry.
    pub fn entry_counters(
        &self,
        hdl: EntryHdl,
    ) -> Result<(u64, u64), TableError> {
        let state = self.state.read();
        let e =
            state.entries.get(&hdl).ok_or(TableError::InvalidHandle(hdl.0))?;
        let packets = e.packets.load(Ordering::Relaxed);
        Ok((packets, e.bytes.load(Ordering::Relaxed)))
    }

    pub fn add_member(
        &self,
        action: &str,
        data: &[Data],
    ) -> Result<MbrHdl, TableError> {
        if self.kind == TableKind::Simple {
            return Err(TableError::WrongTableType(self.kind));
        }
        let ae = self.action_entry(action, data)?;
        let mut state = self.state.write();
        let hdl = MbrHdl(state.next_mbr);
        state.next_mbr += 1;
        state.members.insert(hdl, ae);
        Ok(hdl)
    }

    pub fn modify_member(
        &self,
        mbr: MbrHdl,
        action: &str,
        data: &[Data],
    ) -> Result<(), TableError> {
        let ae = self.action_entry(action, data)?;
        let mut state = self.state.write();
        let slot = state
            .members
            .get_mut(&mbr)
            .ok_or(TableError::InvalidHandle(mbr.0))?;
        *slot = ae;
        Ok(())
    }

    /// Delete a member that no entry or group refers to.
    pub fn delete_member(&self, mbr: MbrHdl) -> Result<(), TableError> {
        let mut state = self.state.write();
        if !state.members.contains_key(&mbr) {
            return Err(TableError::InvalidHandle(mbr.0));
        }
        let target = EntryTarget::Member(mbr);
        let in_entry = state.entries.values().any(|e| e.target == target);
        let in_group = state
            .groups
            .values()
            .any(|g| g.members.iter().any(|(m, _)| *m == mbr));
        if in_entry || in_group {
            return Err(TableError::MemberInUse(mbr.0));
        }
        state.members.remove(&mbr);
        Ok(())
    }

    pub fn create_group(&self) -> Result<GrpHdl, TableError> {
        if self.kind != TableKind::IndirectWs {
            return Err(TableError::WrongTableType(self.kind));
        }
        let mut state = self.state.write();
        let hdl = GrpHdl(state.next_grp);
        state.next_grp += 1;
        state.groups.insert(hdl, Group::default());
        Ok(hdl)
    }

    pub fn delete_group(&self, grp: GrpHdl) -> Result<(), TableError> {
        let mut state = self.state.write();
        if state.entries.values().any(|e| e.target == EntryTarget::Group(grp)) {
            return Err(TableError::MemberInUse(grp.0));
        }
        state.groups.remove(&grp).ok_or(TableError::InvalidHandle(grp.0))?;
        Ok(())
    }

    /// Add a member to a group with the given weight, or update its
    /// weight if it is already present. A weight of zero is stored but
    /// never selected.
    pub fn add_member_to_group(
        &self,
        grp: GrpHdl,
        mbr: MbrHdl,
        weight: u32,
    ) -> Result<(), TableError> {
        let mut state = self.state.write();
        if !state.members.contains_key(&mbr) {
            return Err(TableError::InvalidHandle(mbr.0));
        }
        let group =
            state.groups.get_mut(&grp).ok_or(TableError::InvalidHandle(grp.0))?;
        match group.members.iter_mut().find(|(m, _)| *m == mbr) {
            Some(slot) => slot.1 = weight,
            None => group.members.push((mbr, weight)),
        }
        Ok(())
    }

    pub fn remove_member_from_group(
        &self,
        grp: GrpHdl,
        mbr: MbrHdl,
    ) -> Result<(), TableError> {
        let mut state = self.state.write();
        let group =
            state.groups.get_mut(&grp).ok_or(TableError::InvalidHandle(grp.0))?;
        let before = group.members.len();
        group.members.retain(|(m, _)| *m != mbr);
        if group.members.len() == before {
            return Err(TableError::InvalidHandle(mbr.0));
        }
        Ok(())
    }

    pub fn num_entries(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Remove every entry, member, and group, zero all counters and
    /// ageing state, and restore the program's default action.
    pub fn reset_state(&self) {
        let mut state = self.state.write();
        *state = TableState {
            default: self.initial_default.clone(),
            ..TableState::default()
        };
    }

    fn find(&self, state: &TableState, key: &[u8]) -> Option<EntryHdl> {
        match self.unit {
            MatchUnitKind::Exact => state.exact.get(key).copied(),

            MatchUnitKind::Lpm => state
                .entries
                .iter()
                .filter(|(_, e)| e.key.matches(key))
                .fold(None, |best: Option<(EntryHdl, u32)>, (h, e)| match best {
                    Some((_, len)) if len >= e.key.prefix_len => best,
                    _ => Some((*h, e.key.prefix_len)),
                })
                .map(|(h, _)| h),

            MatchUnitKind::Ternary => state
                .entries
                .iter()
                .filter(|(_, e)| e.key.matches(key))
                .fold(None, |best: Option<(EntryHdl, u32)>, (h, e)| match best {
                    Some((_, prio)) if prio <= e.priority => best,
                    _ => Some((*h, e.priority)),
                })
                .map(|(h, _)| h),
        }
    }

    /// Pick a member of `group` for `pkt`: the selector hash modulo the
    /// total weight, walked across the members' cumulative weights.
    fn select(&self, group: &Group, pkt: &Packet) -> Option<MbrHdl> {
        let total: u64 = group.members.iter().map(|(_, w)| u64::from(*w)).sum();
        if total == 0 {
            return None;
        }

        let hash = self.selector.as_ref().map_or(0, |s| s.compute(pkt));
        let mut point = hash % total;
        for (m, w) in &group.members {
            let w = u64::from(*w);
            if point < w {
                return Some(*m);
            }
            point -= w;
        }
        None
    }

    /// Look `pkt` up in the table.
    pub fn lookup(&self, pkt: &Packet) -> LookupResult {
        let key = self.key.build(&pkt.phv);
        let state = self.state.read();
        let miss = || LookupResult::Miss { default: state.default.clone() };

        let Some(hdl) = self.find(&state, &key) else {
            return miss();
        };
        let Some(entry) = state.entries.get(&hdl) else {
            return miss();
        };

        if self.with_counters {
            entry.packets.fetch_add(1, Ordering::Relaxed);
            entry.bytes.fetch_add(pkt.len() as u64, Ordering::Relaxed);
        }
        if self.support_timeout {
            entry.last_hit.store(self.now_ms(), Ordering::Relaxed);
        }

        let resolved = match &entry.target {
            EntryTarget::Action(ae) => Some(ae.clone()),
            EntryTarget::Member(m) => state.members.get(m).cloned(),
            EntryTarget::Group(g) => state
                .groups
                .get(g)
                .and_then(|grp| self.select(grp, pkt))
                .and_then(|m| state.members.get(&m).cloned()),
        };

        match resolved {
            Some(entry) => LookupResult::Hit { handle: hdl, entry },
            None => miss(),
        }
    }

    /// Look up `pkt`, run the resulting action, and return the next node.
    pub fn apply(
        &self,
        pkt: &mut Packet,
        learn: &LearnEngine,
    ) -> Option<NodeRef> {
        let ae = match self.lookup(pkt) {
            LookupResult::Hit { entry, .. } => entry,
            LookupResult::Miss { default: Some(entry) } => entry,
            LookupResult::Miss { default: None } => {
                return self.base_default_next;
            }
        };

        let action = &self.actions[ae.action];
        let mut ctx = ActionCtx { pkt, data: &ae.data, learn };
        action.execute(&mut ctx);
        self.next_node(ae.action)
    }

    /// Entries with a TTL that have not been hit for longer than it.
    pub fn idle_entries(&self, now: Moment) -> Vec<EntryHdl> {
        let state = self.state.read();
        self.idle_in(&state, now)
    }

    fn idle_in(&self, state: &TableState, now: Moment) -> Vec<EntryHdl> {
        let now_ms = now.delta_as_millis(self.epoch);
        state
            .entries
            .iter()
            .filter_map(|(h, e)| {
                let ttl = e.ttl?;
                let last = e.last_hit.load(Ordering::Relaxed);
                let idle = now_ms.saturating_sub(last);
                ttl.is_expired_millis(idle).then_some(*h)
            })
            .collect()
    }

    /// Idle entries not yet reported since they last went idle. The
    /// reported set lives with the entries, so [`Self::reset_state`]
    /// clears both together.
    pub fn take_newly_idle(&self, now: Moment) -> Vec<EntryHdl> {
        let mut state = self.state.write();
        let idle = self.idle_in(&state, now);
        let fresh = idle
            .iter()
            .copied()
            .filter(|h| !state.idle_notified.contains(h))
            .collect();
        state.idle_notified = idle.into_iter().collect();
        fresh
    }

    fn action_dump(&self, ae: &ActionEntry) -> (String, Vec<String>) {
        let name = self.actions[ae.action].name.clone();
        let data = ae.data.iter().map(|d| d.to_string()).collect();
        (name, data)
    }

    pub fn dump(&self) -> DumpTableResp {
        let state = self.state.read();
        let entries = state
            .entries
            .iter()
            .map(|(h, e)| {
                let target = match &e.target {
                    EntryTarget::Action(ae) => {
                        let (name, data) = self.action_dump(ae);
                        EntryTargetDump::Action { name, data }
                    }
                    EntryTarget::Member(m) => EntryTargetDump::Member(*m),
                    EntryTarget::Group(g) => EntryTargetDump::Group(*g),
                };
                TableEntryDump {
                    handle: *h,
                    key: e.params.clone(),
                    priority: e.priority,
                    target,
                    packets: e.packets.load(Ordering::Relaxed),
                    bytes: e.bytes.load(Ordering::Relaxed),
                }
            })
            .collect();

        let members = state
            .members
            .iter()
            .map(|(h, ae)| {
                let (action, data) = self.action_dump(ae);
                MemberDump { handle: *h, action, data }
            })
            .collect();

        let groups = state
            .groups
            .iter()
            .map(|(h, g)| GroupDump { handle: *h, members: g.members.clone() })
            .collect();

        DumpTableResp {
            name: self.name.clone(),
            kind: self.kind.to_string(),
            max_size: self.max_size as u32,
            entries,
            members,
            groups,
            default_action: state
                .default
                .as_ref()
                .map(|ae| self.actions[ae.action].name.clone()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::MatchKind;
    use crate::engine::action::ActionParam;
    use crate::engine::action::PrimitiveCall;
    use crate::engine::action::PrimitiveRegistry;
    use crate::engine::action::RuntimeData;
    use crate::engine::calc::BufBuilder;
    use crate::engine::hash;
    use crate::engine::header::HeaderType;
    use crate::engine::phv::FieldId;
    use crate::engine::phv::PhvTemplate;
    use crate::provider::NullWriter;

    struct Fixture {
        t: PhvTemplate,
        key_field: FieldId,
        out: FieldId,
        learn: LearnEngine,
    }

    fn fixture() -> Fixture {
        let ht = Arc::new(HeaderType::new(
            "m_t",
            0,
            &[("k".to_string(), 16), ("out".to_string(), 16)],
        ));
        let mut t = PhvTemplate::new();
        t.push_header("m", ht, true);
        let key_field = t.field_id("m", "k").unwrap();
        let out = t.field_id("m", "out").unwrap();
        let learn = LearnEngine::new(Arc::new(NullWriter));
        Fixture { t, key_field, out, learn }
    }

    fn set_out(out: FieldId) -> Arc<ActionFn> {
        let reg = PrimitiveRegistry::default();
        let mut a = ActionFn::new(
            "set_out",
            0,
            vec![RuntimeData { name: "v".to_string(), bits: 16 }],
        );
        a.push_back_primitive(PrimitiveCall::new(
            reg.get("modify_field").unwrap(),
            vec![ActionParam::Field(out), ActionParam::ActionData(0)],
        ));
        Arc::new(a)
    }

    fn table(fx: &Fixture, kind: TableKind, mk: MatchKind) -> MatchTable {
        let mut key = MatchKeyBuilder::new();
        key.push_back_field(fx.key_field, 16, mk);
        let cfg = TableConfig {
            name: "t".to_string(),
            id: 0,
            kind,
            max_size: 4,
            with_counters: true,
            support_timeout: true,
            unit: key.unit_kind(None),
        };
        let noop = Arc::new(ActionFn::new("nop", 1, vec![]));
        MatchTable::new(cfg, key, vec![set_out(fx.out), noop])
    }

    fn ek(hi: u8, lo: u8) -> [MatchParam; 1] {
        [MatchParam::Exact(vec![hi, lo])]
    }

    fn pkt(fx: &Fixture, k: u128) -> Packet {
        let mut p = Packet::new(0, vec![0; 64], fx.t.new_phv());
        p.phv.field_mut(fx.key_field).unwrap().set(Data(k));
        p
    }

    #[test]
    fn exact_hit_and_miss() {
        let fx = fixture();
        let t = table(&fx, TableKind::Simple, MatchKind::Exact);
        let h = t.add_entry(&ek(0, 5), 0, "set_out", &[Data(9)]).unwrap();
        assert_eq!(
            t.add_entry(&ek(0, 5), 0, "nop", &[]),
            Err(TableError::DuplicateEntry)
        );

        let mut p = pkt(&fx, 5);
        t.apply(&mut p, &fx.learn);
        assert_eq!(p.phv.field(fx.out).get(), Data(9));
        assert_eq!(t.entry_counters(h), Ok((1, 64)));

        t.modify_entry(h, "set_out", &[Data(3)]).unwrap();
        let mut p = pkt(&fx, 5);
        t.apply(&mut p, &fx.learn);
        assert_eq!(p.phv.field(fx.out).get(), Data(3));
        assert_eq!(
            t.modify_entry(EntryHdl(99), "nop", &[]),
            Err(TableError::InvalidHandle(99))
        );

        let mut p = pkt(&fx, 6);
        assert_eq!(t.lookup(&p), LookupResult::Miss { default: None });
        t.set_default_action("set_out", &[Data(1)]).unwrap();
        t.apply(&mut p, &fx.learn);
        assert_eq!(p.phv.field(fx.out).get(), Data(1));
    }

    #[test]
    fn control_plane_errors() {
        let fx = fixture();
        let t = table(&fx, TableKind::Simple, MatchKind::Exact);
        let key = [MatchParam::Exact(vec![0, 1])];
        assert_eq!(
            t.add_entry(&key, 0, "bogus", &[]),
            Err(TableError::UnknownAction("bogus".to_string()))
        );
        assert!(matches!(
            t.add_entry(&key, 0, "set_out", &[]),
            Err(TableError::BadActionData { .. })
        ));
        assert!(matches!(
            t.add_entry(&[MatchParam::Exact(vec![1])], 0, "nop", &[]),
            Err(TableError::BadMatchKey(_))
        ));
        assert_eq!(
            t.add_member("nop", &[]),
            Err(TableError::WrongTableType(TableKind::Simple))
        );
        assert_eq!(
            t.delete_entry(EntryHdl(77)),
            Err(TableError::InvalidHandle(77))
        );

        for i in 0..4u8 {
            t.add_entry(&ek(1, i), 0, "nop", &[]).unwrap();
        }
        assert_eq!(
            t.add_entry(&ek(2, 0), 0, "nop", &[]),
            Err(TableError::Full)
        );
    }

    #[test]
    fn lpm_longest_prefix_wins() {
        let fx = fixture();
        let t = table(&fx, TableKind::Simple, MatchKind::Lpm);
        t.add_entry(
            &[MatchParam::Lpm { value: vec![0x0a, 0x00], prefix_len: 8 }],
            0,
            "set_out",
            &[Data(8)],
        )
        .unwrap();
        t.add_entry(
            &[MatchParam::Lpm { value: vec![0x0a, 0x10], prefix_len: 12 }],
            0,
            "set_out",
            &[Data(12)],
        )
        .unwrap();

        let mut p = pkt(&fx, 0x0a1f);
        t.apply(&mut p, &fx.learn);
        assert_eq!(p.phv.field(fx.out).get(), Data(12));

        let mut p = pkt(&fx, 0x0a2f);
        t.apply(&mut p, &fx.learn);
        assert_eq!(p.phv.field(fx.out).get(), Data(8));
    }

    #[test]
    fn ternary_lowest_priority_value_wins() {
        let fx = fixture();
        let t = table(&fx, TableKind::Simple, MatchKind::Ternary);
        let any = MatchParam::Ternary { value: vec![0, 0], mask: vec![0, 0] };
        let exact =
            MatchParam::Ternary { value: vec![0, 3], mask: vec![0xff, 0xff] };
        t.add_entry(&[any], 10, "set_out", &[Data(10)]).unwrap();
        t.add_entry(&[exact], 1, "set_out", &[Data(1)]).unwrap();

        let mut p = pkt(&fx, 3);
        t.apply(&mut p, &fx.learn);
        assert_eq!(p.phv.field(fx.out).get(), Data(1));
        let mut p = pkt(&fx, 4);
        t.apply(&mut p, &fx.learn);
        assert_eq!(p.phv.field(fx.out).get(), Data(10));
    }

    #[test]
    fn indirect_members() {
        let fx = fixture();
        let t = table(&fx, TableKind::Indirect, MatchKind::Exact);
        let m = t.add_member("set_out", &[Data(4)]).unwrap();
        let key = [MatchParam::Exact(vec![0, 2])];
        assert_eq!(
            t.add_entry(&key, 0, "nop", &[]),
            Err(TableError::WrongTableType(TableKind::Indirect))
        );
        assert_eq!(
            t.add_entry_to_member(&key, 0, MbrHdl(9)),
            Err(TableError::InvalidHandle(9))
        );
        t.add_entry_to_member(&key, 0, m).unwrap();
        assert_eq!(t.delete_member(m), Err(TableError::MemberInUse(m.0)));
        assert!(t.create_group().is_err());

        let mut p = pkt(&fx, 2);
        t.apply(&mut p, &fx.learn);
        assert_eq!(p.phv.field(fx.out).get(), Data(4));

        t.modify_member(m, "set_out", &[Data(5)]).unwrap();
        let mut p = pkt(&fx, 2);
        t.apply(&mut p, &fx.learn);
        assert_eq!(p.phv.field(fx.out).get(), Data(5));
    }

    #[test]
    fn weighted_group_selection() {
        let fx = fixture();
        let mut t = table(&fx, TableKind::IndirectWs, MatchKind::Exact);
        let mut b = BufBuilder::new();
        b.push_back_field(fx.key_field, 16);
        let sel = Calculation::new("sel", 0, "xxh64", b, hash::xxh64);
        t.set_selector(Arc::new(sel));

        let m1 = t.add_member("set_out", &[Data(1)]).unwrap();
        let m2 = t.add_member("set_out", &[Data(2)]).unwrap();
        let g = t.create_group().unwrap();
        t.add_member_to_group(g, m1, 1).unwrap();
        t.add_member_to_group(g, m2, 3).unwrap();
        let e = t.add_entry_to_group(&ek(0, 7), 0, g).unwrap();

        let mut p = pkt(&fx, 7);
        let first = t.lookup(&p);
        assert_eq!(t.lookup(&p), first);

        let hash = hash::xxh64(&[0, 7]) % 4;
        let expect = if hash < 1 { 1 } else { 2 };
        t.apply(&mut p, &fx.learn);
        assert_eq!(p.phv.field(fx.out).get(), Data(expect));

        t.remove_member_from_group(g, m1).unwrap();
        t.remove_member_from_group(g, m2).unwrap();
        assert_eq!(t.lookup(&p), LookupResult::Miss { default: None });

        assert_eq!(t.delete_group(g), Err(TableError::MemberInUse(g.0)));
        t.delete_entry(e).unwrap();
        t.delete_group(g).unwrap();
        assert_eq!(t.delete_group(g), Err(TableError::InvalidHandle(g.0)));
    }

    #[test]
    fn reset_restores_initial_state() {
        let fx = fixture();
        let mut t = table(&fx, TableKind::Simple, MatchKind::Exact);
        t.set_initial_default("nop", &[]).unwrap();
        let h = t.add_entry(&ek(0, 1), 0, "set_out", &[Data(3)]).unwrap();
        t.set_default_action("set_out", &[Data(2)]).unwrap();
        t.reset_state();

        assert_eq!(t.num_entries(), 0);
        assert_eq!(t.entry_counters(h), Err(TableError::InvalidHandle(h.0)));
        assert_eq!(t.dump().default_action.as_deref(), Some("nop"));
        // Handles restart after a reset.
        let h2 = t.add_entry(&ek(0, 1), 0, "nop", &[]).unwrap();
        assert_eq!(h2, EntryHdl(0));
    }

    #[test]
    fn reset_clears_idle_reports() {
        let fx = fixture();
        let t = table(&fx, TableKind::Simple, MatchKind::Exact);
        let h = t.add_entry(&ek(0, 1), 0, "nop", &[]).unwrap();
        t.set_entry_ttl(h, Ttl::new_millis(500)).unwrap();
        let later = Moment::now().add_millis(1_000);
        assert_eq!(t.take_newly_idle(later), vec![h]);
        assert!(t.take_newly_idle(later).is_empty());

        t.reset_state();
        let h2 = t.add_entry(&ek(0, 1), 0, "nop", &[]).unwrap();
        assert_eq!(h2, h);
        t.set_entry_ttl(h2, Ttl::new_millis(500)).unwrap();
        assert_eq!(t.take_newly_idle(later), vec![h2]);
    }

    #[test]
    fn idle_entries_after_ttl() {
        let fx = fixture();
        let t = table(&fx, TableKind::Simple, MatchKind::Exact);
        let h = t.add_entry(&ek(0, 1), 0, "nop", &[]).unwrap();
        t.add_entry(&ek(0, 2), 0, "nop", &[]).unwrap();
        t.set_entry_ttl(h, Ttl::new_seconds(10)).unwrap();

        assert!(t.idle_entries(Moment::now()).is_empty());
        assert_eq!(t.idle_entries(Moment::now().add_millis(10_001)), vec![h]);
    }
}
