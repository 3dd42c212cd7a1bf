// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Action functions and the primitive dispatch mechanism.
//!
//! An [`ActionFn`] is an ordered list of primitive invocations whose
//! parameters were bound by the loader. Some parameters are resolved per
//! invocation: action data comes from the table entry that selected the
//! action, and field parameters read the packet being processed.

use super::calc::Calculation;
use super::data::Data;
use super::learn::LearnEngine;
use super::packet::Packet;
use super::phv::FieldId;
use super::phv::HeaderId;
use super::phv::StackId;
use super::stateful::CounterArray;
use super::stateful::MeterArray;
use super::stateful::RegisterArray;
use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A bound primitive parameter.
#[derive(Clone, Debug)]
pub enum ActionParam {
    Const(Data),
    /// Index into the action data supplied by the table entry.
    ActionData(usize),
    Field(FieldId),
    Header(HeaderId),
    Calculation(Arc<Calculation>),
    Meter(Arc<MeterArray>),
    Counter(Arc<CounterArray>),
    Register(Arc<RegisterArray>),
    Stack(StackId),
}

impl ActionParam {
    /// Does the parameter resolve to a value at run time?
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Const(_) | Self::ActionData(_) | Self::Field(_))
    }
}

/// Everything a primitive may touch while it runs.
pub struct ActionCtx<'a> {
    pub pkt: &'a mut Packet,
    pub data: &'a [Data],
    pub learn: &'a LearnEngine,
}

impl ActionCtx<'_> {
    /// Resolve a parameter to a value. The loader only admits value
    /// parameters where a primitive reads one.
    pub fn value(&self, p: &ActionParam) -> Data {
        debug_assert!(p.is_value(), "{p:?} read as a value");
        match p {
            ActionParam::Const(d) => *d,
            ActionParam::ActionData(i) => {
                self.data.get(*i).copied().unwrap_or_default()
            }
            ActionParam::Field(f) => self.pkt.phv.field(*f).get(),
            _ => Data(0),
        }
    }

    /// Resolve a parameter to an index into a stateful array.
    pub fn index(&self, p: &ActionParam) -> usize {
        usize::try_from(self.value(p).get()).unwrap_or(usize::MAX)
    }

    pub fn set_field(&mut self, p: &ActionParam, v: Data) {
        if let ActionParam::Field(f) = p {
            if let Some(field) = self.pkt.phv.field_mut(*f) {
                field.set(v);
            }
        }
    }
}

/// A primitive action.
pub trait Primitive: Send + Sync {
    fn name(&self) -> &'static str;

    /// The number of parameters the primitive takes.
    fn arity(&self) -> usize;

    /// Positions of the parameters read through [`ActionCtx::value`].
    fn value_params(&self) -> &'static [usize] {
        &[]
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]);
}

/// Name-to-primitive table.
///
/// Populated before any program is loaded and only read afterwards.
#[derive(Clone)]
pub struct PrimitiveRegistry {
    prims: BTreeMap<String, Arc<dyn Primitive>>,
}

impl Default for PrimitiveRegistry {
    fn default() -> Self {
        let mut reg = Self::empty();
        super::primitives::register_all(&mut reg);
        reg
    }
}

impl PrimitiveRegistry {
    pub fn empty() -> Self {
        Self { prims: BTreeMap::new() }
    }

    pub fn register(&mut self, prim: Arc<dyn Primitive>) {
        self.prims.insert(prim.name().to_string(), prim);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Primitive>> {
        self.prims.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.prims.keys().map(String::as_str)
    }
}

impl fmt::Debug for PrimitiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

/// A primitive with its parameters bound.
#[derive(Clone)]
pub struct PrimitiveCall {
    prim: Arc<dyn Primitive>,
    params: Vec<ActionParam>,
}

impl PrimitiveCall {
    pub fn new(prim: Arc<dyn Primitive>, params: Vec<ActionParam>) -> Self {
        Self { prim, params }
    }

    pub fn name(&self) -> &'static str {
        self.prim.name()
    }

    pub fn params(&self) -> &[ActionParam] {
        &self.params
    }
}

impl fmt::Debug for PrimitiveCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PrimitiveCall")
            .field("prim", &self.prim.name())
            .field("params", &self.params)
            .finish()
    }
}

/// A named action parameter and its width in bits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RuntimeData {
    pub name: String,
    pub bits: u32,
}

#[derive(Clone, Debug)]
pub struct ActionFn {
    pub name: String,
    pub id: u32,
    runtime_data: Vec<RuntimeData>,
    calls: Vec<PrimitiveCall>,
}

impl ActionFn {
    pub fn new(name: &str, id: u32, runtime_data: Vec<RuntimeData>) -> Self {
        Self { name: name.to_string(), id, runtime_data, calls: vec![] }
    }

    pub fn push_back_primitive(&mut self, call: PrimitiveCall) {
        self.calls.push(call);
    }

    pub fn runtime_data(&self) -> &[RuntimeData] {
        &self.runtime_data
    }

    pub fn calls(&self) -> &[PrimitiveCall] {
        &self.calls
    }

    /// Run every primitive in order.
    pub fn execute(&self, ctx: &mut ActionCtx<'_>) {
        for call in &self.calls {
            call.prim.execute(ctx, &call.params);
        }
    }
}
