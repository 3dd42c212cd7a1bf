// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Build a linked [`Program`] from an IR document.
//!
//! Sections are consumed in document order because later sections refer
//! to earlier ones by name:
//!
//! header types, headers, header stacks, parsers, deparsers, calculations,
//! meter/counter/register arrays, actions, pipelines, checksums, learn
//! lists, field lists, and finally required-field and forced-arithmetic
//! validation.
//!
//! Control-flow nodes are built in two passes. The first allocates every
//! table and conditional of every pipeline with no successors; the second
//! resolves successor names, which may refer forward. Names of tables and
//! conditionals are global to the program.
//!
//! Loading is all or nothing: a [`Program`] is only returned once every
//! reference has resolved, so a failed load leaves nothing reachable.

use super::action::ActionFn;
use super::action::ActionParam;
use super::action::PrimitiveCall;
use super::action::PrimitiveRegistry;
use super::action::RuntimeData;
use super::ageing::AgeingMonitor;
use super::bits;
use super::calc::BufBuilder;
use super::calc::Calculation;
use super::checksum::ChecksumKind;
use super::checksum::FieldChecksum;
use super::data;
use super::data::Data;
use super::deparser::Deparser;
use super::expr::ExprOpcode;
use super::expr::Expression;
use super::hash;
use super::hash::HashFn;
use super::hash::HashRegistry;
use super::header::HeaderType;
use super::learn::FieldList;
use super::learn::LEARN_MAX_SAMPLES;
use super::learn::LearnEngine;
use super::match_key::MatchKeyBuilder;
use super::parser::KeyElem;
use super::parser::ParseState;
use super::parser::Parser;
use super::parser::ParserOp;
use super::parser::SetSrc;
use super::parser::StateId;
use super::phv::FieldId;
use super::phv::HeaderId;
use super::phv::PhvTemplate;
use super::phv::StackId;
use super::pipeline::Conditional;
use super::pipeline::ControlGraph;
use super::pipeline::NodeRef;
use super::pipeline::Pipeline;
use super::stateful::CounterArray;
use super::stateful::MeterArray;
use super::stateful::MeterType;
use super::stateful::RegisterArray;
use super::table::MatchTable;
use super::table::TableConfig;
use super::table::TableError;
use super::table::TableKind;
use crate::api::ActionIr;
use crate::api::ExpressionIr;
use crate::api::FieldListIr;
use crate::api::FieldRef;
use crate::api::IrDocument;
use crate::api::MatchKind;
use crate::api::ParseStateIr;
use crate::api::PipelineIr;
use crate::api::TableIr;
use crate::api::TypedValue;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::provider::Providers;
use crate::time::Moment;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed IR: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown {kind}: {name}")]
    Unknown { kind: &'static str, name: String },

    #[error("duplicate {kind}: {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("unsupported {kind}: {name}")]
    Unsupported { kind: &'static str, name: String },

    #[error("unknown primitive: {0}")]
    UnknownPrimitive(String),

    #[error("primitive {name} takes {expected} parameters, got {got}")]
    Arity { name: String, expected: usize, got: usize },

    #[error("unknown match type: {0}")]
    BadMatchType(String),

    #[error("invalid table type: {0}")]
    BadTableType(String),

    #[error("unknown expression node type: {0}")]
    BadExpression(String),

    #[error("bad value in {context}: {msg}")]
    BadValue { context: String, msg: String },

    #[error("required field {0} is missing from the header schema")]
    RequiredField(String),

    #[error("pipeline {pipeline} loops through {node}")]
    Cycle { pipeline: String, node: String },

    #[error("table {table}: {source}")]
    Table {
        table: String,
        #[source]
        source: TableError,
    },
}

impl LoadError {
    /// The non-zero status reported for this failure.
    pub fn status(&self) -> i32 {
        match self {
            Self::Json(_) => 2,
            Self::RequiredField(_) => 3,
            _ => 1,
        }
    }

    fn unknown(kind: &'static str, name: impl ToString) -> Self {
        Self::Unknown { kind, name: name.to_string() }
    }

    fn duplicate(kind: &'static str, name: impl ToString) -> Self {
        Self::Duplicate { kind, name: name.to_string() }
    }

    fn bad_value(context: impl ToString, msg: impl ToString) -> Self {
        Self::BadValue { context: context.to_string(), msg: msg.to_string() }
    }
}

/// Caller-supplied load parameters.
#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    /// Fields the hosting switch reads or writes; each must exist.
    pub required_fields: Vec<FieldRef>,
    /// Fields forced into arithmetic mode regardless of use.
    pub arith_fields: Vec<FieldRef>,
    pub primitives: PrimitiveRegistry,
    pub hashes: HashRegistry,
}

/// A fully linked forwarding program.
///
/// Everything here is immutable after load except table entries, the
/// stateful arrays, buffered learn samples, and ageing bookkeeping, all
/// of which synchronize internally.
pub struct Program {
    phv: PhvTemplate,
    header_types: BTreeMap<String, Arc<HeaderType>>,
    parsers: Vec<Parser>,
    deparsers: Vec<Deparser>,
    calculations: BTreeMap<String, Arc<Calculation>>,
    meters: BTreeMap<String, Arc<MeterArray>>,
    counters: BTreeMap<String, Arc<CounterArray>>,
    registers: BTreeMap<String, Arc<RegisterArray>>,
    actions: BTreeMap<String, Arc<ActionFn>>,
    graph: ControlGraph,
    pipelines: Vec<Pipeline>,
    checksums: Vec<Arc<FieldChecksum>>,
    learn: LearnEngine,
    field_lists: BTreeMap<u32, FieldList>,
    ageing: AgeingMonitor,
}

impl Program {
    /// Build a program from a JSON IR document.
    pub fn from_json(
        json: &str,
        opts: &LoadOptions,
        providers: &Providers,
    ) -> Result<Self, LoadError> {
        let doc = match IrDocument::from_json(json) {
            Ok(doc) => doc,
            Err(e) => {
                let err = LoadError::from(e);
                let msg = format!("load failed: {err}");
                providers.log.log(LogLevel::Error, &msg);
                return Err(err);
            }
        };
        Self::load(&doc, opts, providers)
    }

    pub fn load(
        doc: &IrDocument,
        opts: &LoadOptions,
        providers: &Providers,
    ) -> Result<Self, LoadError> {
        let mut loader = Loader {
            log: providers.log.as_ref(),
            opts,
            prog: Program {
                phv: PhvTemplate::new(),
                header_types: BTreeMap::new(),
                parsers: vec![],
                deparsers: vec![],
                calculations: BTreeMap::new(),
                meters: BTreeMap::new(),
                counters: BTreeMap::new(),
                registers: BTreeMap::new(),
                actions: BTreeMap::new(),
                graph: ControlGraph::default(),
                pipelines: vec![],
                checksums: vec![],
                learn: LearnEngine::new(providers.learn.clone()),
                field_lists: BTreeMap::new(),
                ageing: AgeingMonitor::new(providers.ageing.clone()),
            },
            header_ids: BTreeMap::new(),
            arith: BTreeSet::new(),
            arith_headers: BTreeSet::new(),
        };

        match loader.run(doc) {
            Ok(()) => Ok(loader.prog),
            Err(e) => {
                let msg = format!("load failed: {e}");
                providers.log.log(LogLevel::Error, &msg);
                Err(e)
            }
        }
    }

    pub fn phv(&self) -> &PhvTemplate {
        &self.phv
    }

    pub fn header_type(&self, name: &str) -> Option<&Arc<HeaderType>> {
        self.header_types.get(name)
    }

    pub fn field_id(&self, header: &str, field: &str) -> Option<FieldId> {
        self.phv.field_id(header, field)
    }

    pub fn parsers(&self) -> &[Parser] {
        &self.parsers
    }

    pub fn parser(&self, name: &str) -> Option<&Parser> {
        self.parsers.iter().find(|p| p.name == name)
    }

    pub fn deparsers(&self) -> &[Deparser] {
        &self.deparsers
    }

    pub fn deparser(&self, name: &str) -> Option<&Deparser> {
        self.deparsers.iter().find(|d| d.name == name)
    }

    pub fn calculation(&self, name: &str) -> Option<&Arc<Calculation>> {
        self.calculations.get(name)
    }

    pub fn calculations(&self) -> impl Iterator<Item = &Arc<Calculation>> {
        self.calculations.values()
    }

    pub fn meter_array(&self, name: &str) -> Option<&Arc<MeterArray>> {
        self.meters.get(name)
    }

    pub fn counter_array(&self, name: &str) -> Option<&Arc<CounterArray>> {
        self.counters.get(name)
    }

    pub fn register_array(&self, name: &str) -> Option<&Arc<RegisterArray>> {
        self.registers.get(name)
    }

    pub fn action(&self, name: &str) -> Option<&Arc<ActionFn>> {
        self.actions.get(name)
    }

    pub fn graph(&self) -> &ControlGraph {
        &self.graph
    }

    pub fn pipelines(&self) -> &[Pipeline] {
        &self.pipelines
    }

    pub fn pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.iter().find(|p| p.name == name)
    }

    pub fn table(&self, name: &str) -> Option<&MatchTable> {
        self.graph.table(name)
    }

    pub fn tables(&self) -> &[MatchTable] {
        &self.graph.tables
    }

    pub fn conditional(&self, name: &str) -> Option<&Conditional> {
        self.graph.conditionals.iter().find(|c| c.name == name)
    }

    pub fn checksums(&self) -> &[Arc<FieldChecksum>] {
        &self.checksums
    }

    pub fn learn(&self) -> &LearnEngine {
        &self.learn
    }

    pub fn field_list(&self, id: u32) -> Option<&FieldList> {
        self.field_lists.get(&id)
    }

    pub fn ageing(&self) -> &AgeingMonitor {
        &self.ageing
    }

    /// Report entries of ageing tables that have gone idle.
    pub fn sweep_ageing(&self, now: Moment) -> usize {
        self.ageing.sweep(&self.graph.tables, now)
    }

    /// Return every piece of runtime state to its just-loaded value.
    pub fn reset_state(&self) {
        for t in &self.graph.tables {
            t.reset_state();
        }
        for c in self.counters.values() {
            c.reset();
        }
        for m in self.meters.values() {
            m.reset();
        }
        for r in self.registers.values() {
            r.reset();
        }
        self.learn.reset_state();
    }
}

struct Loader<'a> {
    log: &'a dyn LogProvider,
    opts: &'a LoadOptions,
    prog: Program,
    /// IR header id to PHV position.
    header_ids: BTreeMap<u32, HeaderId>,
    /// Fields used as instruction operands.
    arith: BTreeSet<FieldId>,
    arith_headers: BTreeSet<HeaderId>,
}

fn value_str<'v>(v: &'v Value, context: &str) -> Result<&'v str, LoadError> {
    v.as_str().ok_or_else(|| LoadError::bad_value(context, "expected a string"))
}

fn value_u32(v: &Value, context: &str) -> Result<u32, LoadError> {
    v.as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| LoadError::bad_value(context, "expected an integer"))
}

fn value_pair(v: &Value, context: &str) -> Result<(u32, u32), LoadError> {
    match v.as_array().map(Vec::as_slice) {
        Some([a, b]) => Ok((value_u32(a, context)?, value_u32(b, context)?)),
        _ => Err(LoadError::bad_value(context, "expected a pair")),
    }
}

fn hex_data(s: &str, context: &str) -> Result<Data, LoadError> {
    Data::from_hexstr(s).map_err(|e| LoadError::bad_value(context, e))
}

impl Loader<'_> {
    fn warn(&self, msg: &str) {
        self.log.log(LogLevel::Warn, msg);
    }

    fn run(&mut self, doc: &IrDocument) -> Result<(), LoadError> {
        self.load_headers(doc)?;
        for p in &doc.parsers {
            let parser = self.build_parser(
                &p.name,
                p.id,
                &p.init_state,
                &p.parse_states,
            )?;
            if self.prog.parser(&p.name).is_some() {
                return Err(LoadError::duplicate("parser", &p.name));
            }
            self.prog.parsers.push(parser);
        }
        for d in &doc.deparsers {
            if self.prog.deparser(&d.name).is_some() {
                return Err(LoadError::duplicate("deparser", &d.name));
            }
            let order = d
                .order
                .iter()
                .map(|h| self.header(h))
                .collect::<Result<Vec<_>, _>>()?;
            self.prog.deparsers.push(Deparser::new(&d.name, d.id, order));
        }
        for c in &doc.calculations {
            if self.prog.calculations.contains_key(&c.name) {
                return Err(LoadError::duplicate("calculation", &c.name));
            }
            let (algo, hash) = match self.opts.hashes.get(&c.algo) {
                Some(f) => (c.algo.as_str(), f),
                None => {
                    self.warn(&format!(
                        "calculation {}: unknown algorithm {}, using {}",
                        c.name,
                        c.algo,
                        hash::DEFAULT_HASH
                    ));
                    (hash::DEFAULT_HASH, hash::xxh64 as HashFn)
                }
            };
            let builder = self.build_buf(&c.name, &c.input)?;
            let calc = Calculation::new(&c.name, c.id, algo, builder, hash);
            self.prog.calculations.insert(c.name.clone(), Arc::new(calc));
        }
        self.load_stateful(doc)?;
        for a in &doc.actions {
            if self.prog.actions.contains_key(&a.name) {
                return Err(LoadError::duplicate("action", &a.name));
            }
            let action = self.build_action(a)?;
            self.prog.actions.insert(a.name.clone(), Arc::new(action));
        }
        self.load_pipelines(&doc.pipelines)?;
        self.load_checksums(doc)?;
        for l in &doc.learn_lists {
            let fl = self.build_field_list(l)?;
            self.prog.learn.list_create(fl, LEARN_MAX_SAMPLES);
        }
        for l in &doc.field_lists {
            let fl = self.build_field_list(l)?;
            self.prog.field_lists.insert(l.id, fl);
        }
        self.validate_fields(doc)
    }

    fn header(&self, name: &str) -> Result<HeaderId, LoadError> {
        self.prog
            .phv
            .header_id(name)
            .ok_or_else(|| LoadError::unknown("header", name))
    }

    fn stack(&self, name: &str) -> Result<StackId, LoadError> {
        self.prog
            .phv
            .stack_id(name)
            .ok_or_else(|| LoadError::unknown("header stack", name))
    }

    fn field_ref(&self, f: &FieldRef) -> Result<FieldId, LoadError> {
        self.prog
            .phv
            .field_id(f.header(), f.field())
            .ok_or_else(|| LoadError::unknown("field", f))
    }

    fn field(&self, v: &Value, context: &str) -> Result<FieldId, LoadError> {
        let f: FieldRef = serde_json::from_value(v.clone())
            .map_err(|e| LoadError::bad_value(context, e))?;
        self.field_ref(&f)
    }

    fn load_headers(&mut self, doc: &IrDocument) -> Result<(), LoadError> {
        for ht in &doc.header_types {
            let t = Arc::new(HeaderType::new(&ht.name, ht.id, &ht.fields));
            if self.prog.header_types.insert(ht.name.clone(), t).is_some() {
                return Err(LoadError::Duplicate {
                    kind: "header type",
                    name: ht.name.clone(),
                });
            }
        }

        for h in &doc.headers {
            let ht = self
                .prog
                .header_types
                .get(&h.header_type)
                .cloned()
                .ok_or_else(|| {
                    LoadError::unknown("header type", &h.header_type)
                })?;
            if self.prog.phv.header_id(&h.name).is_some() {
                return Err(LoadError::Duplicate {
                    kind: "header",
                    name: h.name.clone(),
                });
            }
            let hid = self.prog.phv.push_header(&h.name, ht, h.metadata);
            self.header_ids.insert(h.id, hid);
        }

        for s in &doc.header_stacks {
            let ht = self
                .prog
                .header_types
                .get(&s.header_type)
                .cloned()
                .ok_or_else(|| {
                    LoadError::unknown("header type", &s.header_type)
                })?;
            let members = s
                .header_ids
                .iter()
                .map(|id| {
                    self.header_ids
                        .get(id)
                        .copied()
                        .ok_or_else(|| LoadError::unknown("header id", id))
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.prog.phv.push_stack(&s.name, s.id, ht, members);
        }

        Ok(())
    }

    fn build_parser(
        &self,
        name: &str,
        id: u32,
        init: &str,
        states_ir: &[ParseStateIr],
    ) -> Result<Parser, LoadError> {
        let state_id = |n: &str| {
            states_ir
                .iter()
                .position(|s| s.name == n)
                .map(StateId)
                .ok_or_else(|| LoadError::unknown("parse state", n))
        };

        let mut states = Vec::with_capacity(states_ir.len());
        for sir in states_ir {
            let mut state = ParseState::new(&sir.name, sir.id);

            for op in &sir.parser_ops {
                let ctx = format!("parse state {}", sir.name);
                let pop = match (op.op.as_str(), op.parameters.as_slice()) {
                    ("extract", [p]) if p.kind == "regular" => {
                        let name = value_str(&p.value, &ctx)?;
                        ParserOp::Extract(self.header(name)?)
                    }
                    ("extract", [p]) if p.kind == "stack" => {
                        let name = value_str(&p.value, &ctx)?;
                        ParserOp::ExtractStack(self.stack(name)?)
                    }
                    ("set", [dst, src]) => {
                        let dst = self.field(&dst.value, &ctx)?;
                        let src = match src.kind.as_str() {
                            "field" => {
                                SetSrc::Field(self.field(&src.value, &ctx)?)
                            }
                            "hexstr" => SetSrc::Data(hex_data(
                                value_str(&src.value, &ctx)?,
                                &ctx,
                            )?),
                            "lookahead" => {
                                let (offset, bits) =
                                    value_pair(&src.value, &ctx)?;
                                SetSrc::Lookahead { offset, bits }
                            }
                            other => {
                                return Err(LoadError::Unsupported {
                                    kind: "set source",
                                    name: other.to_string(),
                                });
                            }
                        };
                        ParserOp::Set { dst, src }
                    }
                    (other, _) => {
                        return Err(LoadError::Unsupported {
                            kind: "parser op",
                            name: other.to_string(),
                        });
                    }
                };
                state.push_op(pop);
            }

            for k in &sir.transition_key {
                let ctx = format!("transition key of {}", sir.name);
                let elem = match k.kind.as_str() {
                    "field" => {
                        let field = self.field(&k.value, &ctx)?;
                        let bits = self.prog.phv.field_bits(field);
                        KeyElem::Field { field, bits }
                    }
                    "stack_field" => {
                        let f: FieldRef =
                            serde_json::from_value(k.value.clone())
                                .map_err(|e| LoadError::bad_value(&ctx, e))?;
                        let stack = self.stack(f.header())?;
                        let htype = &self.prog.phv.stack(stack).htype;
                        let field = htype
                            .field_index(f.field())
                            .ok_or_else(|| LoadError::unknown("field", &f))?;
                        let bits = htype.fields()[field].bits;
                        KeyElem::StackField { stack, field, bits }
                    }
                    "lookahead" => {
                        let (offset, bits) = value_pair(&k.value, &ctx)?;
                        KeyElem::Lookahead { offset, bits }
                    }
                    other => {
                        return Err(LoadError::Unsupported {
                            kind: "transition key element",
                            name: other.to_string(),
                        });
                    }
                };
                state.push_key_elem(elem);
            }

            let width = state.key_width();
            for t in &sir.transitions {
                let next = t.next_state.as_deref().map(state_id).transpose()?;
                if t.value == "default" {
                    state.set_default(next);
                    continue;
                }
                if t.mask.is_some() {
                    self.warn(&format!(
                        "parse state {}: transition mask ignored",
                        sir.name
                    ));
                }
                let ctx = format!("transition of {}", sir.name);
                let value = data::hexstr_to_width(&t.value, width)
                    .map_err(|e| LoadError::bad_value(&ctx, e))?;
                state.add_case(value, next);
            }

            states.push(state);
        }

        Ok(Parser::new(name, id, state_id(init)?, states))
    }

    fn build_buf(
        &self,
        owner: &str,
        input: &[TypedValue],
    ) -> Result<BufBuilder, LoadError> {
        let ctx = format!("calculation {owner}");
        let mut b = BufBuilder::new();
        for i in input {
            match i.kind.as_str() {
                "field" => {
                    let f = self.field(&i.value, &ctx)?;
                    b.push_back_field(f, self.prog.phv.field_bits(f));
                }
                "hexstr" => {
                    let s = value_str(&i.value, &ctx)?;
                    let bytes = data::hexstr_to_bytes(s)
                        .map_err(|e| LoadError::bad_value(&ctx, e))?;
                    let nbits =
                        i.bitwidth.unwrap_or((bytes.len() * 8) as u32);
                    let nbytes = bits::nbytes_for(nbits as usize);
                    let value = data::fit_to_width(&bytes, nbytes);
                    b.push_back_constant(value, nbits);
                }
                "header" => {
                    let name = value_str(&i.value, &ctx)?;
                    b.push_back_header(self.header(name)?);
                }
                "payload" => b.append_payload(),
                other => {
                    return Err(LoadError::Unsupported {
                        kind: "calculation input",
                        name: other.to_string(),
                    });
                }
            }
        }
        Ok(b)
    }

    fn load_stateful(&mut self, doc: &IrDocument) -> Result<(), LoadError> {
        for m in &doc.meter_arrays {
            let kind = m.kind.parse::<MeterType>().map_err(|e| {
                LoadError::bad_value(format!("meter {}", m.name), e)
            })?;
            let meter =
                MeterArray::new(&m.name, m.id, kind, m.rate_count, m.size);
            self.prog.meters.insert(m.name.clone(), Arc::new(meter));
        }

        // Direct counters belong to their table.
        for c in doc.counter_arrays.iter().filter(|c| !c.is_direct) {
            let counter = CounterArray::new(&c.name, c.id, c.size);
            self.prog.counters.insert(c.name.clone(), Arc::new(counter));
        }

        for r in &doc.register_arrays {
            let reg = RegisterArray::new(&r.name, r.id, r.size, r.bitwidth);
            self.prog.registers.insert(r.name.clone(), Arc::new(reg));
        }
        Ok(())
    }

    fn build_action(&mut self, a: &ActionIr) -> Result<ActionFn, LoadError> {
        let rd = a
            .runtime_data
            .iter()
            .map(|r| RuntimeData { name: r.name.clone(), bits: r.bitwidth })
            .collect();
        let mut action = ActionFn::new(&a.name, a.id, rd);
        let ctx = format!("action {}", a.name);

        for call in &a.primitives {
            let prim = self
                .opts
                .primitives
                .get(&call.op)
                .ok_or_else(|| LoadError::UnknownPrimitive(call.op.clone()))?;
            if prim.arity() != call.parameters.len() {
                return Err(LoadError::Arity {
                    name: call.op.clone(),
                    expected: prim.arity(),
                    got: call.parameters.len(),
                });
            }

            let mut params = Vec::with_capacity(call.parameters.len());
            for p in &call.parameters {
                let param = match p.kind.as_str() {
                    "hexstr" => {
                        let s = value_str(&p.value, &ctx)?;
                        ActionParam::Const(hex_data(s, &ctx)?)
                    }
                    "runtime_data" => {
                        let idx = value_u32(&p.value, &ctx)? as usize;
                        if idx >= a.runtime_data.len() {
                            let msg = format!("runtime data {idx} unbound");
                            return Err(LoadError::bad_value(&ctx, msg));
                        }
                        ActionParam::ActionData(idx)
                    }
                    "field" => {
                        let f = self.field(&p.value, &ctx)?;
                        self.arith.insert(f);
                        ActionParam::Field(f)
                    }
                    "header" => {
                        let h = self.header(value_str(&p.value, &ctx)?)?;
                        self.arith_headers.insert(h);
                        ActionParam::Header(h)
                    }
                    "header_stack" => {
                        let name = value_str(&p.value, &ctx)?;
                        ActionParam::Stack(self.stack(name)?)
                    }
                    "calculation" => {
                        let name = value_str(&p.value, &ctx)?;
                        let c = self.prog.calculations.get(name).ok_or_else(|| {
                            LoadError::unknown("calculation", name)
                        })?;
                        ActionParam::Calculation(c.clone())
                    }
                    "meter_array" => {
                        let name = value_str(&p.value, &ctx)?;
                        let m = self.prog.meters.get(name).ok_or_else(|| {
                            LoadError::unknown("meter array", name)
                        })?;
                        ActionParam::Meter(m.clone())
                    }
                    "counter_array" => {
                        let name = value_str(&p.value, &ctx)?;
                        let c = self.prog.counters.get(name).ok_or_else(|| {
                            LoadError::unknown("counter array", name)
                        })?;
                        ActionParam::Counter(c.clone())
                    }
                    "register_array" => {
                        let name = value_str(&p.value, &ctx)?;
                        let r = self.prog.registers.get(name).ok_or_else(|| {
                            LoadError::unknown("register array", name)
                        })?;
                        ActionParam::Register(r.clone())
                    }
                    other => {
                        return Err(LoadError::Unsupported {
                            kind: "action parameter",
                            name: other.to_string(),
                        });
                    }
                };
                params.push(param);
            }
            for &i in prim.value_params() {
                if !params.get(i).is_some_and(ActionParam::is_value) {
                    return Err(LoadError::bad_value(
                        &ctx,
                        format!("{} parameter {i} is not a value", call.op),
                    ));
                }
            }

            action.push_back_primitive(PrimitiveCall::new(prim, params));
        }

        Ok(action)
    }

    fn parse_match_kind(s: &str) -> Result<MatchKind, LoadError> {
        s.parse().map_err(|_| LoadError::BadMatchType(s.to_string()))
    }

    fn build_table(&self, t: &TableIr) -> Result<MatchTable, LoadError> {
        let kind: TableKind = t
            .kind
            .parse()
            .map_err(|_| LoadError::BadTableType(t.kind.clone()))?;
        let ctx = format!("table {}", t.name);

        let mut key = MatchKeyBuilder::new();
        for k in &t.key {
            let mk = Self::parse_match_kind(&k.match_type)?;
            if mk == MatchKind::Valid {
                let name = value_str(&k.target, &ctx)?;
                key.push_back_valid_header(self.header(name)?);
            } else {
                let f = self.field(&k.target, &ctx)?;
                key.push_back_field(f, self.prog.phv.field_bits(f), mk);
            }
        }
        let fallback =
            t.match_type.as_deref().map(Self::parse_match_kind).transpose()?;

        let actions = t
            .actions
            .iter()
            .map(|a| {
                self.prog
                    .actions
                    .get(a)
                    .cloned()
                    .ok_or_else(|| LoadError::unknown("action", a))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let cfg = TableConfig {
            name: t.name.clone(),
            id: t.id,
            kind,
            max_size: t.max_size,
            with_counters: t.with_counters,
            support_timeout: t.support_timeout,
            unit: key.unit_kind(fallback),
        };
        let mut table = MatchTable::new(cfg, key, actions);

        if kind == TableKind::IndirectWs {
            let sel = t.selector.as_ref().ok_or_else(|| {
                LoadError::Unsupported {
                    kind: "indirect_ws table without selector",
                    name: t.name.clone(),
                }
            })?;
            if sel.algo != hash::DEFAULT_HASH {
                self.warn(&format!(
                    "table {}: selector algorithm {} ignored, using {}",
                    t.name,
                    sel.algo,
                    hash::DEFAULT_HASH
                ));
            }
            let mut b = BufBuilder::new();
            for i in &sel.input {
                if i.kind != "field" {
                    self.warn(&format!(
                        "table {}: selector input of type {} ignored",
                        t.name, i.kind
                    ));
                    continue;
                }
                let f = self.field(&i.value, &ctx)?;
                b.push_back_field(f, self.prog.phv.field_bits(f));
            }
            let name = format!("{}_selector", t.name);
            table.set_selector(Arc::new(Calculation::new(
                &name,
                t.id,
                hash::DEFAULT_HASH,
                b,
                hash::xxh64,
            )));
        }

        if let Some(def) = &t.default_action {
            let data = def
                .data
                .iter()
                .map(|d| hex_data(d, &ctx))
                .collect::<Result<Vec<_>, _>>()?;
            table.set_initial_default(&def.name, &data).map_err(|source| {
                LoadError::Table { table: t.name.clone(), source }
            })?;
        }

        Ok(table)
    }

    fn compile_expr(
        &mut self,
        node: &TypedValue,
        out: &mut Expression,
    ) -> Result<(), LoadError> {
        let ctx = "expression";
        match node.kind.as_str() {
            "expression" => {
                let e: ExpressionIr = serde_json::from_value(node.value.clone())
                    .map_err(|e| LoadError::bad_value(ctx, e))?;
                let op: ExprOpcode = e
                    .op
                    .parse()
                    .map_err(|_| LoadError::Unsupported {
                        kind: "operator",
                        name: e.op.clone(),
                    })?;
                if op.is_unary() {
                    let Some(operand) = e.right.as_ref().or(e.left.as_ref())
                    else {
                        return Err(LoadError::bad_value(
                            ctx,
                            format!("{} without operand", e.op),
                        ));
                    };
                    self.compile_expr(operand, out)?;
                } else {
                    let (Some(l), Some(r)) = (&e.left, &e.right) else {
                        return Err(LoadError::bad_value(
                            ctx,
                            format!("{} needs two operands", e.op),
                        ));
                    };
                    self.compile_expr(l, out)?;
                    self.compile_expr(r, out)?;
                }
                out.push_back_op(op);
            }
            "field" => {
                let f = self.field(&node.value, ctx)?;
                self.arith.insert(f);
                out.push_back_load_field(f);
            }
            "header" => {
                let name = value_str(&node.value, ctx)?;
                out.push_back_load_header(self.header(name)?);
            }
            "hexstr" => {
                let s = value_str(&node.value, ctx)?;
                out.push_back_load_const(hex_data(s, ctx)?);
            }
            "bool" => {
                let b = node.value.as_bool().ok_or_else(|| {
                    LoadError::bad_value(ctx, "expected a boolean")
                })?;
                out.push_back_load_bool(b);
            }
            other => return Err(LoadError::BadExpression(other.to_string())),
        }
        Ok(())
    }

    fn node(&self, name: Option<&str>) -> Result<Option<NodeRef>, LoadError> {
        name.map(|n| {
            self.prog
                .graph
                .lookup(n)
                .ok_or_else(|| LoadError::unknown("control node", n))
        })
        .transpose()
    }

    fn load_pipelines(
        &mut self,
        pipes: &[PipelineIr],
    ) -> Result<(), LoadError> {
        let mut names = BTreeSet::new();
        let mut dup = |n: &str| -> Result<(), LoadError> {
            if names.insert(n.to_string()) {
                Ok(())
            } else {
                Err(LoadError::Duplicate {
                    kind: "control node",
                    name: n.to_string(),
                })
            }
        };

        // Pass 1: every node, no edges.
        for p in pipes {
            for t in &p.tables {
                dup(&t.name)?;
                let table = self.build_table(t)?;
                let idx = self.prog.graph.tables.len();
                if table.supports_timeout() {
                    self.prog.ageing.add_table(idx);
                }
                self.prog.graph.tables.push(table);
            }
            for c in &p.conditionals {
                dup(&c.name)?;
                let mut expr = Expression::new();
                if let Some(e) = &c.expression {
                    self.compile_expr(e, &mut expr)?;
                }
                let cond = Conditional::new(&c.name, c.id, expr);
                self.prog.graph.conditionals.push(cond);
            }
        }

        // Pass 2: edges.
        for p in pipes {
            for t in &p.tables {
                let Some(idx) =
                    self.prog.graph.tables.iter().position(|x| x.name == t.name)
                else {
                    continue;
                };

                let mut edges = Vec::with_capacity(t.next_tables.len());
                for (action, next) in &t.next_tables {
                    let aidx = self.prog.graph.tables[idx]
                        .action_index(action)
                        .ok_or_else(|| LoadError::unknown("action", action))?;
                    edges.push((aidx, self.node(next.as_deref())?));
                }
                let base = self.node(t.base_default_next.as_deref())?;

                let table = &mut self.prog.graph.tables[idx];
                for (aidx, next) in edges {
                    table.set_next_node(aidx, next);
                }
                table.set_base_default_next(base);
            }

            for c in &p.conditionals {
                let t = self.node(c.true_next.as_deref())?;
                let f = self.node(c.false_next.as_deref())?;
                let node = self.prog.graph.lookup(&c.name);
                if let Some(NodeRef::Conditional(idx)) = node {
                    let cond = &mut self.prog.graph.conditionals[idx];
                    cond.set_next_node_if_true(t);
                    cond.set_next_node_if_false(f);
                }
            }
        }

        for p in pipes {
            let init = self.node(p.init_table.as_deref())?;
            if let Some(start) = init {
                if let Some(node) = self.prog.graph.find_cycle(start) {
                    return Err(LoadError::Cycle {
                        pipeline: p.name.clone(),
                        node: self.prog.graph.node_name(node).to_string(),
                    });
                }
            }
            self.prog.pipelines.push(Pipeline::new(&p.name, p.id, init));
        }

        Ok(())
    }

    fn load_checksums(&mut self, doc: &IrDocument) -> Result<(), LoadError> {
        for c in &doc.checksums {
            let dst = self.field_ref(&c.target)?;
            let kind = match c.kind.as_str() {
                "ipv4" => ChecksumKind::Ipv4,
                "generic" => {
                    let name = c.calculation.as_deref().ok_or_else(|| {
                        LoadError::bad_value(
                            format!("checksum {}", c.name),
                            "generic checksum without a calculation",
                        )
                    })?;
                    let calc =
                        self.prog.calculations.get(name).ok_or_else(|| {
                            LoadError::unknown("calculation", name)
                        })?;
                    ChecksumKind::Calc(calc.clone())
                }
                other => {
                    return Err(LoadError::Unsupported {
                        kind: "checksum type",
                        name: other.to_string(),
                    });
                }
            };

            let csum = Arc::new(FieldChecksum::new(&c.name, c.id, dst, kind));
            for d in &mut self.prog.deparsers {
                d.push_back_checksum(csum.clone());
            }
            self.prog.checksums.push(csum);
        }
        Ok(())
    }

    fn build_field_list(
        &self,
        l: &FieldListIr,
    ) -> Result<FieldList, LoadError> {
        let ctx = format!("field list {}", l.id);
        let mut fl = FieldList::new(l.id, l.name.clone());
        for e in &l.elements {
            if e.kind != "field" {
                return Err(LoadError::Unsupported {
                    kind: "field list element",
                    name: e.kind.clone(),
                });
            }
            fl.push_back_field(self.field(&e.value, &ctx)?);
        }
        Ok(fl)
    }

    fn validate_fields(&mut self, doc: &IrDocument) -> Result<(), LoadError> {
        for f in &self.opts.required_fields {
            if self.prog.phv.field_id(f.header(), f.field()).is_none() {
                return Err(LoadError::RequiredField(f.to_string()));
            }
        }

        let phv = &mut self.prog.phv;
        phv.disable_all_arith();
        for f in &self.arith {
            phv.enable_arith(*f);
        }
        for h in &self.arith_headers {
            phv.enable_header_arith(*h);
        }

        let forced =
            doc.force_arith.iter().flatten().chain(&self.opts.arith_fields);
        for f in forced {
            match self.prog.phv.field_id(f.header(), f.field()) {
                Some(id) => self.prog.phv.enable_arith(id),
                None => self.log.log(
                    LogLevel::Warn,
                    &format!("cannot force arithmetic on missing field {f}"),
                ),
            }
        }

        Ok(())
    }
}
