// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A switch hosting one loaded program.
//!
//! A packet runs parse, ingress, replication or unicast, egress, and
//! deparse. The switch is `Sync`; any number of worker threads may call
//! [`Switch::process`] at once while a control-plane thread edits tables
//! or LAG membership, or swaps in a new program.

use super::data::Data;
use super::hash;
use super::loader::LoadError;
use super::loader::LoadOptions;
use super::loader::Program;
use super::packet::Packet;
use super::parser::ParseError;
use super::phv::FieldId;
use super::pre::McSimplePreLag;
use crate::api::DROP_PORT;
use crate::api::FieldRef;
use crate::api::IrDocument;
use crate::api::McIn;
use crate::api::McOut;
use crate::api::PortNum;
use crate::api::Rid;
use crate::api::Stage;
use crate::provider::LogLevel;
use crate::provider::Providers;
use crate::sync::KRwLock;
use crate::time::Moment;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

fn std_meta(field: &str) -> FieldRef {
    FieldRef::new("standard_metadata", field)
}

/// How the switch binds to a loaded program.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct SwitchConfig {
    pub parser: String,
    pub ingress: String,
    pub egress: String,
    pub deparser: String,
    /// Written by the switch with the port a packet arrived on.
    pub ingress_port: FieldRef,
    /// Read after ingress: where a unicast packet goes.
    pub egress_spec: FieldRef,
    /// Written by the switch before egress.
    pub egress_port: FieldRef,
    /// Read after ingress: a non-zero value selects a multicast group.
    pub mcast_grp: Option<FieldRef>,
    /// Written by the switch before egress with the copy's rid.
    pub egress_rid: Option<FieldRef>,
    /// Additional fields that must exist in the program.
    pub required_fields: Vec<FieldRef>,
    /// Fields forced into arithmetic mode.
    pub arith_fields: Vec<FieldRef>,
    pub drop_port: PortNum,
    /// Calculation whose result is the LAG flow hash. Without one, the
    /// ingress port is hashed.
    pub lag_hash: Option<String>,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            parser: "parser".to_string(),
            ingress: "ingress".to_string(),
            egress: "egress".to_string(),
            deparser: "deparser".to_string(),
            ingress_port: std_meta("ingress_port"),
            egress_spec: std_meta("egress_spec"),
            egress_port: std_meta("egress_port"),
            mcast_grp: Some(std_meta("mcast_grp")),
            egress_rid: Some(std_meta("egress_rid")),
            required_fields: vec![],
            arith_fields: vec![],
            drop_port: DROP_PORT,
            lag_hash: None,
        }
    }
}

impl SwitchConfig {
    pub fn pipeline(&self, stage: Stage) -> &str {
        match stage {
            Stage::Ingress => &self.ingress,
            Stage::Egress => &self.egress,
        }
    }

    fn load_options(&self) -> LoadOptions {
        let mut required = vec![
            self.ingress_port.clone(),
            self.egress_spec.clone(),
            self.egress_port.clone(),
        ];
        required.extend(self.mcast_grp.iter().cloned());
        required.extend(self.egress_rid.iter().cloned());
        required.extend(self.required_fields.iter().cloned());

        LoadOptions {
            required_fields: required,
            arith_fields: self.arith_fields.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("no program loaded")]
    NoProgram,

    #[error("program has no {kind} named {name}")]
    Missing { kind: &'static str, name: String },

    #[error("parse failed: {0}")]
    Parse(ParseError),
}

/// One packet leaving the switch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EgressPacket {
    pub port: PortNum,
    pub rid: Rid,
    pub bytes: Vec<u8>,
}

struct Bound {
    ingress_port: FieldId,
    egress_spec: FieldId,
    egress_port: FieldId,
    mcast_grp: Option<FieldId>,
    egress_rid: Option<FieldId>,
}

struct Loaded {
    program: Arc<Program>,
    bound: Bound,
}

pub struct Switch {
    cfg: SwitchConfig,
    opts: LoadOptions,
    providers: Providers,
    loaded: KRwLock<Option<Arc<Loaded>>>,
    pre: McSimplePreLag,
}

impl Switch {
    pub fn new(cfg: SwitchConfig, providers: Providers) -> Self {
        let opts = cfg.load_options();
        Self {
            cfg,
            opts,
            providers,
            loaded: KRwLock::new(None),
            pre: McSimplePreLag::new(),
        }
    }

    /// Use `opts` for every later load. The config's own required and
    /// arithmetic fields are added to it.
    pub fn with_load_options(mut self, opts: LoadOptions) -> Self {
        let base = self.cfg.load_options();
        let mut opts = opts;
        opts.required_fields.extend(base.required_fields);
        opts.arith_fields.extend(base.arith_fields);
        self.opts = opts;
        self
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.cfg
    }

    pub fn pre(&self) -> &McSimplePreLag {
        &self.pre
    }

    /// The current program, if one is loaded.
    pub fn program(&self) -> Option<Arc<Program>> {
        self.loaded.read().as_ref().map(|l| l.program.clone())
    }

    /// Load `doc`, replacing the current program only on success.
    pub fn load(&self, doc: &IrDocument) -> Result<(), LoadError> {
        let program = Program::load(doc, &self.opts, &self.providers)?;
        self.install(program)
    }

    pub fn load_json(&self, json: &str) -> Result<(), LoadError> {
        let program = Program::from_json(json, &self.opts, &self.providers)?;
        self.install(program)
    }

    fn install(&self, program: Program) -> Result<(), LoadError> {
        let field = |f: &FieldRef| {
            program.field_id(f.header(), f.field()).ok_or_else(|| {
                LoadError::RequiredField(f.to_string())
            })
        };
        let bound = Bound {
            ingress_port: field(&self.cfg.ingress_port)?,
            egress_spec: field(&self.cfg.egress_spec)?,
            egress_port: field(&self.cfg.egress_port)?,
            mcast_grp: self.cfg.mcast_grp.as_ref().map(field).transpose()?,
            egress_rid: self.cfg.egress_rid.as_ref().map(field).transpose()?,
        };
        if let Some(f) = bound.mcast_grp {
            let bits = program.phv().field_bits(f);
            if bits > u16::BITS {
                return Err(LoadError::BadValue {
                    context: "multicast group field".to_string(),
                    msg: format!("{bits} bits wide, at most 16 allowed"),
                });
            }
        }

        let loaded = Arc::new(Loaded { program: Arc::new(program), bound });
        *self.loaded.write() = Some(loaded);
        self.providers.log.log(LogLevel::Note, "program loaded");
        Ok(())
    }

    /// Clear all runtime state: table entries, stateful arrays, learn
    /// buffers, ageing bookkeeping, and the replication engine.
    pub fn reset_state(&self) {
        if let Some(loaded) = self.loaded.read().as_ref() {
            loaded.program.reset_state();
        }
        self.pre.reset_state();
    }

    pub fn sweep_ageing(&self, now: Moment) -> usize {
        self.loaded.read().as_ref().map_or(0, |l| l.program.sweep_ageing(now))
    }

    fn flow_hash(&self, prog: &Program, pkt: &Packet) -> u64 {
        match self.cfg.lag_hash.as_deref().and_then(|n| prog.calculation(n)) {
            Some(calc) => calc.compute(pkt),
            None => hash::xxh64(&pkt.ingress_port().to_be_bytes()),
        }
    }

    /// Process one frame, returning the copies that leave the switch.
    pub fn process(
        &self,
        port: PortNum,
        bytes: &[u8],
    ) -> Result<Vec<EgressPacket>, SwitchError> {
        let loaded = self.loaded.read().clone().ok_or(SwitchError::NoProgram)?;
        let prog = &loaded.program;
        let bound = &loaded.bound;

        let missing = |kind, name: &str| SwitchError::Missing {
            kind,
            name: name.to_string(),
        };
        let parser = prog
            .parser(&self.cfg.parser)
            .ok_or_else(|| missing("parser", &self.cfg.parser))?;
        let ingress = prog
            .pipeline(&self.cfg.ingress)
            .ok_or_else(|| missing("pipeline", &self.cfg.ingress))?;
        let egress = prog
            .pipeline(&self.cfg.egress)
            .ok_or_else(|| missing("pipeline", &self.cfg.egress))?;
        let deparser = prog
            .deparser(&self.cfg.deparser)
            .ok_or_else(|| missing("deparser", &self.cfg.deparser))?;

        let mut pkt = Packet::new(port, bytes.to_vec(), prog.phv().new_phv());
        if let Some(f) = pkt.phv.field_mut(bound.ingress_port) {
            f.set(Data(u128::from(port)));
        }
        parser.parse(&mut pkt).map_err(SwitchError::Parse)?;

        ingress.apply(prog.graph(), &mut pkt, prog.learn());
        if pkt.is_dropped() {
            return Ok(vec![]);
        }

        let mgid = bound.mcast_grp.map_or(0, |f| pkt.phv.field(f).get().get());
        let copies = if mgid != 0 {
            let Ok(mgid) = u16::try_from(mgid) else {
                self.providers.log.log(
                    LogLevel::Warn,
                    &format!("multicast group {mgid} out of range, dropped"),
                );
                return Ok(vec![]);
            };
            let input = McIn { mgid, flow_hash: self.flow_hash(prog, &pkt) };
            self.pre.replicate(input)
        } else {
            let spec = pkt.phv.field(bound.egress_spec).get().get();
            match PortNum::try_from(spec) {
                Ok(p) if p != self.cfg.drop_port => {
                    vec![McOut { egress_port: p, rid: 0 }]
                }
                _ => vec![],
            }
        };

        let mut out = Vec::with_capacity(copies.len());
        for copy in copies {
            let mut epkt = pkt.clone();
            if let Some(f) = epkt.phv.field_mut(bound.egress_port) {
                f.set(Data(u128::from(copy.egress_port)));
            }
            let rid = bound.egress_rid.and_then(|f| epkt.phv.field_mut(f));
            if let Some(f) = rid {
                f.set(Data(u128::from(copy.rid)));
            }

            egress.apply(prog.graph(), &mut epkt, prog.learn());
            let spec = epkt.phv.field(bound.egress_spec).get();
            let drop = Data(u128::from(self.cfg.drop_port));
            if epkt.is_dropped() || spec == drop {
                continue;
            }

            out.push(EgressPacket {
                port: copy.egress_port,
                rid: copy.rid,
                bytes: deparser.deparse(&mut epkt),
            });
        }

        Ok(out)
    }
}
