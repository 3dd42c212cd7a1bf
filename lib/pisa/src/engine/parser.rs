// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The parser state machine.
//!
//! Each [`ParseState`] runs its operations in order, builds a transition
//! key, and looks the key up in its switch table. The cursor only moves
//! when a header is extracted; look-ahead reads never consume bytes.
//! Declared transition masks are not supported and are dropped by the
//! loader, so every switch case is an exact match.

use super::bits;
use super::data::Data;
use super::packet::Packet;
use super::phv::FieldId;
use super::phv::HeaderId;
use super::phv::StackId;
use core::fmt;
use core::fmt::Display;
use std::collections::HashMap;

/// Position of a state within its parser.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StateId(pub usize);

/// Where a `set` operation takes its value from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SetSrc {
    Field(FieldId),
    Data(Data),
    /// `bits` bits starting `offset` bits past the cursor.
    Lookahead { offset: u32, bits: u32 },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParserOp {
    Extract(HeaderId),
    ExtractStack(StackId),
    Set { dst: FieldId, src: SetSrc },
}

/// One element of a transition key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyElem {
    /// A field and its width in bits.
    Field { field: FieldId, bits: u32 },
    /// A field of the most recently extracted member of a stack.
    StackField { stack: StackId, field: usize, bits: u32 },
    Lookahead { offset: u32, bits: u32 },
}

impl KeyElem {
    pub fn nbytes(&self) -> usize {
        let bits = match self {
            Self::Field { bits, .. } => *bits,
            Self::StackField { bits, .. } => *bits,
            Self::Lookahead { bits, .. } => *bits,
        };
        bits::nbytes_for(bits as usize)
    }
}

/// Where a transition leads. `None` accepts the packet.
pub type NextState = Option<StateId>;

#[derive(Clone, Debug)]
pub struct ParseState {
    pub name: String,
    pub id: u32,
    ops: Vec<ParserOp>,
    key: Vec<KeyElem>,
    cases: HashMap<Vec<u8>, NextState>,
    default: Option<NextState>,
}

impl ParseState {
    pub fn new(name: &str, id: u32) -> Self {
        Self {
            name: name.to_string(),
            id,
            ops: vec![],
            key: vec![],
            cases: HashMap::new(),
            default: None,
        }
    }

    pub fn push_op(&mut self, op: ParserOp) {
        self.ops.push(op);
    }

    pub fn push_key_elem(&mut self, elem: KeyElem) {
        self.key.push(elem);
    }

    /// Width of the transition key in bytes.
    pub fn key_width(&self) -> usize {
        self.key.iter().map(KeyElem::nbytes).sum()
    }

    /// Add a case; `value` must be exactly [`Self::key_width`] bytes.
    pub fn add_case(&mut self, value: Vec<u8>, next: NextState) {
        self.cases.entry(value).or_insert(next);
    }

    pub fn set_default(&mut self, next: NextState) {
        self.default = Some(next);
    }

    pub fn ops(&self) -> &[ParserOp] {
        &self.ops
    }

    pub fn ncases(&self) -> usize {
        self.cases.len()
    }

    fn run_ops(
        &self,
        pkt: &mut Packet,
        cursor: &mut usize,
    ) -> Result<(), ParseError> {
        for op in &self.ops {
            match op {
                ParserOp::Extract(hid) => {
                    let hid = *hid;
                    extract_at(pkt, hid, cursor, &self.name)?;
                }

                ParserOp::ExtractStack(sid) => {
                    let hid = pkt.phv.stack_push(*sid).ok_or_else(|| {
                        ParseError::StackFull {
                            state: self.name.clone(),
                            stack: pkt.phv.stack(*sid).name.clone(),
                        }
                    })?;
                    extract_at(pkt, hid, cursor, &self.name)?;
                }

                ParserOp::Set { dst, src } => {
                    let val = match src {
                        SetSrc::Field(f) => pkt.phv.field(*f).bytes().to_vec(),
                        SetSrc::Data(d) => d.to_bytes(16),
                        SetSrc::Lookahead { offset, bits } => {
                            lookahead(pkt, *cursor, *offset, *bits)
                                .ok_or_else(|| self.truncated(*cursor))?
                        }
                    };
                    if let Some(f) = pkt.phv.field_mut(*dst) {
                        f.set_bytes(&val);
                    }
                }
            }
        }

        Ok(())
    }

    fn build_key(
        &self,
        pkt: &Packet,
        cursor: usize,
    ) -> Result<Vec<u8>, ParseError> {
        let mut key = Vec::with_capacity(self.key_width());
        for elem in &self.key {
            match elem {
                KeyElem::Field { field, .. } => {
                    key.extend_from_slice(pkt.phv.field(*field).bytes());
                }

                KeyElem::StackField { stack, field, bits } => {
                    match pkt.phv.stack(*stack).last() {
                        Some(hid) => {
                            let f = pkt.phv.field(FieldId {
                                header: hid,
                                field: *field,
                            });
                            key.extend_from_slice(f.bytes());
                        }
                        // Nothing extracted yet reads as zero.
                        None => key.extend(core::iter::repeat_n(
                            0,
                            bits::nbytes_for(*bits as usize),
                        )),
                    }
                }

                KeyElem::Lookahead { offset, bits } => {
                    let v = lookahead(pkt, cursor, *offset, *bits)
                        .ok_or_else(|| self.truncated(cursor))?;
                    key.extend_from_slice(&v);
                }
            }
        }
        Ok(key)
    }

    /// Run this state against `pkt`, returning where to go next.
    pub fn step(
        &self,
        pkt: &mut Packet,
        cursor: &mut usize,
    ) -> Result<NextState, ParseError> {
        self.run_ops(pkt, cursor)?;

        if self.cases.is_empty() && self.default.is_none() {
            return Ok(None);
        }

        let key = self.build_key(pkt, *cursor)?;
        match self.cases.get(&key) {
            Some(next) => Ok(*next),
            None => self.default.ok_or_else(|| ParseError::NoTransition {
                state: self.name.clone(),
                key,
            }),
        }
    }

    fn truncated(&self, cursor: usize) -> ParseError {
        ParseError::Truncated { state: self.name.clone(), offset: cursor }
    }
}

fn extract_at(
    pkt: &mut Packet,
    hid: HeaderId,
    cursor: &mut usize,
    state: &str,
) -> Result<(), ParseError> {
    let start = *cursor;
    let buf = pkt.buf().get(start..).unwrap_or(&[]).to_vec();
    match pkt.phv.header_mut(hid).extract(&buf) {
        Some(n) => {
            *cursor += n;
            Ok(())
        }
        None => Err(ParseError::Truncated {
            state: state.to_string(),
            offset: start,
        }),
    }
}

fn lookahead(
    pkt: &Packet,
    cursor: usize,
    offset: u32,
    nbits: u32,
) -> Option<Vec<u8>> {
    let bit_off = cursor * 8 + offset as usize;
    if bit_off + nbits as usize > pkt.len() * 8 {
        return None;
    }
    Some(bits::extract_bits(pkt.buf(), bit_off, nbits as usize))
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ParseError {
    /// No case matched the transition key and there is no default.
    NoTransition { state: String, key: Vec<u8> },
    /// The frame ended before an extract or look-ahead could complete.
    Truncated { state: String, offset: usize },
    /// Extraction into a stack with no free member.
    StackFull { state: String, stack: String },
    /// A state was re-entered without the cursor moving.
    Loop { state: String },
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoTransition { state, key } => write!(
                f,
                "no transition from state {state} for key {}",
                crate::api::HexBytes(key)
            ),
            Self::Truncated { state, offset } => {
                write!(f, "packet truncated in state {state} at byte {offset}")
            }
            Self::StackFull { state, stack } => {
                write!(f, "stack {stack} full in state {state}")
            }
            Self::Loop { state } => {
                write!(f, "state {state} re-entered without progress")
            }
        }
    }
}

/// The states visited by one parse, in order, and where the payload
/// starts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseTrace {
    pub states: Vec<StateId>,
    pub payload_offset: usize,
}

#[derive(Clone, Debug)]
pub struct Parser {
    pub name: String,
    pub id: u32,
    init: StateId,
    states: Vec<ParseState>,
}

impl Parser {
    pub fn new(
        name: &str,
        id: u32,
        init: StateId,
        states: Vec<ParseState>,
    ) -> Self {
        Self { name: name.to_string(), id, init, states }
    }

    pub fn states(&self) -> &[ParseState] {
        &self.states
    }

    pub fn state(&self, id: StateId) -> &ParseState {
        &self.states[id.0]
    }

    pub fn init_state(&self) -> StateId {
        self.init
    }

    /// Parse `pkt` from the start of its buffer, filling in its PHV.
    pub fn parse(&self, pkt: &mut Packet) -> Result<ParseTrace, ParseError> {
        let mut cursor = 0;
        let mut states = vec![];
        // Cursor position at each state's last entry.
        let mut entered_at: Vec<Option<usize>> = vec![None; self.states.len()];
        let mut next = Some(self.init);

        while let Some(sid) = next {
            let state = &self.states[sid.0];
            if entered_at[sid.0] == Some(cursor) {
                return Err(ParseError::Loop { state: state.name.clone() });
            }
            entered_at[sid.0] = Some(cursor);
            states.push(sid);
            next = state.step(pkt, &mut cursor)?;
        }

        pkt.set_payload_offset(cursor);
        Ok(ParseTrace { states, payload_offset: cursor })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::header::HeaderType;
    use crate::engine::phv::PhvTemplate;
    use std::sync::Arc;

    fn setup() -> (PhvTemplate, Parser) {
        let eth = Arc::new(HeaderType::new(
            "ethernet_t",
            0,
            &[
                ("dstAddr".to_string(), 48),
                ("srcAddr".to_string(), 48),
                ("etherType".to_string(), 16),
            ],
        ));
        let vlan = Arc::new(HeaderType::new(
            "vlan_t",
            1,
            &[("tci".to_string(), 16), ("etherType".to_string(), 16)],
        ));
        let mut t = PhvTemplate::new();
        let eth_id = t.push_header("ethernet", eth, false);
        let v0 = t.push_header("vlan0", vlan.clone(), false);
        let v1 = t.push_header("vlan1", vlan.clone(), false);
        let sid = t.push_stack("vlan", 0, vlan, vec![v0, v1]);

        let mut start = ParseState::new("start", 0);
        start.push_op(ParserOp::Extract(eth_id));
        start.push_key_elem(KeyElem::Field {
            field: t.field_id("ethernet", "etherType").unwrap(),
            bits: 16,
        });
        start.add_case(vec![0x81, 0x00], Some(StateId(1)));
        start.add_case(vec![0x08, 0x00], None);

        let mut vlan_st = ParseState::new("parse_vlan", 1);
        vlan_st.push_op(ParserOp::ExtractStack(sid));
        vlan_st.push_key_elem(KeyElem::StackField {
            stack: sid,
            field: 1,
            bits: 16,
        });
        vlan_st.add_case(vec![0x81, 0x00], Some(StateId(1)));
        vlan_st.set_default(None);

        let p = Parser::new("parser", 0, StateId(0), vec![start, vlan_st]);
        (t, p)
    }

    fn frame(ethertype: [u8; 2], tags: &[[u8; 2]]) -> Vec<u8> {
        let mut f = vec![0xaa; 12];
        f.extend_from_slice(&ethertype);
        for t in tags {
            f.extend_from_slice(&[0x00, 0x05]);
            f.extend_from_slice(t);
        }
        f.extend_from_slice(b"payload");
        f
    }

    #[test]
    fn accepts_untagged() {
        let (t, p) = setup();
        let mut pkt = Packet::new(1, frame([0x08, 0x00], &[]), t.new_phv());
        let trace = p.parse(&mut pkt).unwrap();
        assert_eq!(trace.states, vec![StateId(0)]);
        assert_eq!(pkt.payload(), b"payload");
    }

    #[test]
    fn walks_stack() {
        let (t, p) = setup();
        let buf = frame([0x81, 0x00], &[[0x81, 0x00], [0x08, 0x00]]);
        let mut pkt = Packet::new(1, buf, t.new_phv());
        let trace = p.parse(&mut pkt).unwrap();
        assert_eq!(trace.states, vec![StateId(0), StateId(1), StateId(1)]);
        assert_eq!(trace.payload_offset, 22);
        let sid = t.stack_id("vlan").unwrap();
        assert_eq!(pkt.phv.stack(sid).depth(), 2);
    }

    #[test]
    fn stack_overflow() {
        let (t, p) = setup();
        let buf =
            frame([0x81, 0x00], &[[0x81, 0x00], [0x81, 0x00], [0x08, 0x00]]);
        let mut pkt = Packet::new(1, buf, t.new_phv());
        assert!(matches!(p.parse(&mut pkt), Err(ParseError::StackFull { .. })));
    }

    #[test]
    fn no_transition() {
        let (t, p) = setup();
        let mut pkt = Packet::new(1, frame([0x86, 0xdd], &[]), t.new_phv());
        assert_eq!(
            p.parse(&mut pkt),
            Err(ParseError::NoTransition {
                state: "start".to_string(),
                key: vec![0x86, 0xdd],
            })
        );
    }

    #[test]
    fn truncated() {
        let (t, p) = setup();
        let mut pkt = Packet::new(1, vec![0; 10], t.new_phv());
        assert!(matches!(p.parse(&mut pkt), Err(ParseError::Truncated { .. })));
    }

    #[test]
    fn lookahead_does_not_advance() {
        let (t, _) = setup();
        let eth_type = t.field_id("ethernet", "etherType").unwrap();
        let mut st = ParseState::new("peek", 0);
        st.push_op(ParserOp::Set {
            dst: eth_type,
            src: SetSrc::Lookahead { offset: 4, bits: 8 },
        });
        st.push_key_elem(KeyElem::Lookahead { offset: 0, bits: 4 });
        st.add_case(vec![0x0a], None);
        let p = Parser::new("peek", 0, StateId(0), vec![st]);

        let mut pkt = Packet::new(1, vec![0xab, 0xcd], t.new_phv());
        let trace = p.parse(&mut pkt).unwrap();
        assert_eq!(trace.payload_offset, 0);
        assert_eq!(pkt.phv.field(eth_type).get(), Data(0xbc));
    }

    #[test]
    fn loop_without_progress() {
        let (t, _) = setup();
        let mut st = ParseState::new("spin", 0);
        st.set_default(Some(StateId(0)));
        let p = Parser::new("spin", 0, StateId(0), vec![st]);
        let mut pkt = Packet::new(1, vec![0; 4], t.new_phv());
        assert!(matches!(p.parse(&mut pkt), Err(ParseError::Loop { .. })));
    }
}
