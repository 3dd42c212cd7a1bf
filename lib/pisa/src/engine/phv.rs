// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The per-packet header vector (PHV).
//!
//! The loader builds a single [`PhvTemplate`] describing every header
//! instance and stack the program declares. Each packet gets its own
//! [`Phv`] cloned from the template, so packets never share field
//! storage.

use super::header::Field;
use super::header::Header;
use super::header::HeaderType;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Position of a header instance in the PHV.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HeaderId(pub usize);

/// A header instance plus the position of one of its fields.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct FieldId {
    pub header: HeaderId,
    pub field: usize,
}

/// Position of a header stack in the PHV.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StackId(pub usize);

/// A fixed-capacity stack of same-typed header instances.
#[derive(Clone, Debug)]
pub struct HeaderStack {
    pub name: String,
    pub id: u32,
    pub htype: Arc<HeaderType>,
    members: Vec<HeaderId>,
    /// Index of the next free member.
    next: usize,
}

impl HeaderStack {
    pub fn members(&self) -> &[HeaderId] {
        &self.members
    }

    pub fn capacity(&self) -> usize {
        self.members.len()
    }

    pub fn depth(&self) -> usize {
        self.next
    }

    /// The most recently pushed member.
    pub fn last(&self) -> Option<HeaderId> {
        self.next.checked_sub(1).map(|i| self.members[i])
    }
}

/// The load-time description of a PHV.
#[derive(Clone, Debug, Default)]
pub struct PhvTemplate {
    headers: Vec<Header>,
    stacks: Vec<HeaderStack>,
    header_names: BTreeMap<String, HeaderId>,
    stack_names: BTreeMap<String, StackId>,
}

impl PhvTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_header(
        &mut self,
        name: &str,
        htype: Arc<HeaderType>,
        metadata: bool,
    ) -> HeaderId {
        let id = HeaderId(self.headers.len());
        self.headers.push(Header::new(name, htype, metadata));
        self.header_names.insert(name.to_string(), id);
        id
    }

    pub fn push_stack(
        &mut self,
        name: &str,
        id: u32,
        htype: Arc<HeaderType>,
        members: Vec<HeaderId>,
    ) -> StackId {
        let sid = StackId(self.stacks.len());
        self.stacks.push(HeaderStack {
            name: name.to_string(),
            id,
            htype,
            members,
            next: 0,
        });
        self.stack_names.insert(name.to_string(), sid);
        sid
    }

    pub fn header_id(&self, name: &str) -> Option<HeaderId> {
        self.header_names.get(name).copied()
    }

    pub fn stack_id(&self, name: &str) -> Option<StackId> {
        self.stack_names.get(name).copied()
    }

    pub fn field_id(&self, header: &str, field: &str) -> Option<FieldId> {
        let hid = self.header_id(header)?;
        let idx = self.headers[hid.0].header_type().field_index(field)?;
        Some(FieldId { header: hid, field: idx })
    }

    pub fn header(&self, id: HeaderId) -> &Header {
        &self.headers[id.0]
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn stack(&self, id: StackId) -> &HeaderStack {
        &self.stacks[id.0]
    }

    pub fn stacks(&self) -> &[HeaderStack] {
        &self.stacks
    }

    pub fn field_bits(&self, id: FieldId) -> u32 {
        self.headers[id.header.0].header_type().fields()[id.field].bits
    }

    /// Keep the decoded value of `id` alongside its bytes.
    pub fn enable_arith(&mut self, id: FieldId) {
        if let Some(f) = self.headers[id.header.0].field_mut(id.field) {
            f.set_arith(true);
        }
    }

    pub fn enable_header_arith(&mut self, id: HeaderId) {
        let nfields = self.headers[id.0].fields().len();
        for field in 0..nfields {
            self.enable_arith(FieldId { header: id, field });
        }
    }

    pub fn disable_all_arith(&mut self) {
        for hdr in &mut self.headers {
            let nfields = hdr.fields().len();
            for idx in 0..nfields {
                if let Some(f) = hdr.field_mut(idx) {
                    f.set_arith(false);
                }
            }
        }
    }

    /// Fields currently flagged arithmetic, in PHV order.
    pub fn arith_fields(&self) -> Vec<FieldId> {
        let mut out = vec![];
        for (h, hdr) in self.headers.iter().enumerate() {
            for (idx, f) in hdr.fields().iter().enumerate() {
                if f.is_arith() {
                    out.push(FieldId { header: HeaderId(h), field: idx });
                }
            }
        }
        out
    }

    pub fn new_phv(&self) -> Phv {
        Phv { headers: self.headers.clone(), stacks: self.stacks.clone() }
    }
}

/// One packet's headers and fields.
#[derive(Clone, Debug)]
pub struct Phv {
    headers: Vec<Header>,
    stacks: Vec<HeaderStack>,
}

impl Phv {
    pub fn header(&self, id: HeaderId) -> &Header {
        &self.headers[id.0]
    }

    pub fn header_mut(&mut self, id: HeaderId) -> &mut Header {
        &mut self.headers[id.0]
    }

    pub fn headers(&self) -> &[Header] {
        &self.headers
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.headers[id.header.0].fields()[id.field]
    }

    pub fn field_mut(&mut self, id: FieldId) -> Option<&mut Field> {
        self.headers[id.header.0].field_mut(id.field)
    }

    pub fn stack(&self, id: StackId) -> &HeaderStack {
        &self.stacks[id.0]
    }

    /// Claim the next free member of a stack, or `None` if it is full.
    pub fn stack_push(&mut self, id: StackId) -> Option<HeaderId> {
        let stack = &mut self.stacks[id.0];
        let hid = *stack.members.get(stack.next)?;
        stack.next += 1;
        Some(hid)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn template() -> PhvTemplate {
        let vlan = Arc::new(HeaderType::new(
            "vlan_t",
            0,
            &[("pcp".to_string(), 3), ("vid".to_string(), 13)],
        ));
        let mut t = PhvTemplate::new();
        let a = t.push_header("vlan0", vlan.clone(), false);
        let b = t.push_header("vlan1", vlan.clone(), false);
        t.push_stack("vlans", 0, vlan, vec![a, b]);
        t
    }

    #[test]
    fn resolve_names() {
        let t = template();
        let fid = t.field_id("vlan1", "vid").unwrap();
        assert_eq!(fid, FieldId { header: HeaderId(1), field: 1 });
        assert_eq!(t.field_bits(fid), 13);
        assert!(t.field_id("vlan1", "nope").is_none());
        assert!(t.field_id("nope", "vid").is_none());
        assert_eq!(t.stack_id("vlans"), Some(StackId(0)));
    }

    #[test]
    fn stack_fills_in_order() {
        let t = template();
        let sid = t.stack_id("vlans").unwrap();
        let mut phv = t.new_phv();
        assert_eq!(phv.stack(sid).last(), None);
        assert_eq!(phv.stack_push(sid), Some(HeaderId(0)));
        assert_eq!(phv.stack_push(sid), Some(HeaderId(1)));
        assert_eq!(phv.stack_push(sid), None);
        assert_eq!(phv.stack(sid).last(), Some(HeaderId(1)));
        assert_eq!(phv.stack(sid).depth(), 2);
    }

    #[test]
    fn arith_flags() {
        let mut t = template();
        t.enable_header_arith(HeaderId(0));
        assert_eq!(t.arith_fields().len(), 2);
        t.disable_all_arith();
        assert!(t.arith_fields().is_empty());
    }
}
