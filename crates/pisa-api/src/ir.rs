// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The load-time intermediate representation.
//!
//! The IR is a JSON document describing an entire forwarding program.
//! Sections are listed here in the order the loader consumes them; later
//! sections refer to earlier ones by name. These types only capture the
//! shape of the document. Name resolution, and the interpretation of the
//! polymorphic `{"type": ..., "value": ...}` nodes, belong to the loader.

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// The top-level IR document.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IrDocument {
    pub header_types: Vec<HeaderTypeIr>,
    pub headers: Vec<HeaderIr>,
    pub header_stacks: Vec<HeaderStackIr>,
    pub parsers: Vec<ParserIr>,
    pub deparsers: Vec<DeparserIr>,
    pub calculations: Vec<CalculationIr>,
    pub meter_arrays: Vec<MeterArrayIr>,
    pub counter_arrays: Vec<CounterArrayIr>,
    pub register_arrays: Vec<RegisterArrayIr>,
    pub actions: Vec<ActionIr>,
    pub pipelines: Vec<PipelineIr>,
    pub checksums: Vec<ChecksumIr>,
    pub learn_lists: Vec<FieldListIr>,
    pub field_lists: Vec<FieldListIr>,
    pub force_arith: Option<Vec<FieldRef>>,
}

impl IrDocument {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// A `[header, field]` pair.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct FieldRef(pub String, pub String);

impl FieldRef {
    pub fn new(header: &str, field: &str) -> Self {
        Self(header.to_string(), field.to_string())
    }

    pub fn header(&self) -> &str {
        &self.0
    }

    pub fn field(&self) -> &str {
        &self.1
    }
}

impl Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.0, self.1)
    }
}

/// A polymorphic IR node: `{"type": "field", "value": ["ipv4", "ttl"]}`.
///
/// The meaning of `value` depends on `kind`; the loader interprets it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TypedValue {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitwidth: Option<u32>,
}

impl TypedValue {
    pub fn new(kind: &str, value: Value) -> Self {
        Self { kind: kind.to_string(), value, bitwidth: None }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HeaderTypeIr {
    pub name: String,
    pub id: u32,
    /// Ordered `(field name, bit width)` pairs.
    pub fields: Vec<(String, u32)>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HeaderIr {
    pub name: String,
    pub id: u32,
    pub header_type: String,
    #[serde(default)]
    pub metadata: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HeaderStackIr {
    pub name: String,
    pub id: u32,
    pub header_type: String,
    pub header_ids: Vec<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ParserIr {
    pub name: String,
    pub id: u32,
    pub init_state: String,
    pub parse_states: Vec<ParseStateIr>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ParseStateIr {
    pub name: String,
    pub id: u32,
    #[serde(default)]
    pub parser_ops: Vec<ParserOpIr>,
    #[serde(default)]
    pub transition_key: Vec<TypedValue>,
    #[serde(default)]
    pub transitions: Vec<TransitionIr>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ParserOpIr {
    pub op: String,
    #[serde(default)]
    pub parameters: Vec<TypedValue>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TransitionIr {
    /// A hex string, or the literal `"default"`.
    pub value: String,
    #[serde(default)]
    pub mask: Option<String>,
    /// `None` accepts the packet.
    #[serde(default)]
    pub next_state: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeparserIr {
    pub name: String,
    pub id: u32,
    pub order: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CalculationIr {
    pub name: String,
    pub id: u32,
    pub algo: String,
    pub input: Vec<TypedValue>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MeterArrayIr {
    pub name: String,
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: String,
    pub rate_count: u32,
    pub size: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CounterArrayIr {
    pub name: String,
    pub id: u32,
    pub size: u32,
    #[serde(default)]
    pub is_direct: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RegisterArrayIr {
    pub name: String,
    pub id: u32,
    pub size: u32,
    pub bitwidth: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RuntimeDataIr {
    pub name: String,
    pub bitwidth: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PrimitiveCallIr {
    pub op: String,
    #[serde(default)]
    pub parameters: Vec<TypedValue>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ActionIr {
    pub name: String,
    pub id: u32,
    #[serde(default)]
    pub runtime_data: Vec<RuntimeDataIr>,
    #[serde(default)]
    pub primitives: Vec<PrimitiveCallIr>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PipelineIr {
    pub name: String,
    pub id: u32,
    /// The first control-flow node; `None` is an empty pipeline.
    #[serde(default)]
    pub init_table: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableIr>,
    #[serde(default)]
    pub conditionals: Vec<ConditionalIr>,
}

fn default_table_kind() -> String {
    "simple".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TableIr {
    pub name: String,
    pub id: u32,
    /// Table-wide match kind, used when key elements do not settle it.
    #[serde(default)]
    pub match_type: Option<String>,
    /// One of `simple`, `indirect` or `indirect_ws`.
    #[serde(rename = "type", default = "default_table_kind")]
    pub kind: String,
    pub max_size: u32,
    #[serde(default)]
    pub with_counters: bool,
    #[serde(default)]
    pub support_timeout: bool,
    #[serde(default)]
    pub key: Vec<TableKeyIr>,
    pub actions: Vec<String>,
    /// Successor per action name; `None` exits the pipeline.
    #[serde(default)]
    pub next_tables: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub selector: Option<SelectorIr>,
    #[serde(default)]
    pub default_action: Option<DefaultActionIr>,
    /// Successor on a miss when no default action is installed.
    #[serde(default)]
    pub base_default_next: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TableKeyIr {
    pub match_type: String,
    /// A header name for `valid`, a `[header, field]` pair otherwise.
    pub target: Value,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SelectorIr {
    pub algo: String,
    pub input: Vec<TypedValue>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DefaultActionIr {
    pub name: String,
    /// Action data as hex strings.
    #[serde(default)]
    pub data: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConditionalIr {
    pub name: String,
    pub id: u32,
    #[serde(default)]
    pub expression: Option<TypedValue>,
    #[serde(default)]
    pub true_next: Option<String>,
    #[serde(default)]
    pub false_next: Option<String>,
}

/// The `value` of an `{"type": "expression"}` node.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ExpressionIr {
    pub op: String,
    #[serde(default)]
    pub left: Option<TypedValue>,
    #[serde(default)]
    pub right: Option<TypedValue>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChecksumIr {
    pub name: String,
    pub id: u32,
    pub target: FieldRef,
    /// Either `ipv4` or `generic`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub calculation: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FieldListIr {
    pub id: u32,
    #[serde(default)]
    pub name: Option<String>,
    pub elements: Vec<TypedValue>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sections_default_to_empty() {
        let doc = IrDocument::from_json("{}").unwrap();
        assert!(doc.header_types.is_empty());
        assert!(doc.pipelines.is_empty());
        assert!(doc.force_arith.is_none());
    }

    #[test]
    fn table_defaults() {
        let json = r#"{
            "name": "t", "id": 0, "max_size": 16,
            "key": [], "actions": ["a"],
            "next_tables": {"a": null}
        }"#;
        let t: TableIr = serde_json::from_str(json).unwrap();
        assert_eq!(t.kind, "simple");
        assert!(!t.with_counters);
        assert_eq!(t.next_tables.get("a"), Some(&None));
    }

    #[test]
    fn field_ref_from_pair() {
        let f: FieldRef = serde_json::from_str(r#"["ipv4", "ttl"]"#).unwrap();
        assert_eq!(f, FieldRef::new("ipv4", "ttl"));
        assert_eq!(f.to_string(), "ipv4.ttl");
    }
}
