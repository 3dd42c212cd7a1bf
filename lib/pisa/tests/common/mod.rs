// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Common routines for integration tests.

#![allow(dead_code)]

pub use pisa::api::*;
pub use pisa::engine::Program;
pub use pisa::engine::Switch;
pub use pisa::engine::SwitchConfig;
pub use pisa::engine::data::Data;
pub use pisa::provider::AgeingWriter;
pub use pisa::provider::LearnWriter;
pub use pisa::provider::LogLevel;
pub use pisa::provider::LogProvider;
pub use pisa::provider::Providers;
pub use serde_json::Value;
pub use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;

/// An Ethernet/IPv4/TCP frame with a correct IPv4 header checksum of
/// 0x3508. Destination 78.40.123.172.
pub const TCP_FRAME: [u8; 66] = [
    0x00, 0x18, 0x0a, 0x05, 0x5a, 0x10, 0xa0, 0x88, 0x69, 0x0c, 0xc3, 0x03,
    0x08, 0x00, 0x45, 0x00, 0x00, 0x34, 0x70, 0x90, 0x40, 0x00, 0x40, 0x06,
    0x35, 0x08, 0x0a, 0x36, 0xc1, 0x21, 0x4e, 0x28, 0x7b, 0xac, 0xa2, 0x97,
    0x00, 0x50, 0x7f, 0xc2, 0x4c, 0x80, 0x39, 0x77, 0xec, 0xd9, 0x80, 0x10,
    0x00, 0x44, 0x13, 0xcd, 0x00, 0x00, 0x01, 0x01, 0x08, 0x0a, 0x00, 0xc3,
    0x6d, 0x86, 0xa8, 0x20, 0x21, 0x9b,
];

/// An Ethernet/IPv4/UDP DNS query with a correct IPv4 header checksum of
/// 0x5f0f. Destination 75.75.75.75.
pub const UDP_FRAME: [u8; 82] = [
    0x8c, 0x04, 0xff, 0xac, 0x28, 0xa0, 0xa0, 0x88, 0x69, 0x0c, 0xc3, 0x03,
    0x08, 0x00, 0x45, 0x00, 0x00, 0x44, 0x3a, 0xf5, 0x40, 0x00, 0x40, 0x11,
    0x5f, 0x0f, 0x0a, 0x00, 0x00, 0x0f, 0x4b, 0x4b, 0x4b, 0x4b, 0x1f, 0x5c,
    0x00, 0x35, 0x00, 0x30, 0xeb, 0x61, 0x85, 0xa6, 0x01, 0x00, 0x00, 0x01,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x61, 0x70, 0x69, 0x03, 0x6e,
    0x65, 0x77, 0x0a, 0x6c, 0x69, 0x76, 0x65, 0x73, 0x74, 0x72, 0x65, 0x61,
    0x6d, 0x03, 0x63, 0x6f, 0x6d, 0x00, 0x00, 0x01, 0x00, 0x01,
];

/// Offset of the IPv4 header in both frames.
pub const IP_OFF: usize = 14;
/// Offset of the IPv4 TTL.
pub const TTL_OFF: usize = IP_OFF + 8;
/// Offset of the IPv4 header checksum.
pub const CSUM_OFF: usize = IP_OFF + 10;

/// Build a non-IP frame from `src` to `dst`.
pub fn l2_frame(dst: [u8; 6], src: [u8; 6]) -> Vec<u8> {
    let mut f = Vec::with_capacity(60);
    f.extend_from_slice(&dst);
    f.extend_from_slice(&src);
    f.extend_from_slice(&[0x88, 0xb5]);
    f.resize(60, 0xaa);
    f
}

fn field(h: &str, f: &str) -> Value {
    json!({"type": "field", "value": [h, f]})
}

fn runtime(idx: u32) -> Value {
    json!({"type": "runtime_data", "value": idx})
}

fn hexstr(s: &str) -> Value {
    json!({"type": "hexstr", "value": s})
}

/// A small L2/L3 switch program.
///
/// Ingress sends IPv4 packets through an LPM route table and everything
/// else through an exact MAC table that learns source addresses. Egress
/// rewrites per output port. The deparser recomputes the IPv4 header
/// checksum.
pub fn l2l3_program() -> Value {
    json!({
        "header_types": [
            {"name": "ethernet_t", "id": 0, "fields": [
                ["dstAddr", 48], ["srcAddr", 48], ["etherType", 16]]},
            {"name": "ipv4_t", "id": 1, "fields": [
                ["version", 4], ["ihl", 4], ["diffserv", 8],
                ["totalLen", 16], ["identification", 16], ["flags", 3],
                ["fragOffset", 13], ["ttl", 8], ["protocol", 8],
                ["hdrChecksum", 16], ["srcAddr", 32], ["dstAddr", 32]]},
            {"name": "udp_t", "id": 2, "fields": [
                ["srcPort", 16], ["dstPort", 16], ["length", 16],
                ["checksum", 16]]},
            {"name": "standard_metadata_t", "id": 3, "fields": [
                ["ingress_port", 9], ["egress_spec", 9], ["egress_port", 9],
                ["egress_rid", 16], ["mcast_grp", 16], ["_pad", 5]]}
        ],
        "headers": [
            {"name": "ethernet", "id": 0, "header_type": "ethernet_t"},
            {"name": "ipv4", "id": 1, "header_type": "ipv4_t"},
            {"name": "udp", "id": 2, "header_type": "udp_t"},
            {"name": "standard_metadata", "id": 3,
             "header_type": "standard_metadata_t", "metadata": true}
        ],
        "parsers": [{
            "name": "parser", "id": 0, "init_state": "start",
            "parse_states": [
                {"name": "start", "id": 0,
                 "parser_ops": [{"op": "extract",
                     "parameters": [{"type": "regular", "value": "ethernet"}]}],
                 "transition_key": [field("ethernet", "etherType")],
                 "transitions": [
                     {"value": "0x0800", "next_state": "parse_ipv4"},
                     {"value": "default", "next_state": null}]},
                {"name": "parse_ipv4", "id": 1,
                 "parser_ops": [{"op": "extract",
                     "parameters": [{"type": "regular", "value": "ipv4"}]}],
                 "transition_key": [field("ipv4", "protocol")],
                 "transitions": [
                     {"value": "0x11", "next_state": "parse_udp"},
                     {"value": "default", "next_state": null}]},
                {"name": "parse_udp", "id": 2,
                 "parser_ops": [{"op": "extract",
                     "parameters": [{"type": "regular", "value": "udp"}]}]}
            ]
        }],
        "deparsers": [{"name": "deparser", "id": 0,
                       "order": ["ethernet", "ipv4", "udp"]}],
        "calculations": [{
            "name": "flow_hash", "id": 0, "algo": "xxh64",
            "input": [field("ipv4", "srcAddr"), field("ipv4", "dstAddr")]
        }],
        "actions": [
            {"name": "set_egress", "id": 0,
             "runtime_data": [{"name": "port", "bitwidth": 9}],
             "primitives": [{"op": "modify_field", "parameters": [
                 field("standard_metadata", "egress_spec"), runtime(0)]}]},
            {"name": "set_mcast", "id": 1,
             "runtime_data": [{"name": "grp", "bitwidth": 16}],
             "primitives": [{"op": "modify_field", "parameters": [
                 field("standard_metadata", "mcast_grp"), runtime(0)]}]},
            {"name": "_drop", "id": 2,
             "primitives": [{"op": "drop"}]},
            {"name": "nop", "id": 3},
            {"name": "fwd_and_learn", "id": 4,
             "runtime_data": [{"name": "port", "bitwidth": 9}],
             "primitives": [
                 {"op": "modify_field", "parameters": [
                     field("standard_metadata", "egress_spec"), runtime(0)]},
                 {"op": "generate_digest", "parameters": [
                     hexstr("0x0"), hexstr("0x1")]}]},
            {"name": "dec_ttl", "id": 5,
             "primitives": [{"op": "subtract_from_field", "parameters": [
                 field("ipv4", "ttl"), hexstr("0x01")]}]},
            {"name": "zero_csum", "id": 6,
             "primitives": [{"op": "modify_field", "parameters": [
                 field("ipv4", "hdrChecksum"), hexstr("0x0000")]}]}
        ],
        "pipelines": [
            {"name": "ingress", "id": 0, "init_table": "is_ipv4",
             "conditionals": [{
                 "name": "is_ipv4", "id": 0,
                 "expression": {"type": "expression", "value": {
                     "op": "valid", "left": null,
                     "right": {"type": "header", "value": "ipv4"}}},
                 "true_next": "ipv4_lpm", "false_next": "dmac"}],
             "tables": [
                 {"name": "ipv4_lpm", "id": 0, "max_size": 1024,
                  "with_counters": true,
                  "key": [{"match_type": "lpm",
                           "target": ["ipv4", "dstAddr"]}],
                  "actions": ["set_egress", "set_mcast", "_drop"],
                  "next_tables": {"set_egress": null, "set_mcast": null,
                                  "_drop": null},
                  "default_action": {"name": "_drop"}},
                 {"name": "dmac", "id": 1, "max_size": 1024,
                  "with_counters": true, "support_timeout": true,
                  "key": [{"match_type": "exact",
                           "target": ["ethernet", "dstAddr"]}],
                  "actions": ["fwd_and_learn", "_drop"],
                  "next_tables": {"fwd_and_learn": null, "_drop": null},
                  "default_action": {"name": "_drop"}}
             ]},
            {"name": "egress", "id": 1, "init_table": "rewrite",
             "tables": [
                 {"name": "rewrite", "id": 2, "max_size": 512,
                  "key": [{"match_type": "exact",
                           "target": ["standard_metadata", "egress_port"]}],
                  "actions": ["dec_ttl", "zero_csum", "nop", "_drop"],
                  "next_tables": {"dec_ttl": null, "zero_csum": null,
                                  "nop": null, "_drop": null},
                  "default_action": {"name": "nop"}}
             ]}
        ],
        "checksums": [{
            "name": "ipv4_csum", "id": 0,
            "target": ["ipv4", "hdrChecksum"], "type": "ipv4"
        }],
        "learn_lists": [{
            "id": 1, "name": "mac_learn",
            "elements": [field("ethernet", "srcAddr"),
                         field("standard_metadata", "ingress_port")]
        }]
    })
}

pub fn l2l3_doc() -> IrDocument {
    IrDocument::from_value(l2l3_program()).unwrap()
}

/// A switch running [`l2l3_program`] with `providers`.
pub fn l2l3_switch(cfg: SwitchConfig, providers: Providers) -> Switch {
    let sw = Switch::new(cfg, providers);
    sw.load(&l2l3_doc()).unwrap();
    sw
}

/// Keeps every log message for later inspection.
#[derive(Default)]
pub struct MemoryLog {
    msgs: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLog {
    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        self.msgs.lock().unwrap().clone()
    }
}

impl LogProvider for MemoryLog {
    fn log(&self, level: LogLevel, msg: &str) {
        self.msgs.lock().unwrap().push((level, msg.to_string()));
    }
}

/// Quiet providers that keep log messages in memory.
pub fn test_providers() -> (Providers, Arc<MemoryLog>) {
    let log = Arc::new(MemoryLog::default());
    (Providers { log: Box::new(log.clone()), ..Default::default() }, log)
}

/// Records every learn buffer sent.
#[derive(Default)]
pub struct LearnCapture {
    pub sent: Mutex<Vec<(u32, Vec<u8>, usize)>>,
}

impl LearnWriter for LearnCapture {
    fn send(&self, list_id: u32, buffer: &[u8], nsamples: usize) {
        self.sent.lock().unwrap().push((list_id, buffer.to_vec(), nsamples));
    }
}

/// Records every ageing notification sent.
#[derive(Default)]
pub struct AgeingCapture {
    pub sent: Mutex<Vec<(String, Vec<EntryHdl>)>>,
}

impl AgeingWriter for AgeingCapture {
    fn send(&self, _table_id: u32, table_name: &str, entries: &[EntryHdl]) {
        self.sent
            .lock()
            .unwrap()
            .push((table_name.to_string(), entries.to_vec()));
    }
}

pub fn ports(list: &[usize]) -> PortMap {
    let mut m = PortMap::new();
    for p in list {
        m.set(*p);
    }
    m
}

pub fn lags(list: &[usize]) -> LagMap {
    let mut m = LagMap::new();
    for l in list {
        m.set(*l);
    }
    m
}

pub fn lpm(addr: [u8; 4], len: u32) -> Vec<MatchParam> {
    vec![MatchParam::Lpm { value: addr.to_vec(), prefix_len: len }]
}

pub fn exact(bytes: &[u8]) -> Vec<MatchParam> {
    vec![MatchParam::Exact(bytes.to_vec())]
}
