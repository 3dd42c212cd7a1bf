// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The control-flow graph.
//!
//! Tables and conditionals of every pipeline live in two program-wide
//! arenas owned by [`ControlGraph`]. Edges are [`NodeRef`] indices into
//! those arenas; `None` is the pipeline exit. A [`Pipeline`] is just a
//! named entry node.

use super::expr::Expression;
use super::learn::LearnEngine;
use super::packet::Packet;
use super::table::MatchTable;
use std::collections::BTreeSet;

/// A control-flow node.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum NodeRef {
    Table(usize),
    Conditional(usize),
}

/// A compiled boolean expression with two successors.
#[derive(Clone, Debug)]
pub struct Conditional {
    pub name: String,
    pub id: u32,
    expr: Expression,
    true_next: Option<NodeRef>,
    false_next: Option<NodeRef>,
}

impl Conditional {
    pub fn new(name: &str, id: u32, expr: Expression) -> Self {
        Self {
            name: name.to_string(),
            id,
            expr,
            true_next: None,
            false_next: None,
        }
    }

    pub fn expression(&self) -> &Expression {
        &self.expr
    }

    pub fn set_next_node_if_true(&mut self, next: Option<NodeRef>) {
        self.true_next = next;
    }

    pub fn set_next_node_if_false(&mut self, next: Option<NodeRef>) {
        self.false_next = next;
    }

    pub fn successors(&self) -> impl Iterator<Item = NodeRef> {
        [self.true_next, self.false_next].into_iter().flatten()
    }

    /// Evaluate against `pkt` and return the edge taken.
    pub fn eval(&self, pkt: &Packet) -> Option<NodeRef> {
        if self.expr.eval_bool(&pkt.phv) {
            self.true_next
        } else {
            self.false_next
        }
    }
}

#[derive(Debug, Default)]
pub struct ControlGraph {
    pub tables: Vec<MatchTable>,
    pub conditionals: Vec<Conditional>,
}

impl ControlGraph {
    pub fn table(&self, name: &str) -> Option<&MatchTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn lookup(&self, name: &str) -> Option<NodeRef> {
        if let Some(i) = self.tables.iter().position(|t| t.name == name) {
            return Some(NodeRef::Table(i));
        }
        self.conditionals
            .iter()
            .position(|c| c.name == name)
            .map(NodeRef::Conditional)
    }

    pub fn node_name(&self, node: NodeRef) -> &str {
        match node {
            NodeRef::Table(i) => &self.tables[i].name,
            NodeRef::Conditional(i) => &self.conditionals[i].name,
        }
    }

    fn successors(&self, node: NodeRef) -> Vec<NodeRef> {
        match node {
            NodeRef::Table(i) => self.tables[i].successors().collect(),
            NodeRef::Conditional(i) => {
                self.conditionals[i].successors().collect()
            }
        }
    }

    /// Return a node that lies on a cycle reachable from `start`, if any.
    pub fn find_cycle(&self, start: NodeRef) -> Option<NodeRef> {
        // Iterative DFS: `path` holds nodes on the current stack, `done`
        // holds nodes whose subgraph is known to be acyclic.
        let mut path = BTreeSet::new();
        let mut done = BTreeSet::new();
        let mut stack = vec![(start, false)];

        while let Some((node, leaving)) = stack.pop() {
            if leaving {
                path.remove(&node);
                done.insert(node);
                continue;
            }
            if done.contains(&node) {
                continue;
            }
            if !path.insert(node) {
                return Some(node);
            }

            stack.push((node, true));
            for next in self.successors(node) {
                if path.contains(&next) {
                    return Some(next);
                }
                stack.push((next, false));
            }
        }

        None
    }

    /// Every node reachable from `start`, in visit order.
    pub fn reachable(&self, start: Option<NodeRef>) -> Vec<NodeRef> {
        let mut seen = BTreeSet::new();
        let mut out = vec![];
        let mut stack: Vec<NodeRef> = start.into_iter().collect();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            out.push(node);
            let mut next = self.successors(node);
            next.reverse();
            stack.extend(next);
        }
        out
    }
}

/// A named entry point into the control-flow graph.
#[derive(Clone, Debug)]
pub struct Pipeline {
    pub name: String,
    pub id: u32,
    init: Option<NodeRef>,
}

impl Pipeline {
    pub fn new(name: &str, id: u32, init: Option<NodeRef>) -> Self {
        Self { name: name.to_string(), id, init }
    }

    pub fn init(&self) -> Option<NodeRef> {
        self.init
    }

    /// Run `pkt` from the entry node until an exit. Returns the nodes
    /// visited, in order.
    pub fn apply(
        &self,
        graph: &ControlGraph,
        pkt: &mut Packet,
        learn: &LearnEngine,
    ) -> Vec<NodeRef> {
        let mut trace = vec![];
        let mut node = self.init;
        // The loader rejects cyclic graphs; the bound keeps a
        // hand-assembled graph from spinning forever.
        let limit = graph.tables.len() + graph.conditionals.len();

        while let Some(cur) = node {
            if trace.len() > limit {
                break;
            }
            trace.push(cur);
            node = match cur {
                NodeRef::Table(i) => graph.tables[i].apply(pkt, learn),
                NodeRef::Conditional(i) => graph.conditionals[i].eval(pkt),
            };
        }

        trace
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::data::Data;
    use crate::engine::expr::ExprOpcode;
    use crate::engine::header::HeaderType;
    use crate::engine::phv::PhvTemplate;
    use crate::provider::NullWriter;
    use std::sync::Arc;

    fn template() -> PhvTemplate {
        let ht = Arc::new(HeaderType::new("m_t", 0, &[("x".to_string(), 8)]));
        let mut t = PhvTemplate::new();
        t.push_header("m", ht, true);
        t
    }

    // x == 1
    fn cond(t: &PhvTemplate, name: &str) -> Conditional {
        let mut e = Expression::new();
        e.push_back_load_field(t.field_id("m", "x").unwrap());
        e.push_back_load_const(Data(1));
        e.push_back_op(ExprOpcode::Eq);
        Conditional::new(name, 0, e)
    }

    #[test]
    fn conditional_edges() {
        let t = template();
        let mut graph = ControlGraph::default();
        let mut a = cond(&t, "a");
        a.set_next_node_if_true(Some(NodeRef::Conditional(1)));
        graph.conditionals.push(a);
        graph.conditionals.push(cond(&t, "b"));
        assert_eq!(graph.lookup("b"), Some(NodeRef::Conditional(1)));
        assert_eq!(graph.lookup("c"), None);

        let learn = LearnEngine::new(Arc::new(NullWriter));
        let p = Pipeline::new("ingress", 0, graph.lookup("a"));

        let mut pkt = Packet::new(0, vec![], t.new_phv());
        let x = t.field_id("m", "x").unwrap();
        pkt.phv.field_mut(x).unwrap().set(Data(1));
        assert_eq!(
            p.apply(&graph, &mut pkt, &learn),
            vec![NodeRef::Conditional(0), NodeRef::Conditional(1)]
        );

        pkt.phv.field_mut(x).unwrap().set(Data(2));
        assert_eq!(
            p.apply(&graph, &mut pkt, &learn),
            vec![NodeRef::Conditional(0)]
        );
    }

    #[test]
    fn empty_pipeline_exits() {
        let t = template();
        let graph = ControlGraph::default();
        let learn = LearnEngine::new(Arc::new(NullWriter));
        let mut pkt = Packet::new(0, vec![], t.new_phv());
        let p = Pipeline::new("egress", 1, None);
        assert!(p.apply(&graph, &mut pkt, &learn).is_empty());
    }

    #[test]
    fn cycle_detection() {
        let t = template();
        let mut graph = ControlGraph::default();
        let mut a = cond(&t, "a");
        let mut b = cond(&t, "b");
        let c = cond(&t, "c");
        a.set_next_node_if_true(Some(NodeRef::Conditional(1)));
        a.set_next_node_if_false(Some(NodeRef::Conditional(2)));
        b.set_next_node_if_true(Some(NodeRef::Conditional(2)));
        graph.conditionals.extend([a, b, c]);

        // A diamond is not a cycle.
        assert_eq!(graph.find_cycle(NodeRef::Conditional(0)), None);
        assert_eq!(graph.reachable(Some(NodeRef::Conditional(0))).len(), 3);

        graph.conditionals[2]
            .set_next_node_if_false(Some(NodeRef::Conditional(0)));
        assert!(graph.find_cycle(NodeRef::Conditional(0)).is_some());

        // A bounded walk even when the graph loops.
        let learn = LearnEngine::new(Arc::new(NullWriter));
        let mut pkt = Packet::new(0, vec![], t.new_phv());
        let p = Pipeline::new("ingress", 0, Some(NodeRef::Conditional(0)));
        assert!(p.apply(&graph, &mut pkt, &learn).len() <= 4);
    }
}
