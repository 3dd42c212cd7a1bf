// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Compiled expressions.
//!
//! An expression tree from the IR is flattened into postfix order: the
//! operands of each operator are pushed before the operator itself. The
//! resulting program runs against a value stack.

use super::data::Data;
use super::phv::FieldId;
use super::phv::HeaderId;
use super::phv::Phv;
use core::str::FromStr;

/// A binary or unary operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExprOpcode {
    Add,
    Sub,
    Mul,
    Mod,
    Shl,
    Shr,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Not,
    BitAnd,
    BitOr,
    BitXor,
    BitNeg,
    Valid,
}

impl ExprOpcode {
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::Not | Self::BitNeg | Self::Valid)
    }
}

impl FromStr for ExprOpcode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ExprOpcode::*;

        let op = match s {
            "+" => Add,
            "-" => Sub,
            "*" => Mul,
            "%" => Mod,
            "<<" => Shl,
            ">>" => Shr,
            "==" => Eq,
            "!=" => Ne,
            ">" => Gt,
            "<" => Lt,
            ">=" => Ge,
            "<=" => Le,
            "and" => And,
            "or" => Or,
            "not" => Not,
            "&" => BitAnd,
            "|" => BitOr,
            "^" => BitXor,
            "~" => BitNeg,
            "valid" => Valid,
            _ => return Err(format!("unknown operator: {s}")),
        };
        Ok(op)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExprOp {
    LoadField(FieldId),
    LoadHeader(HeaderId),
    LoadBool(bool),
    LoadConst(Data),
    Op(ExprOpcode),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Value {
    Bool(bool),
    Data(u128),
    Header(HeaderId),
}

impl Value {
    fn as_data(self) -> u128 {
        match self {
            Self::Bool(b) => u128::from(b),
            Self::Data(d) => d,
            Self::Header(_) => 0,
        }
    }

    fn as_bool(self) -> bool {
        match self {
            Self::Bool(b) => b,
            Self::Data(d) => d != 0,
            Self::Header(_) => false,
        }
    }
}

/// A postfix expression program.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Expression {
    ops: Vec<ExprOp>,
}

impl Expression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back_load_field(&mut self, f: FieldId) {
        self.ops.push(ExprOp::LoadField(f));
    }

    pub fn push_back_load_header(&mut self, h: HeaderId) {
        self.ops.push(ExprOp::LoadHeader(h));
    }

    pub fn push_back_load_bool(&mut self, b: bool) {
        self.ops.push(ExprOp::LoadBool(b));
    }

    pub fn push_back_load_const(&mut self, d: Data) {
        self.ops.push(ExprOp::LoadConst(d));
    }

    pub fn push_back_op(&mut self, op: ExprOpcode) {
        self.ops.push(ExprOp::Op(op));
    }

    pub fn ops(&self) -> &[ExprOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn run(&self, phv: &Phv) -> Option<Value> {
        let mut stack: Vec<Value> = Vec::with_capacity(self.ops.len());

        for op in &self.ops {
            let v = match op {
                ExprOp::LoadField(f) => Value::Data(phv.field(*f).get().get()),
                ExprOp::LoadHeader(h) => Value::Header(*h),
                ExprOp::LoadBool(b) => Value::Bool(*b),
                ExprOp::LoadConst(d) => Value::Data(d.get()),
                ExprOp::Op(code) if code.is_unary() => {
                    let a = stack.pop()?;
                    unary(*code, a, phv)
                }
                ExprOp::Op(code) => {
                    let rhs = stack.pop()?;
                    let lhs = stack.pop()?;
                    binary(*code, lhs, rhs)
                }
            };
            stack.push(v);
        }

        stack.pop()
    }

    /// Evaluate as a condition. An empty program is true.
    pub fn eval_bool(&self, phv: &Phv) -> bool {
        if self.ops.is_empty() {
            return true;
        }
        self.run(phv).is_some_and(Value::as_bool)
    }
}

fn unary(code: ExprOpcode, a: Value, phv: &Phv) -> Value {
    match code {
        ExprOpcode::Not => Value::Bool(!a.as_bool()),
        ExprOpcode::BitNeg => Value::Data(!a.as_data()),
        ExprOpcode::Valid => match a {
            Value::Header(h) => Value::Bool(phv.header(h).is_valid()),
            _ => Value::Bool(false),
        },
        _ => Value::Data(0),
    }
}

fn binary(code: ExprOpcode, lhs: Value, rhs: Value) -> Value {
    use ExprOpcode::*;

    if matches!(code, And | Or) {
        let (l, r) = (lhs.as_bool(), rhs.as_bool());
        return Value::Bool(if code == And { l && r } else { l || r });
    }

    let (l, r) = (lhs.as_data(), rhs.as_data());
    match code {
        Add => Value::Data(l.wrapping_add(r)),
        Sub => Value::Data(l.wrapping_sub(r)),
        Mul => Value::Data(l.wrapping_mul(r)),
        Mod => Value::Data(l.checked_rem(r).unwrap_or(0)),
        Shl => Value::Data(if r >= 128 { 0 } else { l << r }),
        Shr => Value::Data(if r >= 128 { 0 } else { l >> r }),
        Eq => Value::Bool(l == r),
        Ne => Value::Bool(l != r),
        Gt => Value::Bool(l > r),
        Lt => Value::Bool(l < r),
        Ge => Value::Bool(l >= r),
        Le => Value::Bool(l <= r),
        BitAnd => Value::Data(l & r),
        BitOr => Value::Data(l | r),
        BitXor => Value::Data(l ^ r),
        And | Or | Not | BitNeg | Valid => Value::Data(0),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::header::HeaderType;
    use crate::engine::phv::PhvTemplate;
    use std::sync::Arc;

    fn phv() -> (PhvTemplate, Phv) {
        let ht = Arc::new(HeaderType::new(
            "ipv4_t",
            0,
            &[("ttl".to_string(), 8), ("protocol".to_string(), 8)],
        ));
        let mut t = PhvTemplate::new();
        t.push_header("ipv4", ht, false);
        let mut phv = t.new_phv();
        let ttl = t.field_id("ipv4", "ttl").unwrap();
        phv.field_mut(ttl).unwrap().set(Data(64));
        (t, phv)
    }

    #[test]
    fn postfix_compare() {
        let (t, phv) = phv();
        // ipv4.ttl > 1 and valid(ipv4)
        let mut e = Expression::new();
        e.push_back_load_field(t.field_id("ipv4", "ttl").unwrap());
        e.push_back_load_const(Data(1));
        e.push_back_op(ExprOpcode::Gt);
        e.push_back_load_header(t.header_id("ipv4").unwrap());
        e.push_back_op(ExprOpcode::Valid);
        e.push_back_op(ExprOpcode::And);
        // The header was never extracted.
        assert!(!e.eval_bool(&phv));

        let mut phv = phv;
        phv.header_mut(HeaderId(0)).mark_valid();
        assert!(e.eval_bool(&phv));
    }

    #[test]
    fn arithmetic() {
        let (t, phv) = phv();
        let mut e = Expression::new();
        e.push_back_load_field(t.field_id("ipv4", "ttl").unwrap());
        e.push_back_load_const(Data(3));
        e.push_back_op(ExprOpcode::Sub);
        e.push_back_load_const(Data(2));
        e.push_back_op(ExprOpcode::Shl);
        assert_eq!(e.run(&phv).map(Value::as_data), Some(244));
    }

    #[test]
    fn degenerate_programs() {
        let (_, phv) = phv();
        assert!(Expression::new().eval_bool(&phv));

        let mut e = Expression::new();
        e.push_back_op(ExprOpcode::And);
        assert!(!e.eval_bool(&phv));

        let mut e = Expression::new();
        e.push_back_load_const(Data(5));
        e.push_back_load_const(Data(0));
        e.push_back_op(ExprOpcode::Mod);
        assert_eq!(e.run(&phv).map_or(0, Value::as_data), 0);
    }

    #[test]
    fn opcode_names() {
        assert_eq!("<=".parse::<ExprOpcode>(), Ok(ExprOpcode::Le));
        assert_eq!("valid".parse::<ExprOpcode>(), Ok(ExprOpcode::Valid));
        assert!("**".parse::<ExprOpcode>().is_err());
    }
}
