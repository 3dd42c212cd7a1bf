// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The standard primitive library.
//!
//! Primitives trust the loader to have checked their arity and value
//! positions. An object parameter of the wrong kind makes the primitive a
//! no-op for that invocation.

use super::action::ActionCtx;
use super::action::ActionParam;
use super::action::Primitive;
use super::action::PrimitiveRegistry;
use super::data::Data;
use super::stateful::MeterType;
use crate::time::Moment;
use std::sync::Arc;

/// Register every primitive in this module.
pub fn register_all(reg: &mut PrimitiveRegistry) {
    reg.register(Arc::new(NoOp));
    reg.register(Arc::new(MarkToDrop));
    reg.register(Arc::new(ModifyField));
    reg.register(Arc::new(AddToField));
    reg.register(Arc::new(SubtractFromField));
    reg.register(Arc::new(AddHeader));
    reg.register(Arc::new(RemoveHeader));
    reg.register(Arc::new(CopyHeader));
    reg.register(Arc::new(Count));
    reg.register(Arc::new(RegisterRead));
    reg.register(Arc::new(RegisterWrite));
    reg.register(Arc::new(ExecuteMeter));
    reg.register(Arc::new(ModifyFieldWithHashBasedOffset));
    reg.register(Arc::new(GenerateDigest));
}

pub struct NoOp;

impl Primitive for NoOp {
    fn name(&self) -> &'static str {
        "no_op"
    }

    fn arity(&self) -> usize {
        0
    }

    fn execute(&self, _ctx: &mut ActionCtx<'_>, _params: &[ActionParam]) {}
}

/// Mark the packet to be dropped at the end of the current pipeline.
pub struct MarkToDrop;

impl Primitive for MarkToDrop {
    fn name(&self) -> &'static str {
        "drop"
    }

    fn arity(&self) -> usize {
        0
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, _params: &[ActionParam]) {
        ctx.pkt.mark_to_drop();
    }
}

/// `dst = src`
pub struct ModifyField;

impl Primitive for ModifyField {
    fn name(&self) -> &'static str {
        "modify_field"
    }

    fn arity(&self) -> usize {
        2
    }

    fn value_params(&self) -> &'static [usize] {
        &[1]
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        let v = ctx.value(&params[1]);
        ctx.set_field(&params[0], v);
    }
}

/// `dst = dst + v`
pub struct AddToField;

impl Primitive for AddToField {
    fn name(&self) -> &'static str {
        "add_to_field"
    }

    fn arity(&self) -> usize {
        2
    }

    fn value_params(&self) -> &'static [usize] {
        &[0, 1]
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        let cur = ctx.value(&params[0]).get();
        let v = ctx.value(&params[1]).get();
        ctx.set_field(&params[0], Data(cur.wrapping_add(v)));
    }
}

/// `dst = dst - v`
pub struct SubtractFromField;

impl Primitive for SubtractFromField {
    fn name(&self) -> &'static str {
        "subtract_from_field"
    }

    fn arity(&self) -> usize {
        2
    }

    fn value_params(&self) -> &'static [usize] {
        &[0, 1]
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        let cur = ctx.value(&params[0]).get();
        let v = ctx.value(&params[1]).get();
        ctx.set_field(&params[0], Data(cur.wrapping_sub(v)));
    }
}

/// Make a header valid. A header that was invalid is zeroed first.
pub struct AddHeader;

impl Primitive for AddHeader {
    fn name(&self) -> &'static str {
        "add_header"
    }

    fn arity(&self) -> usize {
        1
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        if let ActionParam::Header(h) = &params[0] {
            let hdr = ctx.pkt.phv.header_mut(*h);
            if !hdr.is_valid() {
                hdr.reset();
                hdr.mark_valid();
            }
        }
    }
}

pub struct RemoveHeader;

impl Primitive for RemoveHeader {
    fn name(&self) -> &'static str {
        "remove_header"
    }

    fn arity(&self) -> usize {
        1
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        if let ActionParam::Header(h) = &params[0] {
            ctx.pkt.phv.header_mut(*h).mark_invalid();
        }
    }
}

/// `copy_header(dst, src)`
pub struct CopyHeader;

impl Primitive for CopyHeader {
    fn name(&self) -> &'static str {
        "copy_header"
    }

    fn arity(&self) -> usize {
        2
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        if let (ActionParam::Header(dst), ActionParam::Header(src)) =
            (&params[0], &params[1])
        {
            let src = ctx.pkt.phv.header(*src).clone();
            ctx.pkt.phv.header_mut(*dst).copy_from(&src);
        }
    }
}

/// `count(counter_array, index)`
pub struct Count;

impl Primitive for Count {
    fn name(&self) -> &'static str {
        "count"
    }

    fn arity(&self) -> usize {
        2
    }

    fn value_params(&self) -> &'static [usize] {
        &[1]
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        if let ActionParam::Counter(c) = &params[0] {
            c.increment(ctx.index(&params[1]), ctx.pkt.len() as u64);
        }
    }
}

/// `register_read(dst, register_array, index)`
pub struct RegisterRead;

impl Primitive for RegisterRead {
    fn name(&self) -> &'static str {
        "register_read"
    }

    fn arity(&self) -> usize {
        3
    }

    fn value_params(&self) -> &'static [usize] {
        &[2]
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        if let ActionParam::Register(r) = &params[1] {
            if let Some(v) = r.read(ctx.index(&params[2])) {
                ctx.set_field(&params[0], v);
            }
        }
    }
}

/// `register_write(register_array, index, value)`
pub struct RegisterWrite;

impl Primitive for RegisterWrite {
    fn name(&self) -> &'static str {
        "register_write"
    }

    fn arity(&self) -> usize {
        3
    }

    fn value_params(&self) -> &'static [usize] {
        &[1, 2]
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        if let ActionParam::Register(r) = &params[0] {
            r.write(ctx.index(&params[1]), ctx.value(&params[2]));
        }
    }
}

/// `execute_meter(meter_array, index, dst)`
pub struct ExecuteMeter;

impl Primitive for ExecuteMeter {
    fn name(&self) -> &'static str {
        "execute_meter"
    }

    fn arity(&self) -> usize {
        3
    }

    fn value_params(&self) -> &'static [usize] {
        &[1]
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        if let ActionParam::Meter(m) = &params[0] {
            let units = match m.kind {
                MeterType::Packets => 1,
                MeterType::Bytes => ctx.pkt.len() as u64,
            };
            let color = m.execute(ctx.index(&params[1]), units, Moment::now());
            ctx.set_field(&params[2], Data(u128::from(color.0)));
        }
    }
}

/// `modify_field_with_hash_based_offset(dst, base, calculation, size)`:
/// `dst = base + hash % size`.
pub struct ModifyFieldWithHashBasedOffset;

impl Primitive for ModifyFieldWithHashBasedOffset {
    fn name(&self) -> &'static str {
        "modify_field_with_hash_based_offset"
    }

    fn arity(&self) -> usize {
        4
    }

    fn value_params(&self) -> &'static [usize] {
        &[1, 3]
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        if let ActionParam::Calculation(calc) = &params[2] {
            let base = ctx.value(&params[1]).get();
            let size = ctx.value(&params[3]).get();
            let hash = u128::from(calc.compute(&*ctx.pkt));
            let off = hash.checked_rem(size).unwrap_or(0);
            ctx.set_field(&params[0], Data(base.wrapping_add(off)));
        }
    }
}

/// `generate_digest(receiver, learn_list_id)`
pub struct GenerateDigest;

impl Primitive for GenerateDigest {
    fn name(&self) -> &'static str {
        "generate_digest"
    }

    fn arity(&self) -> usize {
        2
    }

    fn value_params(&self) -> &'static [usize] {
        &[1]
    }

    fn execute(&self, ctx: &mut ActionCtx<'_>, params: &[ActionParam]) {
        let id = ctx.value(&params[1]).get();
        if let Ok(id) = u32::try_from(id) {
            ctx.learn.learn(id, &ctx.pkt.phv);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::calc::BufBuilder;
    use crate::engine::calc::Calculation;
    use crate::engine::hash;
    use crate::engine::header::HeaderType;
    use crate::engine::learn::LearnEngine;
    use crate::engine::packet::Packet;
    use crate::engine::phv::HeaderId;
    use crate::engine::phv::PhvTemplate;
    use crate::engine::stateful::CounterArray;
    use crate::engine::stateful::RegisterArray;
    use crate::provider::NullWriter;

    struct Fixture {
        t: PhvTemplate,
        pkt: Packet,
        learn: LearnEngine,
    }

    fn fixture() -> Fixture {
        let ht = Arc::new(HeaderType::new(
            "h_t",
            0,
            &[("a".to_string(), 8), ("b".to_string(), 8)],
        ));
        let mut t = PhvTemplate::new();
        t.push_header("h0", ht.clone(), false);
        t.push_header("h1", ht, false);
        let pkt = Packet::new(0, vec![0; 10], t.new_phv());
        Fixture { t, pkt, learn: LearnEngine::new(Arc::new(NullWriter)) }
    }

    fn run(fx: &mut Fixture, p: &dyn Primitive, params: &[ActionParam]) {
        let mut ctx =
            ActionCtx { pkt: &mut fx.pkt, data: &[], learn: &fx.learn };
        p.execute(&mut ctx, params);
    }

    #[test]
    fn header_validity() {
        let mut fx = fixture();
        let h0 = ActionParam::Header(HeaderId(0));
        let a = fx.t.field_id("h0", "a").unwrap();
        fx.pkt.phv.field_mut(a).unwrap().set(Data(9));

        run(&mut fx, &AddHeader, &[h0.clone()]);
        assert!(fx.pkt.phv.header(HeaderId(0)).is_valid());
        assert_eq!(fx.pkt.phv.field(a).get(), Data(0));

        let h1 = ActionParam::Header(HeaderId(1));
        run(&mut fx, &CopyHeader, &[h1, h0.clone()]);
        assert!(fx.pkt.phv.header(HeaderId(1)).is_valid());

        run(&mut fx, &RemoveHeader, &[h0]);
        assert!(!fx.pkt.phv.header(HeaderId(0)).is_valid());
    }

    #[test]
    fn field_arithmetic_wraps() {
        let mut fx = fixture();
        let fa = fx.t.field_id("h0", "a").unwrap();
        let a = ActionParam::Field(fa);
        let one = ActionParam::Const(Data(1));
        run(&mut fx, &SubtractFromField, &[a.clone(), one]);
        assert_eq!(fx.pkt.phv.field(fa).get(), Data(0xff));
        run(&mut fx, &AddToField, &[a, ActionParam::Const(Data(2))]);
        assert_eq!(fx.pkt.phv.field(fa).get(), Data(1));
    }

    #[test]
    fn stateful_primitives() {
        let mut fx = fixture();
        let c = Arc::new(CounterArray::new("c", 0, 4));
        let idx = ActionParam::Const(Data(2));
        run(&mut fx, &Count, &[ActionParam::Counter(c.clone()), idx]);
        assert_eq!(c.read(2), Some((1, 10)));

        let r = Arc::new(RegisterArray::new("r", 0, 4, 8));
        let fb = fx.t.field_id("h0", "b").unwrap();
        let b = ActionParam::Field(fb);
        run(
            &mut fx,
            &RegisterWrite,
            &[
                ActionParam::Register(r.clone()),
                ActionParam::Const(Data(1)),
                ActionParam::Const(Data(0x77)),
            ],
        );
        run(
            &mut fx,
            &RegisterRead,
            &[b, ActionParam::Register(r), ActionParam::Const(Data(1))],
        );
        assert_eq!(fx.pkt.phv.field(fb).get(), Data(0x77));
    }

    #[test]
    fn hash_based_offset() {
        let mut fx = fixture();
        let calc = Arc::new(Calculation::new(
            "c",
            0,
            "xxh64",
            BufBuilder::new(),
            hash::xxh64,
        ));
        let a = fx.t.field_id("h0", "a").unwrap();
        run(
            &mut fx,
            &ModifyFieldWithHashBasedOffset,
            &[
                ActionParam::Field(a),
                ActionParam::Const(Data(10)),
                ActionParam::Calculation(calc),
                ActionParam::Const(Data(4)),
            ],
        );
        let expect = 10 + u128::from(hash::xxh64(&[]) % 4);
        assert_eq!(fx.pkt.phv.field(a).get(), Data(expect));
    }

    #[test]
    fn drop_marks_packet() {
        let mut fx = fixture();
        run(&mut fx, &MarkToDrop, &[]);
        assert!(fx.pkt.is_dropped());
    }
}
