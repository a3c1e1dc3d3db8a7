//! Affine dialect: constant-bound loops and min/max over constants and values.

use smallvec::SmallVec;

use crate::context::{IrContext, OperationDataBuilder};
use crate::dialect::{core, int_list_attr};
use crate::ir::Symbol;
use crate::refs::{BlockRef, TypeRef, ValueRef};
use crate::types::{Attribute, Location};
use crate::{define_op, register_loop_like_op, register_pure_op};

define_op! {
    /// `affine.for %inits... {lower_bound, upper_bound, step}`
    pub struct For = affine.for;
    pub struct Yield = affine.yield;
    /// `affine.min %operands... {constants = [..]}`: minimum over both.
    pub struct Min = affine.min;
    pub struct Max = affine.max;
}

register_loop_like_op!(affine.for);
register_pure_op!(affine.min, affine.max);

pub fn r#for(
    ctx: &mut IrContext,
    loc: Location,
    lower: i64,
    upper: i64,
    step: i64,
    inits: &[ValueRef],
) -> For {
    let index = core::index(ctx);
    let iter_tys: SmallVec<[TypeRef; 4]> = inits.iter().map(|&v| ctx.value_ty(v)).collect();
    let (region, _) =
        ctx.create_single_block_region(loc, std::iter::once(index).chain(iter_tys.iter().copied()));
    let op = OperationDataBuilder::new(loc, Symbol::new("affine"), Symbol::new("for"))
        .operands(inits.iter().copied())
        .results(iter_tys)
        .attr("lower_bound", Attribute::int(lower))
        .attr("upper_bound", Attribute::int(upper))
        .attr("step", Attribute::int(step))
        .region(region)
        .create(ctx);
    For(op)
}

impl For {
    fn bound(self, ctx: &IrContext, key: &'static str) -> Option<i64> {
        ctx.op(self.0).attr(key).and_then(Attribute::as_i64)
    }

    pub fn lower_bound(self, ctx: &IrContext) -> Option<i64> {
        self.bound(ctx, "lower_bound")
    }

    pub fn upper_bound(self, ctx: &IrContext) -> Option<i64> {
        self.bound(ctx, "upper_bound")
    }

    pub fn step(self, ctx: &IrContext) -> Option<i64> {
        self.bound(ctx, "step")
    }

    pub fn inits(self, ctx: &IrContext) -> &[ValueRef] {
        ctx.op_operands(self.0)
    }

    pub fn body(self, ctx: &IrContext) -> BlockRef {
        ctx.region(ctx.op(self.0).regions[0]).blocks[0]
    }

    pub fn induction_var(self, ctx: &IrContext) -> ValueRef {
        ctx.block_arg(self.body(ctx), 0)
    }

    pub fn iter_args(self, ctx: &IrContext) -> &[ValueRef] {
        &ctx.block_args(self.body(ctx))[1..]
    }
}

pub fn r#yield(ctx: &mut IrContext, loc: Location, values: &[ValueRef]) -> Yield {
    let op = OperationDataBuilder::new(loc, Symbol::new("affine"), Symbol::new("yield"))
        .operands(values.iter().copied())
        .create(ctx);
    Yield(op)
}

fn min_max(
    ctx: &mut IrContext,
    loc: Location,
    name: &'static str,
    operands: &[ValueRef],
    constants: &[i64],
) -> crate::refs::OpRef {
    let index = core::index(ctx);
    OperationDataBuilder::new(loc, Symbol::new("affine"), Symbol::new(name))
        .operands(operands.iter().copied())
        .attr("constants", Attribute::int_list(constants.iter().copied()))
        .result(index)
        .create(ctx)
}

pub fn min(ctx: &mut IrContext, loc: Location, operands: &[ValueRef], constants: &[i64]) -> Min {
    Min(min_max(ctx, loc, "min", operands, constants))
}

pub fn max(ctx: &mut IrContext, loc: Location, operands: &[ValueRef], constants: &[i64]) -> Max {
    Max(min_max(ctx, loc, "max", operands, constants))
}

impl Min {
    pub fn constants(self, ctx: &IrContext) -> SmallVec<[i64; 4]> {
        int_list_attr(ctx, self.0, "constants")
    }

    pub fn operands(self, ctx: &IrContext) -> &[ValueRef] {
        ctx.op_operands(self.0)
    }
}

impl Max {
    pub fn constants(self, ctx: &IrContext) -> SmallVec<[i64; 4]> {
        int_list_attr(ctx, self.0, "constants")
    }

    pub fn operands(self, ctx: &IrContext) -> &[ValueRef] {
        ctx.op_operands(self.0)
    }
}
