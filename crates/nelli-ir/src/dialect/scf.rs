//! Structured control flow: `scf.for`, `scf.if` and `scf.forall`.

use smallvec::SmallVec;

use crate::context::{IrContext, OperationDataBuilder};
use crate::dialect::{core, int_list_attr};
use crate::ir::Symbol;
use crate::ops::DialectOp;
use crate::refs::{BlockRef, OpRef, TypeRef, ValueRef};
use crate::types::{Attribute, Location};
use crate::{define_op, register_loop_like_op};

define_op! {
    /// `scf.for %lb, %ub, %step, %inits...` with body `(iv, iter_args...)`.
    pub struct For = scf.for;
    /// `scf.if %cond` with a then and an else region.
    pub struct If = scf.if;
    pub struct Yield = scf.yield;
    /// `scf.forall %shared_outs... {upper_bound = [..]}` with body
    /// `(ivs..., out_args...)` terminated by `scf.in_parallel`.
    pub struct Forall = scf.forall;
    pub struct InParallel = scf.in_parallel;
}

register_loop_like_op!(scf.for, scf.forall);

/// Create a loop with an empty body block `(iv, iter_args...)`.
///
/// The caller fills the body and terminates it with [`r#yield`].
pub fn r#for(
    ctx: &mut IrContext,
    loc: Location,
    lower: ValueRef,
    upper: ValueRef,
    step: ValueRef,
    inits: &[ValueRef],
) -> For {
    let iv_ty = ctx.value_ty(lower);
    let iter_tys: SmallVec<[TypeRef; 4]> = inits.iter().map(|&v| ctx.value_ty(v)).collect();
    let (region, _) =
        ctx.create_single_block_region(loc, std::iter::once(iv_ty).chain(iter_tys.iter().copied()));
    let op = OperationDataBuilder::new(loc, Symbol::new("scf"), Symbol::new("for"))
        .operands([lower, upper, step])
        .operands(inits.iter().copied())
        .results(iter_tys)
        .region(region)
        .create(ctx);
    For(op)
}

impl For {
    pub fn lower_bound(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn upper_bound(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[1]
    }

    pub fn step(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[2]
    }

    pub fn inits(self, ctx: &IrContext) -> &[ValueRef] {
        &ctx.op_operands(self.0)[3..]
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

    pub fn results(self, ctx: &IrContext) -> &[ValueRef] {
        ctx.op_results(self.0)
    }

    pub fn yield_op(self, ctx: &IrContext) -> Option<Yield> {
        let term = ctx.block_terminator(self.body(ctx))?;
        Yield::from_op(ctx, term).ok()
    }
}

/// Create a conditional with empty then/else blocks.
pub fn r#if(ctx: &mut IrContext, loc: Location, cond: ValueRef, result_types: &[TypeRef]) -> If {
    let (then_region, _) = ctx.create_single_block_region(loc, []);
    let (else_region, _) = ctx.create_single_block_region(loc, []);
    let op = OperationDataBuilder::new(loc, Symbol::new("scf"), Symbol::new("if"))
        .operand(cond)
        .results(result_types.iter().copied())
        .region(then_region)
        .region(else_region)
        .create(ctx);
    If(op)
}

impl If {
    pub fn condition(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn then_block(self, ctx: &IrContext) -> BlockRef {
        ctx.region(ctx.op(self.0).regions[0]).blocks[0]
    }

    pub fn else_block(self, ctx: &IrContext) -> Option<BlockRef> {
        let region = *ctx.op(self.0).regions.get(1)?;
        ctx.region(region).blocks.first().copied()
    }
}

pub fn r#yield(ctx: &mut IrContext, loc: Location, values: &[ValueRef]) -> Yield {
    let op = OperationDataBuilder::new(loc, Symbol::new("scf"), Symbol::new("yield"))
        .operands(values.iter().copied())
        .create(ctx);
    Yield(op)
}

impl Yield {
    pub fn values(self, ctx: &IrContext) -> &[ValueRef] {
        ctx.op_operands(self.0)
    }
}

/// Create a parallel loop over `upper_bounds` (lower bound 0, step 1) whose
/// body ends in an empty `scf.in_parallel`.
pub fn forall(
    ctx: &mut IrContext,
    loc: Location,
    upper_bounds: &[i64],
    shared_outs: &[ValueRef],
) -> Forall {
    let index = core::index(ctx);
    let out_tys: SmallVec<[TypeRef; 4]> = shared_outs.iter().map(|&v| ctx.value_ty(v)).collect();
    let arg_tys = std::iter::repeat_n(index, upper_bounds.len()).chain(out_tys.iter().copied());
    let (region, body) = ctx.create_single_block_region(loc, arg_tys);

    let (terminator_region, _) = ctx.create_single_block_region(loc, []);
    let terminator = OperationDataBuilder::new(loc, Symbol::new("scf"), Symbol::new("in_parallel"))
        .region(terminator_region)
        .create(ctx);
    ctx.push_op(body, terminator);

    let op = OperationDataBuilder::new(loc, Symbol::new("scf"), Symbol::new("forall"))
        .operands(shared_outs.iter().copied())
        .results(out_tys)
        .attr(
            "upper_bound",
            Attribute::int_list(upper_bounds.iter().copied()),
        )
        .region(region)
        .create(ctx);
    Forall(op)
}

impl Forall {
    pub fn upper_bounds(self, ctx: &IrContext) -> SmallVec<[i64; 4]> {
        int_list_attr(ctx, self.0, "upper_bound")
    }

    pub fn rank(self, ctx: &IrContext) -> usize {
        self.upper_bounds(ctx).len()
    }

    pub fn outputs(self, ctx: &IrContext) -> &[ValueRef] {
        ctx.op_operands(self.0)
    }

    pub fn body(self, ctx: &IrContext) -> BlockRef {
        ctx.region(ctx.op(self.0).regions[0]).blocks[0]
    }

    pub fn induction_vars(self, ctx: &IrContext) -> &[ValueRef] {
        let rank = self.rank(ctx);
        &ctx.block_args(self.body(ctx))[..rank]
    }

    /// Block arguments tied to the shared outputs.
    pub fn region_out_args(self, ctx: &IrContext) -> &[ValueRef] {
        let rank = self.rank(ctx);
        &ctx.block_args(self.body(ctx))[rank..]
    }

    pub fn terminator(self, ctx: &IrContext) -> Option<InParallel> {
        let term = ctx.block_terminator(self.body(ctx))?;
        InParallel::from_op(ctx, term).ok()
    }
}

impl InParallel {
    pub fn body(self, ctx: &IrContext) -> BlockRef {
        ctx.region(ctx.op(self.0).regions[0]).blocks[0]
    }

    /// The `tensor.parallel_insert_slice` ops publishing the results.
    pub fn yielding_ops(self, ctx: &IrContext) -> &[OpRef] {
        &ctx.block(self.body(ctx)).ops
    }
}
