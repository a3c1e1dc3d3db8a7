//! Loop utilities: constant bounds, single-iteration promotion and
//! unrolling of `scf.for` and `affine.for`.

use smallvec::SmallVec;

use nelli_ir::dialect::{affine, arith, scf};
use nelli_ir::{
    Attribute, DialectOp, IrContext, IrMapping, Location, OpRef, Symbol, ValueRef,
};

use crate::error::{TransformError, TransformResult};
use crate::transform_op::{READ_HANDLE_MODIFY_PAYLOAD, TransformEffect, TransformOp};

/// Constant bounds of a loop: it runs `lower, lower + step, ...` while
/// the induction variable is below `upper`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopBounds {
    pub lower: i64,
    pub upper: i64,
    pub step: i64,
}

impl LoopBounds {
    /// Number of iterations; `None` for a non-positive step.
    pub fn trip_count(&self) -> Option<i64> {
        if self.step <= 0 {
            return None;
        }
        if self.upper <= self.lower {
            return Some(0);
        }
        Some((self.upper - self.lower + self.step - 1) / self.step)
    }
}

/// Constant bounds of an `scf.for` or `affine.for`, when all three are known.
pub fn loop_bounds(ctx: &IrContext, op: OpRef) -> Option<LoopBounds> {
    if let Ok(for_op) = scf::For::from_op(ctx, op) {
        return Some(LoopBounds {
            lower: arith::const_int_value(ctx, for_op.lower_bound(ctx))?,
            upper: arith::const_int_value(ctx, for_op.upper_bound(ctx))?,
            step: arith::const_int_value(ctx, for_op.step(ctx))?,
        });
    }
    if let Ok(for_op) = affine::For::from_op(ctx, op) {
        return Some(LoopBounds {
            lower: for_op.lower_bound(ctx)?,
            upper: for_op.upper_bound(ctx)?,
            step: for_op.step(ctx)?,
        });
    }
    None
}

/// Structural view shared by both loop kinds.
struct LoopParts {
    body: nelli_ir::BlockRef,
    induction_var: ValueRef,
    iter_args: SmallVec<[ValueRef; 4]>,
    inits: SmallVec<[ValueRef; 4]>,
}

fn loop_parts(ctx: &IrContext, op: OpRef) -> Option<LoopParts> {
    if let Ok(for_op) = scf::For::from_op(ctx, op) {
        return Some(LoopParts {
            body: for_op.body(ctx),
            induction_var: for_op.induction_var(ctx),
            iter_args: for_op.iter_args(ctx).into(),
            inits: for_op.inits(ctx).into(),
        });
    }
    if let Ok(for_op) = affine::For::from_op(ctx, op) {
        return Some(LoopParts {
            body: for_op.body(ctx),
            induction_var: for_op.induction_var(ctx),
            iter_args: for_op.iter_args(ctx).into(),
            inits: for_op.inits(ctx).into(),
        });
    }
    None
}

/// Insert `op` right after `anchor` in the anchor's block.
pub(crate) fn insert_op_after(ctx: &mut IrContext, anchor: OpRef, op: OpRef) {
    let Some(block) = ctx.op(anchor).parent_block else {
        return;
    };
    let ops = &ctx.block(block).ops;
    let next = ops
        .iter()
        .position(|&o| o == anchor)
        .and_then(|i| ops.get(i + 1).copied());
    match next {
        Some(next) => ctx.insert_op_before(block, next, op),
        None => ctx.push_op(block, op),
    }
}

/// A constant of `like`'s type, placed before `before`.
fn constant_before(ctx: &mut IrContext, before: OpRef, like: ValueRef, value: i64) -> ValueRef {
    let loc = ctx.op(before).location;
    let ty = ctx.value_ty(like);
    let constant = arith::constant(ctx, loc, ty, Attribute::int(value));
    if let Some(block) = ctx.op(before).parent_block {
        ctx.insert_op_before(block, before, constant.op_ref());
    }
    constant.result(ctx)
}

/// Inline the body of a loop that runs exactly once in place of the loop.
///
/// Returns whether the loop was promoted.
pub fn promote_if_single_iteration(ctx: &mut IrContext, loop_op: OpRef) -> bool {
    let Some(bounds) = loop_bounds(ctx, loop_op) else {
        return false;
    };
    if bounds.trip_count() != Some(1) || ctx.op(loop_op).parent_block.is_none() {
        return false;
    }
    let Some(parts) = loop_parts(ctx, loop_op) else {
        return false;
    };

    let iv = if ctx.has_uses(parts.induction_var) {
        match scf::For::from_op(ctx, loop_op) {
            Ok(for_op) => for_op.lower_bound(ctx),
            Err(_) => constant_before(ctx, loop_op, parts.induction_var, bounds.lower),
        }
    } else {
        parts.induction_var
    };
    let mut args: SmallVec<[ValueRef; 4]> = SmallVec::new();
    args.push(iv);
    args.extend(parts.inits.iter().copied());

    let terminator = ctx.inline_block_before(parts.body, loop_op, &args);
    let yielded: SmallVec<[ValueRef; 4]> = terminator
        .map(|t| ctx.op_operands(t).into())
        .unwrap_or_default();
    let results: SmallVec<[ValueRef; 4]> = ctx.op_results(loop_op).into();
    for (&old, &new) in results.iter().zip(&yielded) {
        ctx.replace_all_uses(old, new);
    }
    tracing::trace!(op = %ctx.op(loop_op).full_name(), "promoted single-iteration loop");
    ctx.erase_op(loop_op);
    true
}

/// Loops produced by [`unroll_by_factor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnrollResult {
    /// The unrolled loop, `None` if it was promoted away.
    pub main_loop: Option<OpRef>,
    /// The loop running the remaining iterations, `None` if there are none
    /// or it was promoted away.
    pub epilogue: Option<OpRef>,
}

/// Unroll a constant-trip-count loop by `factor`.
///
/// The main loop runs `tc - tc % factor` iterations with its step
/// multiplied by `factor`, its body replicated `factor` times with the
/// induction variable offset by `i * step` in copy `i`. The remaining
/// iterations run in an epilogue loop placed after it. `annotate(i, op)` is
/// called for every top-level operation of copy `i`; a returned attribute is
/// set on the operation.
pub fn unroll_by_factor(
    ctx: &mut IrContext,
    loop_op: OpRef,
    factor: u32,
    mut annotate: impl FnMut(u32, OpRef) -> Option<(Symbol, Attribute)>,
) -> TransformResult<UnrollResult> {
    let bounds = loop_bounds(ctx, loop_op)
        .ok_or_else(|| TransformError::unroll_failed("loop bounds are not constant"))?;
    let trip_count = bounds
        .trip_count()
        .ok_or_else(|| TransformError::unroll_failed("loop step is not positive"))?;
    if factor == 0 {
        return Err(TransformError::unroll_failed("factor must be positive"));
    }
    if trip_count == 0 {
        return Ok(UnrollResult {
            main_loop: Some(loop_op),
            epilogue: None,
        });
    }
    // Loops shorter than the factor are unrolled completely.
    let factor = i64::from(factor).min(trip_count);
    if factor == 1 {
        let promoted = promote_if_single_iteration(ctx, loop_op);
        return Ok(UnrollResult {
            main_loop: (!promoted).then_some(loop_op),
            epilogue: None,
        });
    }

    let main_trips = trip_count - trip_count % factor;
    let main_upper = bounds.lower + main_trips * bounds.step;
    tracing::debug!(trip_count, factor, main_upper, "unrolling loop");

    let epilogue = (main_trips != trip_count).then(|| split_epilogue(ctx, loop_op, main_upper));
    set_bounds(ctx, loop_op, main_upper, bounds.step * factor);
    replicate_body(ctx, loop_op, factor as u32, bounds.step, &mut annotate);

    let main_loop = (!promote_if_single_iteration(ctx, loop_op)).then_some(loop_op);
    let epilogue = epilogue.filter(|&e| !promote_if_single_iteration(ctx, e));
    Ok(UnrollResult {
        main_loop,
        epilogue,
    })
}

/// Clone the loop after itself, starting at `from` and fed by the
/// original's results.
fn split_epilogue(ctx: &mut IrContext, loop_op: OpRef, from: i64) -> OpRef {
    let mut mapping = IrMapping::new();
    let epilogue = ctx.clone_op(loop_op, &mut mapping);
    insert_op_after(ctx, loop_op, epilogue);

    let results: SmallVec<[ValueRef; 4]> = ctx.op_results(loop_op).into();
    for (i, &old) in results.iter().enumerate() {
        let new = ctx.op_result(epilogue, i as u32);
        ctx.replace_all_uses(old, new);
    }
    if scf::For::matches(ctx, epilogue) {
        let lower = ctx.op_operands(loop_op)[0];
        let start = constant_before(ctx, epilogue, lower, from);
        ctx.set_operand(epilogue, 0, start);
        for (i, &result) in results.iter().enumerate() {
            ctx.set_operand(epilogue, 3 + i as u32, result);
        }
    } else {
        ctx.op_mut(epilogue)
            .attributes
            .insert(Symbol::new("lower_bound"), Attribute::int(from));
        for (i, &result) in results.iter().enumerate() {
            ctx.set_operand(epilogue, i as u32, result);
        }
    }
    epilogue
}

fn set_bounds(ctx: &mut IrContext, loop_op: OpRef, upper: i64, step: i64) {
    if scf::For::matches(ctx, loop_op) {
        let lower = ctx.op_operands(loop_op)[0];
        let upper = constant_before(ctx, loop_op, lower, upper);
        let step = constant_before(ctx, loop_op, lower, step);
        ctx.set_operand(loop_op, 1, upper);
        ctx.set_operand(loop_op, 2, step);
    } else {
        let attrs = &mut ctx.op_mut(loop_op).attributes;
        attrs.insert(Symbol::new("upper_bound"), Attribute::int(upper));
        attrs.insert(Symbol::new("step"), Attribute::int(step));
    }
}

fn annotate_op(
    ctx: &mut IrContext,
    op: OpRef,
    copy: u32,
    annotate: &mut impl FnMut(u32, OpRef) -> Option<(Symbol, Attribute)>,
) {
    if let Some((key, value)) = annotate(copy, op) {
        ctx.op_mut(op).attributes.insert(key, value);
    }
}

/// Append `factor - 1` copies of the loop body before its terminator,
/// chaining the iteration arguments through the copies.
fn replicate_body(
    ctx: &mut IrContext,
    loop_op: OpRef,
    factor: u32,
    step: i64,
    annotate: &mut impl FnMut(u32, OpRef) -> Option<(Symbol, Attribute)>,
) {
    let Some(parts) = loop_parts(ctx, loop_op) else {
        return;
    };
    let Some(terminator) = ctx.block_terminator(parts.body) else {
        return;
    };
    let original: SmallVec<[OpRef; 8]> = ctx
        .block(parts.body)
        .ops
        .iter()
        .copied()
        .filter(|&op| op != terminator)
        .collect();
    for &op in &original {
        annotate_op(ctx, op, 0, annotate);
    }

    let loc: Location = ctx.op(loop_op).location;
    let original_yield: SmallVec<[ValueRef; 4]> = ctx.op_operands(terminator).into();
    let mut yielded = original_yield.clone();
    for copy in 1..factor {
        let mut mapping = IrMapping::new();
        if ctx.has_uses(parts.induction_var) {
            let iv_ty = ctx.value_ty(parts.induction_var);
            let offset = arith::constant(ctx, loc, iv_ty, Attribute::int(i64::from(copy) * step));
            ctx.insert_op_before(parts.body, terminator, offset.op_ref());
            let offset = offset.result(ctx);
            let shifted = arith::addi(ctx, loc, parts.induction_var, offset);
            ctx.insert_op_before(parts.body, terminator, shifted.op_ref());
            mapping.map_value(parts.induction_var, ctx.op_result(shifted.op_ref(), 0));
        }
        for (&arg, &value) in parts.iter_args.iter().zip(&yielded) {
            mapping.map_value(arg, value);
        }
        for &op in &original {
            let cloned = ctx.clone_op(op, &mut mapping);
            ctx.insert_op_before(parts.body, terminator, cloned);
            annotate_op(ctx, cloned, copy, annotate);
        }
        // Copy `i` yields the clones of the original yield operands.
        yielded = original_yield
            .iter()
            .map(|&v| mapping.lookup_value(v))
            .collect();
    }
    ctx.set_operands(terminator, &yielded);
}

fn is_for_loop(ctx: &IrContext, op: OpRef) -> bool {
    scf::For::matches(ctx, op) || affine::For::matches(ctx, op)
}

/// Transform op unrolling loops by a constant factor.
///
/// A loop target is unrolled itself and must have constant bounds. Any
/// other target has every constant-bound loop under it unrolled.
pub struct LoopUnroll {
    pub factor: u32,
}

impl TransformOp for LoopUnroll {
    fn name(&self) -> &'static str {
        "loop_unroll"
    }

    fn effects(&self) -> &'static [TransformEffect] {
        READ_HANDLE_MODIFY_PAYLOAD
    }

    #[tracing::instrument(skip_all, fields(factor = self.factor))]
    fn apply(&self, ctx: &mut IrContext, target: OpRef) -> TransformResult<OpRef> {
        if is_for_loop(ctx, target) {
            unroll_by_factor(ctx, target, self.factor, |_, _| None)?;
            return Ok(target);
        }
        let mut loops: Vec<OpRef> = nelli_ir::walk::nested_ops(ctx, target)
            .into_iter()
            .filter(|&op| is_for_loop(ctx, op) && loop_bounds(ctx, op).is_some())
            .collect();
        // Innermost first, so outer bodies are copied with their inner
        // loops already unrolled.
        loops.reverse();
        for op in loops {
            unroll_by_factor(ctx, op, self.factor, |_, _| None)?;
        }
        Ok(target)
    }
}
