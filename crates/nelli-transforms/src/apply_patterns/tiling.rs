//! Cleanups for the loop nests produced by tiling.

use smallvec::SmallVec;

use nelli_ir::dialect::{affine, arith, linalg, scf, tensor, vector};
use nelli_ir::rewrite::{PatternRewriter, RewritePattern};
use nelli_ir::{DialectOp, IrContext, OpRef, ValueDef, ValueRef};

use super::ApplyPatternsOptions;

pub(super) fn patterns(_: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![
        Box::new(DropUnchangedIterArgs),
        Box::new(DimOfIterArg),
        Box::new(FoldConstantMinMax),
    ]
}

/// Pattern for `scf.for` iter args yielded unchanged -> loop without them
struct DropUnchangedIterArgs;

impl RewritePattern for DropUnchangedIterArgs {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(for_op) = scf::For::from_op(ctx, op) else {
            return false;
        };
        let Some(yield_op) = for_op.yield_op(ctx) else {
            return false;
        };
        let iter_args: SmallVec<[ValueRef; 4]> = for_op.iter_args(ctx).into();
        let yielded: SmallVec<[ValueRef; 4]> = yield_op.values(ctx).into();
        let unchanged: SmallVec<[bool; 4]> = iter_args
            .iter()
            .zip(&yielded)
            .map(|(arg, value)| arg == value)
            .collect();
        if !unchanged.contains(&true) {
            return false;
        }

        let inits: SmallVec<[ValueRef; 4]> = for_op.inits(ctx).into();
        let results: SmallVec<[ValueRef; 4]> = for_op.results(ctx).into();
        let kept_inits: SmallVec<[ValueRef; 4]> = inits
            .iter()
            .zip(&unchanged)
            .filter(|&(_, &drop)| !drop)
            .map(|(&v, _)| v)
            .collect();

        let loc = ctx.op(op).location;
        let (lower, upper, step) = (
            for_op.lower_bound(ctx),
            for_op.upper_bound(ctx),
            for_op.step(ctx),
        );
        let new_loop = scf::r#for(ctx, loc, lower, upper, step, &kept_inits);
        let new_body = new_loop.body(ctx);

        let old_body = for_op.body(ctx);
        let new_iv = new_loop.induction_var(ctx);
        ctx.replace_all_uses(for_op.induction_var(ctx), new_iv);
        let new_args: SmallVec<[ValueRef; 4]> = new_loop.iter_args(ctx).into();
        let new_results: SmallVec<[ValueRef; 4]> = new_loop.results(ctx).into();
        let mut next = 0;
        let replacements: SmallVec<[ValueRef; 4]> = unchanged
            .iter()
            .enumerate()
            .map(|(i, &drop)| {
                if drop {
                    inits[i]
                } else {
                    next += 1;
                    new_args[next - 1]
                }
            })
            .collect();
        let mut next = 0;
        for (i, &drop) in unchanged.iter().enumerate() {
            ctx.replace_all_uses(iter_args[i], replacements[i]);
            if drop {
                ctx.replace_all_uses(results[i], inits[i]);
            } else {
                ctx.replace_all_uses(results[i], new_results[next]);
                next += 1;
            }
        }
        // A kept iter arg may yield another iter arg.
        let kept_values: SmallVec<[ValueRef; 4]> = yielded
            .iter()
            .zip(&unchanged)
            .filter(|&(_, &drop)| !drop)
            .map(|(&v, _)| {
                iter_args
                    .iter()
                    .position(|&a| a == v)
                    .map_or(v, |p| replacements[p])
            })
            .collect();

        let body_ops = ctx.block(old_body).ops.clone();
        for body_op in body_ops {
            if body_op == yield_op.op_ref() {
                continue;
            }
            ctx.remove_op_from_block(old_body, body_op);
            ctx.push_op(new_body, body_op);
        }
        let new_yield = scf::r#yield(ctx, loc, &kept_values);
        ctx.push_op(new_body, new_yield.op_ref());

        if let Some(block) = ctx.op(op).parent_block {
            ctx.insert_op_before(block, op, new_loop.op_ref());
        }
        ctx.erase_op(op);
        rewriter.modified_in_place();
        true
    }
}

/// Whether the value yielded for iter arg `index` only ever rewrites the
/// iter arg in place, so it keeps the iter arg's shape.
fn is_shape_preserving(ctx: &IrContext, for_op: scf::For, index: usize) -> bool {
    let Some(yield_op) = for_op.yield_op(ctx) else {
        return false;
    };
    let iter_arg = for_op.iter_args(ctx)[index];
    let Some(&yielded) = yield_op.values(ctx).get(index) else {
        return false;
    };
    let mut value = yielded;
    loop {
        if value == iter_arg {
            return true;
        }
        let Some(def) = ctx.defining_op(value) else {
            return false;
        };
        if linalg::is_structured(ctx, def) {
            let Some(pos) = ctx.op_results(def).iter().position(|&r| r == value) else {
                return false;
            };
            let Some(&init) = linalg::inits(ctx, def).get(pos) else {
                return false;
            };
            value = init;
        } else if let Ok(write) = vector::TransferWrite::from_op(ctx, def) {
            value = write.dest(ctx);
        } else {
            return false;
        }
    }
}

/// Pattern for `tensor.dim` of an `scf.for` iter arg -> `tensor.dim` of its init
struct DimOfIterArg;

impl RewritePattern for DimOfIterArg {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(dim) = tensor::Dim::from_op(ctx, op) else {
            return false;
        };
        let source = ctx.op_operands(dim.op_ref())[0];
        let ValueDef::BlockArg(block, index) = ctx.value_def(source) else {
            return false;
        };
        let Some(for_op) = ctx
            .block_parent_op(block)
            .and_then(|parent| scf::For::from_op(ctx, parent).ok())
        else {
            return false;
        };
        // Argument 0 is the induction variable.
        let Some(arg) = (index as usize).checked_sub(1) else {
            return false;
        };
        if !is_shape_preserving(ctx, for_op, arg) {
            return false;
        }
        let init = for_op.inits(ctx)[arg];
        ctx.set_operand(op, 0, init);
        rewriter.modified_in_place();
        true
    }
}

/// Pattern for `affine.min`/`affine.max` over constants only -> constant
struct FoldConstantMinMax;

impl RewritePattern for FoldConstantMinMax {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let (constants, operands, is_min) = if let Ok(min) = affine::Min::from_op(ctx, op) {
            (min.constants(ctx), min.operands(ctx), true)
        } else if let Ok(max) = affine::Max::from_op(ctx, op) {
            (max.constants(ctx), max.operands(ctx), false)
        } else {
            return false;
        };
        let Some(operand_values) = operands
            .iter()
            .map(|&v| arith::const_int_value(ctx, v))
            .collect::<Option<SmallVec<[i64; 4]>>>()
        else {
            return false;
        };
        let all = constants.iter().chain(&operand_values).copied();
        let Some(folded) = (if is_min { all.min() } else { all.max() }) else {
            return false;
        };
        let loc = ctx.op(op).location;
        let constant = arith::constant_index(ctx, loc, folded);
        rewriter.replace_op(constant.op_ref());
        true
    }
}
