//! Canonicalization: constant folding, algebraic identities and removal of
//! trivially redundant structure.

use smallvec::SmallVec;

use nelli_ir::dialect::arith::{self, BinaryKind};
use nelli_ir::dialect::{affine, memref, scf, tensor, vector};
use nelli_ir::rewrite::{PatternRewriter, RewritePattern};
use nelli_ir::{Attribute, DialectOp, IrContext, OpRef, ShapedType, ValueRef};

use super::ApplyPatternsOptions;
use crate::loop_utils::loop_bounds;

pub(super) fn patterns(_: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![
        Box::new(FoldConstantBinary),
        Box::new(FoldIdentity),
        Box::new(FoldStaticDim),
        Box::new(FoldNoopCast),
        Box::new(FoldShapeCastChain),
        Box::new(InlineConstantIf),
        Box::new(EraseZeroTripLoop),
        Box::new(EraseUnusedAllocation),
    ]
}

/// Boolean value of a scalar constant (`true`/`false` or an integer).
pub(super) fn const_bool(ctx: &IrContext, v: ValueRef) -> Option<bool> {
    let op = arith::Constant::from_op(ctx, ctx.defining_op(v)?).ok()?;
    let value = op.value(ctx)?;
    value.as_bool().or_else(|| value.as_i64().map(|i| i != 0))
}

/// Pattern for `arith.<binop>` of two constants -> `arith.constant`
struct FoldConstantBinary;

impl RewritePattern for FoldConstantBinary {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Some(kind) = BinaryKind::of(ctx, op) else {
            return false;
        };
        let &[lhs, rhs] = ctx.op_operands(op) else {
            return false;
        };
        let value = if kind.is_float() {
            let (Some(l), Some(r)) = (arith::const_float_value(ctx, lhs), arith::const_float_value(ctx, rhs)) else {
                return false;
            };
            let Some(folded) = kind.fold_float(l, r) else {
                return false;
            };
            Attribute::float(folded)
        } else {
            let (Some(l), Some(r)) = (arith::const_int_value(ctx, lhs), arith::const_int_value(ctx, rhs)) else {
                return false;
            };
            let Some(folded) = kind.fold_int(l, r) else {
                return false;
            };
            Attribute::int(folded)
        };
        let loc = ctx.op(op).location;
        let ty = ctx.op_result_types(op)[0];
        let constant = arith::constant(ctx, loc, ty, value);
        rewriter.replace_op(constant.op_ref());
        true
    }
}

/// Pattern for `x + 0`, `0 + x`, `x - 0`, `x * 1`, `1 * x` -> `x`
struct FoldIdentity;

impl RewritePattern for FoldIdentity {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Some(kind) = BinaryKind::of(ctx, op) else {
            return false;
        };
        let &[lhs, rhs] = ctx.op_operands(op) else {
            return false;
        };
        let int = |v| arith::const_int_value(ctx, v);
        let float = |v| arith::const_float_value(ctx, v);
        let kept = match kind {
            BinaryKind::AddI if int(rhs) == Some(0) => lhs,
            BinaryKind::AddI if int(lhs) == Some(0) => rhs,
            BinaryKind::SubI if int(rhs) == Some(0) => lhs,
            BinaryKind::MulI if int(rhs) == Some(1) => lhs,
            BinaryKind::MulI if int(lhs) == Some(1) => rhs,
            BinaryKind::MulF if float(rhs) == Some(1.0) => lhs,
            BinaryKind::MulF if float(lhs) == Some(1.0) => rhs,
            _ => return false,
        };
        rewriter.erase_op(vec![kept]);
        true
    }
}

/// Pattern for `tensor.dim`/`memref.dim` of a static dimension -> constant
struct FoldStaticDim;

impl RewritePattern for FoldStaticDim {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        if !tensor::Dim::matches(ctx, op) && !memref::Dim::matches(ctx, op) {
            return false;
        }
        let &[source, index] = ctx.op_operands(op) else {
            return false;
        };
        let Some(dim) = arith::const_int_value(ctx, index) else {
            return false;
        };
        let Some(shaped) = ShapedType::of(ctx, ctx.value_ty(source)) else {
            return false;
        };
        let Some(&size) = usize::try_from(dim).ok().and_then(|d| shaped.shape.get(d)) else {
            return false;
        };
        if size == nelli_ir::DYNAMIC {
            return false;
        }
        let loc = ctx.op(op).location;
        let constant = arith::constant_index(ctx, loc, size);
        rewriter.replace_op(constant.op_ref());
        true
    }
}

/// Pattern for `tensor.cast` to the source's own type -> source
struct FoldNoopCast;

impl RewritePattern for FoldNoopCast {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        if !tensor::Cast::matches(ctx, op) {
            return false;
        }
        let source = ctx.op_operands(op)[0];
        if ctx.value_ty(source) != ctx.op_result_types(op)[0] {
            return false;
        }
        rewriter.erase_op(vec![source]);
        true
    }
}

/// Pattern for `shape_cast(shape_cast(x))` -> `shape_cast(x)`, or `x` when
/// the types round-trip
struct FoldShapeCastChain;

impl RewritePattern for FoldShapeCastChain {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(outer) = vector::ShapeCast::from_op(ctx, op) else {
            return false;
        };
        let source = outer.source(ctx);
        let ty = ctx.op_result_types(op)[0];
        if ctx.value_ty(source) == ty {
            rewriter.erase_op(vec![source]);
            return true;
        }
        let Some(inner) = ctx
            .defining_op(source)
            .and_then(|def| vector::ShapeCast::from_op(ctx, def).ok())
        else {
            return false;
        };
        let original = inner.source(ctx);
        if ctx.value_ty(original) == ty {
            rewriter.erase_op(vec![original]);
        } else {
            let loc = ctx.op(op).location;
            let cast = vector::shape_cast(ctx, loc, original, ty);
            rewriter.replace_op(cast.op_ref());
        }
        true
    }
}

/// Pattern for `scf.if` on a constant condition -> the taken branch, inlined
struct InlineConstantIf;

impl RewritePattern for InlineConstantIf {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(if_op) = scf::If::from_op(ctx, op) else {
            return false;
        };
        let Some(cond) = const_bool(ctx, if_op.condition(ctx)) else {
            return false;
        };
        let taken = if cond {
            Some(if_op.then_block(ctx))
        } else {
            if_op.else_block(ctx)
        };
        let Some(block) = taken else {
            if !ctx.op_results(op).is_empty() {
                return false;
            }
            rewriter.erase_op(Vec::new());
            return true;
        };
        let terminator = ctx.inline_block_before(block, op, &[]);
        let yielded: Vec<ValueRef> = terminator
            .map(|t| ctx.op_operands(t).to_vec())
            .unwrap_or_default();
        rewriter.erase_op(yielded);
        true
    }
}

/// Pattern for a loop with zero iterations -> its inits
struct EraseZeroTripLoop;

impl RewritePattern for EraseZeroTripLoop {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let inits: SmallVec<[ValueRef; 4]> = if let Ok(for_op) = scf::For::from_op(ctx, op) {
            for_op.inits(ctx).into()
        } else if let Ok(for_op) = affine::For::from_op(ctx, op) {
            for_op.inits(ctx).into()
        } else {
            return false;
        };
        if loop_bounds(ctx, op).and_then(|b| b.trip_count()) != Some(0) {
            return false;
        }
        rewriter.erase_op(inits.into_vec());
        true
    }
}

/// Pattern for an allocation only ever deallocated -> nothing
struct EraseUnusedAllocation;

impl RewritePattern for EraseUnusedAllocation {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        if !memref::Alloc::matches(ctx, op) && !memref::Alloca::matches(ctx, op) {
            return false;
        }
        let users = ctx.users(ctx.op_result(op, 0));
        if !users.iter().all(|&u| memref::Dealloc::matches(ctx, u)) {
            return false;
        }
        for user in users {
            ctx.erase_op(user);
        }
        ctx.erase_op(op);
        rewriter.modified_in_place();
        true
    }
}
