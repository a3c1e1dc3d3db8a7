//! Tensor-level rewrites: reshape folding, empty-tensor slicing, padding
//! swaps and splat generation.

use smallvec::SmallVec;

use nelli_ir::dialect::{SliceParams, arith, tensor};
use nelli_ir::rewrite::{PatternRewriter, RewritePattern};
use nelli_ir::{DialectOp, IrContext, OpRef, ShapedType, ValueRef};

use super::ApplyPatternsOptions;

pub(super) fn additional(_: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(GenerateToSplat)]
}

pub(super) fn fold_tensor_empty_extract(_: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(FoldEmptyExtract)]
}

pub(super) fn fold_reassociative_reshapes(
    _: &ApplyPatternsOptions,
) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(FoldReshapePair)]
}

pub(super) fn swapping(options: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(SwapExtractSliceOfPad {
        elide_conditional: options.swap_padding_elide_conditional,
    })]
}

/// Pattern for `tensor.generate` yielding one scalar constant -> splat
/// `arith.constant`
struct GenerateToSplat;

impl RewritePattern for GenerateToSplat {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(generate) = tensor::Generate::from_op(ctx, op) else {
            return false;
        };
        let ty = ctx.op_result_types(op)[0];
        if !ShapedType::of(ctx, ty).is_some_and(|s| s.has_static_shape()) {
            return false;
        }
        let Some(yield_op) = ctx.block_terminator(generate.body(ctx)) else {
            return false;
        };
        let Some(&value) = ctx.op_operands(yield_op).first() else {
            return false;
        };
        let Some(constant) = ctx
            .defining_op(value)
            .and_then(|def| arith::Constant::from_op(ctx, def).ok())
        else {
            return false;
        };
        let Some(attr) = constant.value(ctx).cloned() else {
            return false;
        };
        let loc = ctx.op(op).location;
        let splat = arith::constant(ctx, loc, ty, attr);
        rewriter.replace_op(splat.op_ref());
        true
    }
}

/// Pattern for `extract_slice(empty)` with a static result -> `tensor.empty`
struct FoldEmptyExtract;

impl RewritePattern for FoldEmptyExtract {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(slice) = tensor::ExtractSlice::from_op(ctx, op) else {
            return false;
        };
        let source = slice.source(ctx);
        let from_empty = ctx
            .defining_op(source)
            .is_some_and(|def| tensor::Empty::matches(ctx, def));
        if !from_empty || ctx.uses(source).len() != 1 {
            return false;
        }
        let ty = ctx.op_result_types(op)[0];
        if !ShapedType::of(ctx, ty).is_some_and(|s| s.has_static_shape()) {
            return false;
        }
        let loc = ctx.op(op).location;
        let empty = tensor::empty(ctx, loc, ty, &[]);
        rewriter.replace_op(empty.op_ref());
        true
    }
}

/// Pattern for `collapse_shape(expand_shape(x))` and
/// `expand_shape(collapse_shape(x))` with one reassociation -> `x`
struct FoldReshapePair;

impl RewritePattern for FoldReshapePair {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let inverse_matches: fn(&IrContext, OpRef) -> bool =
            if tensor::CollapseShape::matches(ctx, op) {
                tensor::ExpandShape::matches
            } else if tensor::ExpandShape::matches(ctx, op) {
                tensor::CollapseShape::matches
            } else {
                return false;
            };
        let source = ctx.op_operands(op)[0];
        let Some(inner) = ctx.defining_op(source) else {
            return false;
        };
        if !inverse_matches(ctx, inner) {
            return false;
        }
        let original = ctx.op_operands(inner)[0];
        let same_groups = tensor::reassociation(ctx, op)
            .is_some_and(|outer| tensor::reassociation(ctx, inner) == Some(outer));
        if !same_groups || ctx.value_ty(original) != ctx.op_result_types(op)[0] {
            return false;
        }
        rewriter.erase_op(vec![original]);
        true
    }
}

/// Per-dimension geometry of a slice of a padded tensor, in source terms.
struct SwappedDim {
    offset: i64,
    size: i64,
    low: i64,
    high: i64,
}

/// Split the slice `[offset, offset + size)` of a dimension padded with
/// `low` before and any amount after a source of `source_size` elements.
fn swap_dim(offset: i64, size: i64, source_size: i64, low: i64) -> SwappedDim {
    let begin = (offset - low).clamp(0, source_size);
    let end = (offset + size - low).clamp(0, source_size);
    let new_low = (low - offset).clamp(0, size);
    let new_size = end - begin;
    SwappedDim {
        offset: begin,
        size: new_size,
        low: new_low,
        high: size - new_low - new_size,
    }
}

/// Pattern for `extract_slice(pad(x))` -> `pad(extract_slice(x))`
///
/// A slice that reads only padding becomes a `tensor.generate` of the
/// padding value, unless `elide_conditional` is set.
struct SwapExtractSliceOfPad {
    elide_conditional: bool,
}

impl RewritePattern for SwapExtractSliceOfPad {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(slice) = tensor::ExtractSlice::from_op(ctx, op) else {
            return false;
        };
        let Some(pad) = ctx
            .defining_op(slice.source(ctx))
            .and_then(|def| tensor::Pad::from_op(ctx, def).ok())
        else {
            return false;
        };
        let Some(params) = slice.params(ctx) else {
            return false;
        };
        let (Some(offsets), Some(sizes), Some(strides)) = (
            params.constant_offsets(ctx),
            params.constant_sizes(ctx),
            params.constant_strides(ctx),
        ) else {
            return false;
        };
        if strides.iter().any(|&s| s != 1) {
            return false;
        }
        let source = pad.source(ctx);
        let Some(source_ty) = ShapedType::of(ctx, ctx.value_ty(source)) else {
            return false;
        };
        let low = pad.low(ctx);
        if !source_ty.has_static_shape()
            || low.len() != source_ty.rank()
            || offsets.len() != source_ty.rank()
        {
            return false;
        }

        let dims: SmallVec<[SwappedDim; 4]> = (0..source_ty.rank())
            .map(|d| swap_dim(offsets[d], sizes[d], source_ty.shape[d], low[d]))
            .collect();
        let loc = ctx.op(op).location;
        let padding_value = pad.padding_value(ctx);

        if dims.iter().any(|d| d.size == 0) {
            if self.elide_conditional {
                return false;
            }
            let ty = ctx.op_result_types(op)[0];
            let Some(generate) = tensor::generate(ctx, loc, ty, &[]) else {
                return false;
            };
            let yield_op = tensor::r#yield(ctx, loc, padding_value);
            let body = generate.body(ctx);
            ctx.push_op(body, yield_op.op_ref());
            rewriter.replace_op(generate.op_ref());
            return true;
        }

        let inner_params = SliceParams::from_static(
            dims.iter().map(|d| d.offset),
            dims.iter().map(|d| d.size),
            dims.iter().map(|_| 1),
        );
        let Some(inner) = tensor::extract_slice(ctx, loc, source, &inner_params) else {
            return false;
        };
        let new_low: SmallVec<[i64; 4]> = dims.iter().map(|d| d.low).collect();
        let new_high: SmallVec<[i64; 4]> = dims.iter().map(|d| d.high).collect();
        let inner_value: ValueRef = inner.result(ctx);
        let Some(new_pad) = tensor::pad(ctx, loc, inner_value, padding_value, &new_low, &new_high)
        else {
            return false;
        };
        rewriter.replace_with_prefix(vec![inner.op_ref()], new_pad.op_ref());
        true
    }
}
