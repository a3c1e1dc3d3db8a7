//! Memref view folding: static subviews become explicit strided metadata,
//! and accesses through a subview go to its source.

use smallvec::SmallVec;

use nelli_ir::dialect::{arith, memref};
use nelli_ir::rewrite::{PatternRewriter, RewritePattern};
use nelli_ir::shaped::DYNAMIC;
use nelli_ir::{DialectOp, IrContext, Location, OpRef, ShapedType, ValueRef};

use super::ApplyPatternsOptions;

pub(super) fn expand_strided_metadata(_: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(SubviewToReinterpretCast)]
}

pub(super) fn fold_aliases(_: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(FoldAccessOfSubview)]
}

/// Constant offsets and strides of a subview whose rank matches its source.
fn static_view(ctx: &IrContext, view: memref::SubView) -> Option<(SmallVec<[i64; 4]>, SmallVec<[i64; 4]>)> {
    let params = view.params(ctx)?;
    let source_rank = ShapedType::of(ctx, ctx.value_ty(view.source(ctx)))?.rank();
    if params.rank() != source_rank {
        return None;
    }
    Some((params.constant_offsets(ctx)?, params.constant_strides(ctx)?))
}

/// Pattern for fully static `memref.subview` -> `memref.reinterpret_cast`
struct SubviewToReinterpretCast;

impl RewritePattern for SubviewToReinterpretCast {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(view) = memref::SubView::from_op(ctx, op) else {
            return false;
        };
        let Some((offsets, strides)) = static_view(ctx, view) else {
            return false;
        };
        let Some(sizes) = view.params(ctx).and_then(|p| p.constant_sizes(ctx)) else {
            return false;
        };
        let source = view.source(ctx);
        let Some((source_strides, source_offset)) =
            ShapedType::of(ctx, ctx.value_ty(source)).and_then(|s| s.strides_and_offset())
        else {
            return false;
        };
        if source_offset == DYNAMIC || source_strides.contains(&DYNAMIC) {
            return false;
        }

        let offset = source_offset
            + offsets
                .iter()
                .zip(&source_strides)
                .map(|(o, s)| o * s)
                .sum::<i64>();
        let result_strides: SmallVec<[i64; 4]> = source_strides
            .iter()
            .zip(&strides)
            .map(|(s, t)| s * t)
            .collect();

        let loc = ctx.op(op).location;
        let Some(cast) = memref::reinterpret_cast(ctx, loc, source, offset, &sizes, &result_strides)
        else {
            return false;
        };
        let cast_ty = ctx.op_result_types(cast.op_ref())[0];
        if cast_ty != ctx.op_result_types(op)[0] {
            ctx.erase_op(cast.op_ref());
            return false;
        }
        rewriter.replace_op(cast.op_ref());
        true
    }
}

/// Indices into the subview source: `offset + index * stride` per dimension.
/// The arithmetic is appended to `prefix`.
fn rebase_indices(
    ctx: &mut IrContext,
    loc: Location,
    indices: &[ValueRef],
    offsets: &[i64],
    strides: &[i64],
    prefix: &mut Vec<OpRef>,
) -> SmallVec<[ValueRef; 4]> {
    let mut rebased = SmallVec::new();
    for ((&index, &offset), &stride) in indices.iter().zip(offsets).zip(strides) {
        let mut value = index;
        if stride != 1 {
            let c = arith::constant_index(ctx, loc, stride);
            let c_value = c.result(ctx);
            let mul = arith::muli(ctx, loc, value, c_value);
            prefix.extend([c.op_ref(), mul.op_ref()]);
            value = ctx.op_result(mul.op_ref(), 0);
        }
        if offset != 0 {
            let c = arith::constant_index(ctx, loc, offset);
            let c_value = c.result(ctx);
            let add = arith::addi(ctx, loc, value, c_value);
            prefix.extend([c.op_ref(), add.op_ref()]);
            value = ctx.op_result(add.op_ref(), 0);
        }
        rebased.push(value);
    }
    rebased
}

/// Pattern for `memref.load`/`memref.store` through a static subview ->
/// access of the subview source
struct FoldAccessOfSubview;

impl RewritePattern for FoldAccessOfSubview {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let (memref_value, indices, stored) = if let Ok(load) = memref::Load::from_op(ctx, op) {
            (load.memref(ctx), SmallVec::<[ValueRef; 4]>::from(load.indices(ctx)), None)
        } else if let Ok(store) = memref::Store::from_op(ctx, op) {
            (
                store.memref(ctx),
                SmallVec::from(store.indices(ctx)),
                Some(store.value(ctx)),
            )
        } else {
            return false;
        };
        let Some(view) = ctx
            .defining_op(memref_value)
            .and_then(|def| memref::SubView::from_op(ctx, def).ok())
        else {
            return false;
        };
        let Some((offsets, strides)) = static_view(ctx, view) else {
            return false;
        };
        if indices.len() != offsets.len() {
            return false;
        }

        let loc = ctx.op(op).location;
        let source = view.source(ctx);
        let mut prefix = Vec::new();
        let rebased = rebase_indices(ctx, loc, &indices, &offsets, &strides, &mut prefix);
        let access = match stored {
            None => memref::load(ctx, loc, source, &rebased).op_ref(),
            Some(value) => memref::store(ctx, loc, value, source, &rebased).op_ref(),
        };
        tracing::trace!(dims = rebased.len(), "folded access through subview");
        rewriter.replace_with_prefix(prefix, access);
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::apply_patterns::{ApplyPatternsOptions, PatternGroup, apply_patterns};
    use nelli_ir::{DialectOp, IrContext};
    use nelli_ir::parser::parse_test_module;
    use nelli_ir::printer::print_module;
    use nelli_ir::validation::validate;

    const VIEWED: &str = "core.module @m {
  func.func @f(%0: memref.memref(core.f32) {shape = [8, 16]}, %1: core.index, %2: core.f32) -> core.f32 {
    %3 = memref.subview %0 {static_offsets = [2, 4], static_sizes = [4, 4], static_strides = [1, 2]} : memref.memref(core.f32) {offset = 36, shape = [4, 4], strides = [16, 2]}
    %4 = memref.load %3, %1, %1 : core.f32
    memref.store %2, %3, %1, %1
    func.return %4
  }
}
";

    fn run(group: PatternGroup) -> String {
        let mut ctx = IrContext::new();
        let m = parse_test_module(&mut ctx, VIEWED).op_ref();
        let options = ApplyPatternsOptions::default().with_group(group);
        apply_patterns(&mut ctx, m, &options).unwrap();
        assert!(validate(&ctx, m).is_ok());
        print_module(&ctx, m)
    }

    #[test]
    fn static_subview_becomes_reinterpret_cast() {
        insta::assert_snapshot!(run(PatternGroup::ExpandMemrefStridedMetadata), @r"
        core.module @m {
          func.func @f(%0: memref.memref(core.f32) {shape = [8, 16]}, %1: core.index, %2: core.f32) -> core.f32 {
            %3 = memref.reinterpret_cast %0 {offset = 36, sizes = [4, 4], strides = [16, 2]} : memref.memref(core.f32) {offset = 36, shape = [4, 4], strides = [16, 2]}
            %4 = memref.load %3, %1, %1 : core.f32
            memref.store %2, %3, %1, %1
            func.return %4
          }
        }
        ");
    }

    #[test]
    fn accesses_through_subview_use_the_source() {
        insta::assert_snapshot!(run(PatternGroup::FoldMemrefAliases), @r"
        core.module @m {
          func.func @f(%0: memref.memref(core.f32) {shape = [8, 16]}, %1: core.index, %2: core.f32) -> core.f32 {
            %3 = arith.constant {value = 2} : core.index
            %4 = arith.addi %1, %3 : core.index
            %5 = arith.constant {value = 2} : core.index
            %6 = arith.muli %1, %5 : core.index
            %7 = arith.constant {value = 4} : core.index
            %8 = arith.addi %6, %7 : core.index
            %9 = memref.load %0, %4, %8 : core.f32
            %10 = arith.constant {value = 2} : core.index
            %11 = arith.addi %1, %10 : core.index
            %12 = arith.constant {value = 2} : core.index
            %13 = arith.muli %1, %12 : core.index
            %14 = arith.constant {value = 4} : core.index
            %15 = arith.addi %13, %14 : core.index
            memref.store %2, %0, %11, %15
            func.return %9
          }
        }
        ");
    }
}
