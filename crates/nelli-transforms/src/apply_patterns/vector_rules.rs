//! Vector lowerings: permuted and masked transfers, and elementwise math on
//! vectors with leading unit dimensions.

use smallvec::SmallVec;

use nelli_ir::dialect::{arith, vector};
use nelli_ir::rewrite::{PatternRewriter, RewritePattern};
use nelli_ir::{DialectOp, IrContext, OpRef, ShapedType, ValueRef};

use super::ApplyPatternsOptions;

pub(super) fn lower_transfer_permutations(
    _: &ApplyPatternsOptions,
) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(TransferReadPermutationLowering)]
}

pub(super) fn lower_masks(_: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(FoldMaskedTransfer)]
}

pub(super) fn rank_reducing(_: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(ReduceLeadingUnitDims)]
}

/// Whether `perm` reorders `0..perm.len()`.
fn is_permutation(perm: &[i64]) -> bool {
    let mut seen: SmallVec<[bool; 4]> = SmallVec::from_elem(false, perm.len());
    perm.iter().all(|&d| {
        usize::try_from(d)
            .ok()
            .and_then(|d| seen.get_mut(d))
            .is_some_and(|slot| !std::mem::replace(slot, true))
    })
}

/// Pattern for permuted `vector.transfer_read` -> identity read +
/// `vector.transpose`
struct TransferReadPermutationLowering;

impl RewritePattern for TransferReadPermutationLowering {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(read) = vector::TransferRead::from_op(ctx, op) else {
            return false;
        };
        if read.has_identity_permutation(ctx) || read.mask(ctx).is_some() {
            return false;
        }
        let Some(perm) = read.permutation(ctx) else {
            return false;
        };
        let result_ty = ctx.op_result_types(op)[0];
        let Some(shaped) = ShapedType::of(ctx, result_ty) else {
            return false;
        };
        if perm.len() != shaped.rank() || !is_permutation(&perm) {
            return false;
        }

        // Result dim `i` is memory dim `perm[i]`.
        let mut read_shape: SmallVec<[i64; 4]> = SmallVec::from_elem(0, perm.len());
        for (i, &d) in perm.iter().enumerate() {
            read_shape[d as usize] = shaped.shape[i];
        }
        let read_ty = shaped.with_shape(read_shape).intern(&mut ctx.types);

        let loc = ctx.op(op).location;
        let (source, padding) = (read.source(ctx), read.padding(ctx));
        let indices: SmallVec<[ValueRef; 4]> = read.indices(ctx).into();
        let identity = vector::transfer_read(ctx, loc, source, &indices, padding, None, read_ty, None);
        let identity_value = identity.result(ctx);
        let Some(transpose) = vector::transpose(ctx, loc, identity_value, &perm) else {
            ctx.erase_op(identity.op_ref());
            return false;
        };
        rewriter.replace_with_prefix(vec![identity.op_ref()], transpose.op_ref());
        true
    }
}

/// Pattern for `vector.mask` around one unmasked transfer -> the transfer
/// with a mask operand
struct FoldMaskedTransfer;

impl RewritePattern for FoldMaskedTransfer {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(mask) = vector::Mask::from_op(ctx, op) else {
            return false;
        };
        let Some(inner) = mask.masked_op(ctx) else {
            return false;
        };
        let Some(terminator) = ctx.block_terminator(mask.body(ctx)) else {
            return false;
        };
        if ctx.op_operands(terminator) != ctx.op_results(inner) {
            return false;
        }

        let loc = ctx.op(op).location;
        let mask_value = mask.mask_value(ctx);
        let replacement = if let Ok(read) = vector::TransferRead::from_op(ctx, inner) {
            if read.mask(ctx).is_some() {
                return false;
            }
            let (source, padding) = (read.source(ctx), read.padding(ctx));
            let indices: SmallVec<[ValueRef; 4]> = read.indices(ctx).into();
            let perm = read.permutation(ctx);
            let ty = ctx.op_result_types(inner)[0];
            vector::transfer_read(
                ctx,
                loc,
                source,
                &indices,
                padding,
                Some(mask_value),
                ty,
                perm.as_deref(),
            )
            .op_ref()
        } else if let Ok(write) = vector::TransferWrite::from_op(ctx, inner) {
            if write.mask(ctx).is_some() {
                return false;
            }
            let (value, dest) = (write.value(ctx), write.dest(ctx));
            let indices: SmallVec<[ValueRef; 4]> = write.indices(ctx).into();
            vector::transfer_write(ctx, loc, value, dest, &indices, Some(mask_value)).op_ref()
        } else {
            return false;
        };
        rewriter.replace_op(replacement);
        true
    }
}

/// Pattern for elementwise arith on `vector<1x..xN>` -> the same op on
/// `vector.shape_cast`-reduced operands
struct ReduceLeadingUnitDims;

impl RewritePattern for ReduceLeadingUnitDims {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Some(kind) = arith::BinaryKind::of(ctx, op) else {
            return false;
        };
        let ty = ctx.op_result_types(op)[0];
        let Some(shaped) = ShapedType::of(ctx, ty).filter(|s| s.kind == nelli_ir::ShapeKind::Vector)
        else {
            return false;
        };
        // Keep at least one dimension.
        let dropped = shaped.leading_unit_dims().min(shaped.rank().saturating_sub(1));
        if dropped == 0 {
            return false;
        }
        let operands: SmallVec<[ValueRef; 2]> = ctx.op_operands(op).into();
        if operands.iter().any(|&v| ctx.value_ty(v) != ty) {
            return false;
        }

        let reduced_ty = shaped
            .with_shape(shaped.shape[dropped..].iter().copied())
            .intern(&mut ctx.types);
        let loc = ctx.op(op).location;
        let mut prefix = Vec::new();
        let mut reduced: SmallVec<[ValueRef; 2]> = SmallVec::new();
        for v in operands {
            let cast = vector::shape_cast(ctx, loc, v, reduced_ty);
            reduced.push(cast.result(ctx));
            prefix.push(cast.op_ref());
        }
        let narrow = arith::binary(ctx, loc, kind, reduced[0], reduced[1]);
        prefix.push(narrow);
        let narrow_value = ctx.op_result(narrow, 0);
        let widen = vector::shape_cast(ctx, loc, narrow_value, ty);
        rewriter.replace_with_prefix(prefix, widen.op_ref());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply_patterns::{PatternGroup, apply_patterns};
    use nelli_ir::parser::parse_test_module;
    use nelli_ir::printer::print_module;
    use nelli_ir::validation::validate;

    fn run(text: &str, group: PatternGroup) -> String {
        let mut ctx = IrContext::new();
        let m = parse_test_module(&mut ctx, text).op_ref();
        let options = ApplyPatternsOptions::default().with_group(group);
        apply_patterns(&mut ctx, m, &options).unwrap();
        assert!(validate(&ctx, m).is_ok());
        print_module(&ctx, m)
    }

    #[test]
    fn permutation_checks() {
        assert!(is_permutation(&[1, 0, 2]));
        assert!(!is_permutation(&[1, 1]));
        assert!(!is_permutation(&[0, 2]));
        assert!(!is_permutation(&[-1, 0]));
    }

    #[test]
    fn permuted_read_becomes_transpose() {
        let out = run(
            "core.module @m {
  func.func @f(%0: memref.memref(core.f32) {shape = [4, 8]}, %1: core.index, %2: core.f32) -> vector.vector(core.f32) {shape = [8, 4]} {
    %3 = vector.transfer_read %0, %1, %1, %2 {permutation = [1, 0]} : vector.vector(core.f32) {shape = [8, 4]}
    func.return %3
  }
}
",
            PatternGroup::LowerTransferOpPermutations,
        );
        insta::assert_snapshot!(out, @r"
        core.module @m {
          func.func @f(%0: memref.memref(core.f32) {shape = [4, 8]}, %1: core.index, %2: core.f32) -> vector.vector(core.f32) {shape = [8, 4]} {
            %3 = vector.transfer_read %0, %1, %1, %2 : vector.vector(core.f32) {shape = [4, 8]}
            %4 = vector.transpose %3 {permutation = [1, 0]} : vector.vector(core.f32) {shape = [8, 4]}
            func.return %4
          }
        }
        ");
    }

    #[test]
    fn masks_fold_into_transfers() {
        let out = run(
            "core.module @m {
  func.func @f(%0: memref.memref(core.f32) {shape = [8]}, %1: core.index, %2: core.f32, %3: vector.vector(core.i1) {shape = [4]}) -> vector.vector(core.f32) {shape = [4]} {
    %4 = vector.mask %3 : vector.vector(core.f32) {shape = [4]} {
      %5 = vector.transfer_read %0, %1, %2 : vector.vector(core.f32) {shape = [4]}
      vector.yield %5
    }
    vector.mask %3 {
      vector.transfer_write %4, %0, %1
      vector.yield
    }
    func.return %4
  }
}
",
            PatternGroup::LowerVectorMasks,
        );
        insta::assert_snapshot!(out, @r"
        core.module @m {
          func.func @f(%0: memref.memref(core.f32) {shape = [8]}, %1: core.index, %2: core.f32, %3: vector.vector(core.i1) {shape = [4]}) -> vector.vector(core.f32) {shape = [4]} {
            %4 = vector.transfer_read %0, %1, %2, %3 : vector.vector(core.f32) {shape = [4]}
            vector.transfer_write %4, %0, %1, %3
            func.return %4
          }
        }
        ");
    }

    #[test]
    fn leading_unit_dims_are_dropped() {
        let out = run(
            "core.module @m {
  func.func @f(%0: vector.vector(core.f32) {shape = [1, 1, 4]}, %1: vector.vector(core.f32) {shape = [1, 1, 4]}) -> vector.vector(core.f32) {shape = [1, 1, 4]} {
    %2 = arith.addf %0, %1 : vector.vector(core.f32) {shape = [1, 1, 4]}
    func.return %2
  }
}
",
            PatternGroup::RankReducingVector,
        );
        insta::assert_snapshot!(out, @r"
        core.module @m {
          func.func @f(%0: vector.vector(core.f32) {shape = [1, 1, 4]}, %1: vector.vector(core.f32) {shape = [1, 1, 4]}) -> vector.vector(core.f32) {shape = [1, 1, 4]} {
            %2 = vector.shape_cast %0 : vector.vector(core.f32) {shape = [4]}
            %3 = vector.shape_cast %1 : vector.vector(core.f32) {shape = [4]}
            %4 = arith.addf %2, %3 : vector.vector(core.f32) {shape = [4]}
            %5 = vector.shape_cast %4 : vector.vector(core.f32) {shape = [1, 1, 4]}
            func.return %5
          }
        }
        ");
    }
}
