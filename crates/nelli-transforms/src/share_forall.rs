//! Sharing of `scf.forall` outputs with the slices read inside the loop.
//!
//! When each iteration reads a slice of a shared output and writes the same
//! slice back through `tensor.parallel_insert_slice`, the read can go
//! through the loop's block argument instead of the captured tensor. This
//! lets bufferization reuse the output buffer in place.

use smallvec::SmallVec;

use nelli_ir::dialect::{scf, tensor};
use nelli_ir::{DialectOp, IrContext, OpRef, ValueRef};

use crate::error::{TransformError, TransformResult};
use crate::transform_op::{TransformEffect, TransformOp};

/// The `tensor.extract_slice` inside `forall` that is the only other user
/// of `output`.
fn slice_of_output(
    ctx: &IrContext,
    forall: scf::Forall,
    output: ValueRef,
) -> Option<tensor::ExtractSlice> {
    if ctx.uses(output).len() != 2 {
        return None;
    }
    ctx.users(output).into_iter().find_map(|user| {
        let slice = tensor::ExtractSlice::from_op(ctx, user).ok()?;
        (slice.source(ctx) == output && ctx.is_proper_ancestor(forall.op_ref(), user))
            .then_some(slice)
    })
}

/// Whether the loop terminator writes back exactly the slice `slice` reads,
/// into `out_arg`.
fn has_matching_insert(
    ctx: &IrContext,
    forall: scf::Forall,
    slice: tensor::ExtractSlice,
    out_arg: ValueRef,
) -> bool {
    let Some(terminator) = forall.terminator(ctx) else {
        return false;
    };
    let Some(params) = slice.params(ctx) else {
        return false;
    };
    terminator.yielding_ops(ctx).iter().any(|&op| {
        tensor::ParallelInsertSlice::from_op(ctx, op).is_ok_and(|insert| {
            insert.dest(ctx) == out_arg && insert.params(ctx).as_ref() == Some(&params)
        })
    })
}

/// Make the slices `forall` reads from its shared outputs go through the
/// corresponding block arguments.
///
/// `indices` selects outputs by position; empty selects all of them. Any
/// index outside the outputs fails before the IR is touched. Returns the
/// number of shared outputs.
#[tracing::instrument(skip_all)]
pub fn share_forall_operands(
    ctx: &mut IrContext,
    forall: scf::Forall,
    indices: &[i64],
) -> TransformResult<usize> {
    let num_outputs = forall.outputs(ctx).len();
    let selected: SmallVec<[usize; 4]> = if indices.is_empty() {
        (0..num_outputs).collect()
    } else {
        indices
            .iter()
            .map(|&index| {
                usize::try_from(index)
                    .ok()
                    .filter(|&i| i < num_outputs)
                    .ok_or_else(|| TransformError::operand_index_overflow(index, num_outputs))
            })
            .collect::<TransformResult<_>>()?
    };

    let mut shared = 0;
    for index in selected {
        let output = forall.outputs(ctx)[index];
        let out_arg = forall.region_out_args(ctx)[index];
        let Some(slice) = slice_of_output(ctx, forall, output) else {
            continue;
        };
        if !has_matching_insert(ctx, forall, slice, out_arg) {
            continue;
        }
        ctx.set_operand(slice.op_ref(), 0, out_arg);
        shared += 1;
    }
    tracing::debug!(shared, "shared forall operands");
    Ok(shared)
}

/// Transform op sharing the selected outputs of an `scf.forall` target.
pub struct ShareForallOperands {
    pub indices: Vec<i64>,
}

impl TransformOp for ShareForallOperands {
    fn name(&self) -> &'static str {
        "share_forall_operands"
    }

    fn effects(&self) -> &'static [TransformEffect] {
        &[
            TransformEffect::ConsumesHandle,
            TransformEffect::ProducesHandle,
            TransformEffect::ModifiesPayload,
        ]
    }

    fn apply(&self, ctx: &mut IrContext, target: OpRef) -> TransformResult<OpRef> {
        let forall = scf::Forall::from_op(ctx, target)
            .map_err(|_| TransformError::invalid_target("scf.forall", ctx.op(target).full_name()))?;
        share_forall_operands(ctx, forall, &self.indices)?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformErrorKind;
    use nelli_ir::parser::parse_test_module;
    use nelli_ir::printer::print_module;
    use nelli_ir::walk::collect_typed;

    const TILED: &str = "core.module @m {
  func.func @f(%0: tensor.tensor(core.f32) {shape = [8, 4]}) -> tensor.tensor(core.f32) {shape = [8, 4]} {
    %1 = scf.forall %0 {upper_bound = [2]} : tensor.tensor(core.f32) {shape = [8, 4]} {
      ^bb0(%2: core.index, %3: tensor.tensor(core.f32) {shape = [8, 4]}):
        %4 = tensor.extract_slice %0, %2 {static_offsets = [-1, 0], static_sizes = [4, 4], static_strides = [1, 1]} : tensor.tensor(core.f32) {shape = [4, 4]}
        %5 = test.compute %4 : tensor.tensor(core.f32) {shape = [4, 4]}
        scf.in_parallel {
          tensor.parallel_insert_slice %5, %3, %2 {static_offsets = [-1, 0], static_sizes = [4, 4], static_strides = [1, 1]}
        }
    }
    func.return %1
  }
}
";

    fn parse_forall(ctx: &mut IrContext, text: &str) -> (OpRef, scf::Forall) {
        let m = parse_test_module(ctx, text).op_ref();
        let forall = collect_typed::<scf::Forall>(ctx, m)[0];
        (m, forall)
    }

    #[test]
    fn slice_reads_through_block_argument() {
        let mut ctx = IrContext::new();
        let (m, forall) = parse_forall(&mut ctx, TILED);
        assert_eq!(share_forall_operands(&mut ctx, forall, &[]), Ok(1));
        insta::assert_snapshot!(print_module(&ctx, m), @r"
        core.module @m {
          func.func @f(%0: tensor.tensor(core.f32) {shape = [8, 4]}) -> tensor.tensor(core.f32) {shape = [8, 4]} {
            %1 = scf.forall %0 {upper_bound = [2]} : tensor.tensor(core.f32) {shape = [8, 4]} {
              ^bb0(%2: core.index, %3: tensor.tensor(core.f32) {shape = [8, 4]}):
                %4 = tensor.extract_slice %3, %2 {static_offsets = [-1, 0], static_sizes = [4, 4], static_strides = [1, 1]} : tensor.tensor(core.f32) {shape = [4, 4]}
                %5 = test.compute %4 : tensor.tensor(core.f32) {shape = [4, 4]}
                scf.in_parallel {
                  tensor.parallel_insert_slice %5, %3, %2 {static_offsets = [-1, 0], static_sizes = [4, 4], static_strides = [1, 1]}
                }
            }
            func.return %1
          }
        }
        ");
    }

    #[test]
    fn mismatched_insert_is_skipped() {
        let mut ctx = IrContext::new();
        let text = TILED.replace(
            "tensor.parallel_insert_slice %5, %3, %2 {static_offsets = [-1, 0]",
            "tensor.parallel_insert_slice %5, %3, %2 {static_offsets = [0, -1]",
        );
        let (m, forall) = parse_forall(&mut ctx, &text);
        let before = print_module(&ctx, m);
        assert_eq!(share_forall_operands(&mut ctx, forall, &[0]), Ok(0));
        assert_eq!(print_module(&ctx, m), before);
    }

    #[test]
    fn index_overflow_fails_without_mutation() {
        let mut ctx = IrContext::new();
        let (m, forall) = parse_forall(&mut ctx, TILED);
        let before = print_module(&ctx, m);
        let err = share_forall_operands(&mut ctx, forall, &[0, 1]).unwrap_err();
        assert!(err.is_definite());
        assert_eq!(
            *err.kind(),
            TransformErrorKind::OperandIndexOverflow {
                index: 1,
                num_outputs: 1
            }
        );
        assert!(share_forall_operands(&mut ctx, forall, &[-1]).is_err());
        assert_eq!(print_module(&ctx, m), before);
    }

    #[test]
    fn non_forall_target_is_rejected() {
        let mut ctx = IrContext::new();
        let (m, _) = parse_forall(&mut ctx, TILED);
        let err = ShareForallOperands { indices: vec![] }
            .apply(&mut ctx, m)
            .unwrap_err();
        assert!(matches!(err.kind(), TransformErrorKind::InvalidTarget { .. }));
    }
}
