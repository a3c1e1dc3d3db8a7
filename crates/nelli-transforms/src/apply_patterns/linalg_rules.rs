//! Rewrites of elementwise `linalg.generic` ops: moving reshapes and packs
//! onto their operands, dropping unneeded inputs, and producer/consumer
//! fusion.

use smallvec::SmallVec;

use nelli_ir::dialect::{linalg, tensor};
use nelli_ir::rewrite::{PatternRewriter, RewritePattern};
use nelli_ir::{
    BlockRef, DialectOp, IrContext, IrMapping, Location, OpRef, ShapedType, TypeRef, Use, ValueRef,
};

use crate::fusion::fused_operand_count_within_limit;

use super::ApplyPatternsOptions;

pub(super) fn bubble_collapse(_: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(BubbleReshape {
        kind: ReshapeKind::Collapse,
    })]
}

pub(super) fn bubble_expand(_: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(BubbleReshape {
        kind: ReshapeKind::Expand,
    })]
}

pub(super) fn bubble_pack(_: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(BubblePack)]
}

pub(super) fn erase_unnecessary_operands(
    _: &ApplyPatternsOptions,
) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(EraseUnusedGenericInputs)]
}

pub(super) fn elementwise_fusion(options: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    vec![Box::new(FuseElementwiseGenerics {
        operand_limit: options.fusion.operand_limit,
    })]
}

/// The elementwise single-result generic producing `value`, if `value` has
/// no other user.
fn single_use_elementwise_producer(ctx: &IrContext, value: ValueRef) -> Option<linalg::Generic> {
    let generic = linalg::Generic::from_op(ctx, ctx.defining_op(value)?).ok()?;
    (ctx.uses(value).len() == 1
        && ctx.op_results(generic.op_ref()).len() == 1
        && generic.is_elementwise(ctx))
    .then_some(generic)
}

/// Create a parallel generic over `inputs`/`inits` of rank `rank` and move
/// `old`'s body into it. `arg_map[i]` is the new block argument position for
/// old argument `i`; `None` only for arguments without uses.
fn rebuild_generic(
    ctx: &mut IrContext,
    loc: Location,
    old: linalg::Generic,
    inputs: &[ValueRef],
    inits: &[ValueRef],
    rank: usize,
    arg_map: &[Option<usize>],
) -> linalg::Generic {
    let iterators = vec![linalg::IteratorType::Parallel; rank];
    let new = linalg::generic(ctx, loc, inputs, inits, &iterators);
    move_body(ctx, old.body(ctx), new.body(ctx), arg_map);
    new
}

fn move_body(ctx: &mut IrContext, from: BlockRef, to: BlockRef, arg_map: &[Option<usize>]) {
    for (i, target) in arg_map.iter().enumerate() {
        if let Some(target) = *target {
            let old_arg = ctx.block_arg(from, i as u32);
            let new_arg = ctx.block_arg(to, target as u32);
            ctx.replace_all_uses(old_arg, new_arg);
        }
    }
    let ops: SmallVec<[OpRef; 8]> = ctx.block(from).ops.iter().copied().collect();
    for op in ops {
        ctx.remove_op_from_block(from, op);
        ctx.push_op(to, op);
    }
}

fn identity_arg_map(n: usize) -> SmallVec<[Option<usize>; 8]> {
    (0..n).map(Some).collect()
}

#[derive(Clone, Copy)]
enum ReshapeKind {
    Collapse,
    Expand,
}

/// Pattern for `collapse_shape`/`expand_shape` of an elementwise generic ->
/// generic of reshaped operands
struct BubbleReshape {
    kind: ReshapeKind,
}

impl RewritePattern for BubbleReshape {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let matches = match self.kind {
            ReshapeKind::Collapse => tensor::CollapseShape::matches(ctx, op),
            ReshapeKind::Expand => tensor::ExpandShape::matches(ctx, op),
        };
        if !matches {
            return false;
        }
        let Some(generic) = single_use_elementwise_producer(ctx, ctx.op_operands(op)[0]) else {
            return false;
        };
        let Some(reassociation) = tensor::reassociation(ctx, op) else {
            return false;
        };
        let result_ty = ctx.op_result_types(op)[0];
        let Some(result_shape) = ShapedType::of(ctx, result_ty).map(|s| s.shape) else {
            return false;
        };

        let operands: SmallVec<[ValueRef; 4]> = ctx.op_operands(generic.op_ref()).into();
        let num_inputs = generic.inputs(ctx).len();
        let Some(new_tys) = operands
            .iter()
            .map(|&v| {
                let shaped = ShapedType::of(ctx, ctx.value_ty(v))?;
                Some(shaped.with_shape(result_shape.iter().copied()))
            })
            .collect::<Option<SmallVec<[ShapedType; 4]>>>()
        else {
            return false;
        };
        let new_tys: SmallVec<[TypeRef; 4]> =
            new_tys.iter().map(|s| s.intern(&mut ctx.types)).collect();
        if new_tys.last() != Some(&result_ty) {
            return false;
        }

        let loc = ctx.op(op).location;
        let mut prefix = Vec::new();
        let mut reshaped: SmallVec<[ValueRef; 4]> = SmallVec::new();
        for (&v, &ty) in operands.iter().zip(&new_tys) {
            let reshape = match self.kind {
                ReshapeKind::Collapse => tensor::collapse_shape(ctx, loc, v, &reassociation, ty).op_ref(),
                ReshapeKind::Expand => tensor::expand_shape(ctx, loc, v, &reassociation, ty).op_ref(),
            };
            reshaped.push(ctx.op_result(reshape, 0));
            prefix.push(reshape);
        }
        let (inputs, inits) = reshaped.split_at(num_inputs);
        let arg_map = identity_arg_map(operands.len());
        let new = rebuild_generic(ctx, loc, generic, inputs, inits, result_shape.len(), &arg_map);
        rewriter.replace_with_prefix(prefix, new.op_ref());
        true
    }
}

/// Pattern for `tensor.pack` of an elementwise generic -> generic of packed
/// operands
struct BubblePack;

impl RewritePattern for BubblePack {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(pack) = tensor::Pack::from_op(ctx, op) else {
            return false;
        };
        let Some(generic) = single_use_elementwise_producer(ctx, pack.source(ctx)) else {
            return false;
        };
        if generic.inits(ctx).len() != 1 {
            return false;
        }
        let (dims, tiles) = (pack.inner_dims_pos(ctx), pack.inner_tiles(ctx));
        let dest = pack.dest(ctx);
        let Some(source_shape) = ShapedType::of(ctx, ctx.value_ty(pack.source(ctx))).map(|s| s.shape)
        else {
            return false;
        };
        let Some(packed) = tensor::packed_shape(&source_shape, &dims, &tiles) else {
            return false;
        };

        let loc = ctx.op(op).location;
        let inputs: SmallVec<[ValueRef; 4]> = generic.inputs(ctx).into();
        let mut prefix = Vec::new();
        let mut packed_inputs: SmallVec<[ValueRef; 4]> = SmallVec::new();
        for v in inputs.iter().copied() {
            let Some(shaped) = ShapedType::of(ctx, ctx.value_ty(v)) else {
                return false;
            };
            let ty = shaped.with_shape(packed.iter().copied()).intern(&mut ctx.types);
            let empty = tensor::empty(ctx, loc, ty, &[]);
            let empty_value = empty.result(ctx);
            let packed_input = tensor::pack(ctx, loc, v, empty_value, &dims, &tiles);
            packed_inputs.push(ctx.op_result(packed_input.op_ref(), 0));
            prefix.extend([empty.op_ref(), packed_input.op_ref()]);
        }
        let init = generic.inits(ctx)[0];
        let packed_init = tensor::pack(ctx, loc, init, dest, &dims, &tiles);
        let packed_init_value = ctx.op_result(packed_init.op_ref(), 0);
        prefix.push(packed_init.op_ref());

        let arg_map = identity_arg_map(inputs.len() + 1);
        let new = rebuild_generic(
            ctx,
            loc,
            generic,
            &packed_inputs,
            &[packed_init_value],
            packed.len(),
            &arg_map,
        );
        rewriter.replace_with_prefix(prefix, new.op_ref());
        true
    }
}

/// Pattern for `linalg.generic` with unused or repeated inputs -> generic
/// without them
struct EraseUnusedGenericInputs;

impl RewritePattern for EraseUnusedGenericInputs {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(generic) = linalg::Generic::from_op(ctx, op) else {
            return false;
        };
        let body = generic.body(ctx);
        let inputs: SmallVec<[ValueRef; 4]> = generic.inputs(ctx).into();
        let inits: SmallVec<[ValueRef; 4]> = generic.inits(ctx).into();

        let mut kept: SmallVec<[ValueRef; 4]> = SmallVec::new();
        let mut arg_map: SmallVec<[Option<usize>; 8]> = SmallVec::new();
        for (i, &input) in inputs.iter().enumerate() {
            if !ctx.has_uses(ctx.block_arg(body, i as u32)) {
                arg_map.push(None);
            } else if let Some(pos) = kept.iter().position(|&k| k == input) {
                arg_map.push(Some(pos));
            } else {
                arg_map.push(Some(kept.len()));
                kept.push(input);
            }
        }
        if kept.len() == inputs.len() {
            return false;
        }
        arg_map.extend((0..inits.len()).map(|j| Some(kept.len() + j)));

        let loc = ctx.op(op).location;
        let iterators = generic.iterator_types(ctx);
        let new = linalg::generic(ctx, loc, &kept, &inits, &iterators);
        move_body(ctx, body, new.body(ctx), &arg_map);
        tracing::trace!(dropped = inputs.len() - kept.len(), "erased generic inputs");
        rewriter.replace_op(new.op_ref());
        true
    }
}

/// Pattern for an elementwise generic feeding another generic -> one fused
/// generic, when the fused operand count stays within `operand_limit`
struct FuseElementwiseGenerics {
    operand_limit: usize,
}

impl FuseElementwiseGenerics {
    /// First input of `consumer` produced by a fusable generic.
    fn fusable_input(&self, ctx: &IrContext, consumer: linalg::Generic) -> Option<(usize, linalg::Generic)> {
        let iterators = consumer.iterator_types(ctx);
        consumer
            .inputs(ctx)
            .iter()
            .enumerate()
            .find_map(|(index, &value)| {
                let producer = linalg::Generic::from_op(ctx, ctx.defining_op(value)?).ok()?;
                let producer_body = producer.body(ctx);
                let num_inputs = producer.inputs(ctx).len();
                let inits_unused = (0..producer.inits(ctx).len())
                    .all(|j| !ctx.has_uses(ctx.block_arg(producer_body, (num_inputs + j) as u32)));
                let edge = Use {
                    user: consumer.op_ref(),
                    operand_index: index as u32,
                };
                (producer.is_elementwise(ctx)
                    && producer.iterator_types(ctx) == iterators
                    && producer.yield_op(ctx).is_some()
                    && inits_unused
                    && fused_operand_count_within_limit(ctx, edge, self.operand_limit))
                .then_some((index, producer))
            })
    }
}

impl RewritePattern for FuseElementwiseGenerics {
    fn match_and_rewrite(
        &self,
        ctx: &mut IrContext,
        op: OpRef,
        rewriter: &mut PatternRewriter,
    ) -> bool {
        let Ok(consumer) = linalg::Generic::from_op(ctx, op) else {
            return false;
        };
        if !consumer.is_elementwise(ctx) {
            return false;
        }
        let Some((index, producer)) = self.fusable_input(ctx, consumer) else {
            return false;
        };

        let consumer_inputs: SmallVec<[ValueRef; 4]> = consumer.inputs(ctx).into();
        let consumer_inits: SmallVec<[ValueRef; 4]> = consumer.inits(ctx).into();
        let producer_inputs: SmallVec<[ValueRef; 4]> = producer.inputs(ctx).into();
        let mut inputs: SmallVec<[ValueRef; 4]> = consumer_inputs
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != index)
            .map(|(_, &v)| v)
            .collect();
        for &v in &producer_inputs {
            if !inputs.contains(&v) {
                inputs.push(v);
            }
        }

        let loc = ctx.op(op).location;
        let iterators = consumer.iterator_types(ctx);
        let fused = linalg::generic(ctx, loc, &inputs, &consumer_inits, &iterators);
        let fused_body = fused.body(ctx);
        let arg_for = |ctx: &IrContext, v: ValueRef| {
            let pos = inputs.iter().position(|&i| i == v).unwrap_or_default();
            ctx.block_arg(fused_body, pos as u32)
        };

        let mut mapping = IrMapping::new();
        let producer_body = producer.body(ctx);
        for (i, &v) in producer_inputs.iter().enumerate() {
            mapping.map_value(ctx.block_arg(producer_body, i as u32), arg_for(ctx, v));
        }
        let producer_ops: SmallVec<[OpRef; 8]> = ctx.block(producer_body).ops.iter().copied().collect();
        let Some((producer_yield, producer_ops)) = producer_ops.split_last() else {
            return false;
        };
        for &body_op in producer_ops {
            let cloned = ctx.clone_op(body_op, &mut mapping);
            ctx.push_op(fused_body, cloned);
        }
        let produced = mapping.lookup_value(ctx.op_operands(*producer_yield)[0]);

        let consumer_body = consumer.body(ctx);
        for (i, &v) in consumer_inputs.iter().enumerate() {
            let new = if i == index { produced } else { arg_for(ctx, v) };
            mapping.map_value(ctx.block_arg(consumer_body, i as u32), new);
        }
        for j in 0..consumer_inits.len() {
            let old = ctx.block_arg(consumer_body, (consumer_inputs.len() + j) as u32);
            let new = ctx.block_arg(fused_body, (inputs.len() + j) as u32);
            mapping.map_value(old, new);
        }
        let consumer_ops: SmallVec<[OpRef; 8]> = ctx.block(consumer_body).ops.iter().copied().collect();
        for body_op in consumer_ops {
            let cloned = ctx.clone_op(body_op, &mut mapping);
            ctx.push_op(fused_body, cloned);
        }
        tracing::debug!(inputs = inputs.len(), "fused elementwise generics");
        rewriter.replace_op(fused.op_ref());
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

    fn run(text: &str, options: &ApplyPatternsOptions) -> String {
        let mut ctx = IrContext::new();
        let m = parse_test_module(&mut ctx, text).op_ref();
        apply_patterns(&mut ctx, m, options).unwrap();
        assert!(validate(&ctx, m).is_ok());
        print_module(&ctx, m)
    }

    #[test]
    fn collapse_moves_onto_operands() {
        let options = ApplyPatternsOptions::default().with_group(PatternGroup::BubbleCollapse);
        let out = run(
            "core.module @m {
  func.func @f(%0: tensor.tensor(core.f32) {shape = [2, 3, 4]}, %1: tensor.tensor(core.f32) {shape = [2, 3, 4]}) -> tensor.tensor(core.f32) {shape = [6, 4]} {
    %2 = linalg.generic %0, %1 {iterator_types = [@parallel, @parallel, @parallel], num_inputs = 1} : tensor.tensor(core.f32) {shape = [2, 3, 4]} {
      ^bb0(%3: core.f32, %4: core.f32):
        %5 = arith.addf %3, %3 : core.f32
        linalg.yield %5
    }
    %6 = tensor.collapse_shape %2 {reassociation = [[0, 1], [2]]} : tensor.tensor(core.f32) {shape = [6, 4]}
    func.return %6
  }
}
",
            &options,
        );
        insta::assert_snapshot!(out, @r"
        core.module @m {
          func.func @f(%0: tensor.tensor(core.f32) {shape = [2, 3, 4]}, %1: tensor.tensor(core.f32) {shape = [2, 3, 4]}) -> tensor.tensor(core.f32) {shape = [6, 4]} {
            %2 = tensor.collapse_shape %0 {reassociation = [[0, 1], [2]]} : tensor.tensor(core.f32) {shape = [6, 4]}
            %3 = tensor.collapse_shape %1 {reassociation = [[0, 1], [2]]} : tensor.tensor(core.f32) {shape = [6, 4]}
            %4 = linalg.generic %2, %3 {iterator_types = [@parallel, @parallel], num_inputs = 1} : tensor.tensor(core.f32) {shape = [6, 4]} {
              ^bb0(%5: core.f32, %6: core.f32):
                %7 = arith.addf %5, %5 : core.f32
                linalg.yield %7
            }
            func.return %4
          }
        }
        ");
    }

    #[test]
    fn pack_moves_onto_operands() {
        let options = ApplyPatternsOptions::default().with_group(PatternGroup::BubblePackUnpack);
        let out = run(
            "core.module @m {
  func.func @f(%0: tensor.tensor(core.f32) {shape = [8, 4]}, %1: tensor.tensor(core.f32) {shape = [8, 4]}, %2: tensor.tensor(core.f32) {shape = [2, 4, 4]}) -> tensor.tensor(core.f32) {shape = [2, 4, 4]} {
    %3 = linalg.generic %0, %1 {iterator_types = [@parallel, @parallel], num_inputs = 1} : tensor.tensor(core.f32) {shape = [8, 4]} {
      ^bb0(%4: core.f32, %5: core.f32):
        %6 = arith.addf %4, %4 : core.f32
        linalg.yield %6
    }
    %7 = tensor.pack %3, %2 {inner_dims_pos = [0], inner_tiles = [4]} : tensor.tensor(core.f32) {shape = [2, 4, 4]}
    func.return %7
  }
}
",
            &options,
        );
        insta::assert_snapshot!(out, @r"
        core.module @m {
          func.func @f(%0: tensor.tensor(core.f32) {shape = [8, 4]}, %1: tensor.tensor(core.f32) {shape = [8, 4]}, %2: tensor.tensor(core.f32) {shape = [2, 4, 4]}) -> tensor.tensor(core.f32) {shape = [2, 4, 4]} {
            %3 = tensor.empty : tensor.tensor(core.f32) {shape = [2, 4, 4]}
            %4 = tensor.pack %0, %3 {inner_dims_pos = [0], inner_tiles = [4]} : tensor.tensor(core.f32) {shape = [2, 4, 4]}
            %5 = tensor.pack %1, %2 {inner_dims_pos = [0], inner_tiles = [4]} : tensor.tensor(core.f32) {shape = [2, 4, 4]}
            %6 = linalg.generic %4, %5 {iterator_types = [@parallel, @parallel, @parallel], num_inputs = 1} : tensor.tensor(core.f32) {shape = [2, 4, 4]} {
              ^bb0(%7: core.f32, %8: core.f32):
                %9 = arith.addf %7, %7 : core.f32
                linalg.yield %9
            }
            func.return %6
          }
        }
        ");
    }

    #[test]
    fn unused_and_repeated_inputs_are_dropped() {
        let options =
            ApplyPatternsOptions::default().with_group(PatternGroup::EraseUnnecessaryTensorOperands);
        let out = run(
            "core.module @m {
  func.func @f(%0: tensor.tensor(core.f32) {shape = [4]}, %1: tensor.tensor(core.f32) {shape = [4]}, %2: tensor.tensor(core.f32) {shape = [4]}) -> tensor.tensor(core.f32) {shape = [4]} {
    %3 = linalg.generic %0, %1, %0, %2 {iterator_types = [@parallel], num_inputs = 3} : tensor.tensor(core.f32) {shape = [4]} {
      ^bb0(%4: core.f32, %5: core.f32, %6: core.f32, %7: core.f32):
        %8 = arith.mulf %4, %6 : core.f32
        linalg.yield %8
    }
    func.return %3
  }
}
",
            &options,
        );
        insta::assert_snapshot!(out, @r"
        core.module @m {
          func.func @f(%0: tensor.tensor(core.f32) {shape = [4]}, %1: tensor.tensor(core.f32) {shape = [4]}, %2: tensor.tensor(core.f32) {shape = [4]}) -> tensor.tensor(core.f32) {shape = [4]} {
            %3 = linalg.generic %0, %2 {iterator_types = [@parallel], num_inputs = 1} : tensor.tensor(core.f32) {shape = [4]} {
              ^bb0(%4: core.f32, %5: core.f32):
                %6 = arith.mulf %4, %4 : core.f32
                linalg.yield %6
            }
            func.return %3
          }
        }
        ");
    }

    const CHAIN: &str = "core.module @m {
  func.func @f(%0: tensor.tensor(core.f32) {shape = [4]}, %1: tensor.tensor(core.f32) {shape = [4]}, %2: tensor.tensor(core.f32) {shape = [4]}) -> tensor.tensor(core.f32) {shape = [4]} {
    %3 = linalg.generic %0, %2 {iterator_types = [@parallel], num_inputs = 1} : tensor.tensor(core.f32) {shape = [4]} {
      ^bb0(%4: core.f32, %5: core.f32):
        %6 = arith.addf %4, %4 : core.f32
        linalg.yield %6
    }
    %7 = linalg.generic %3, %1, %2 {iterator_types = [@parallel], num_inputs = 2} : tensor.tensor(core.f32) {shape = [4]} {
      ^bb0(%8: core.f32, %9: core.f32, %10: core.f32):
        %11 = arith.mulf %8, %9 : core.f32
        linalg.yield %11
    }
    func.return %7
  }
}
";

    #[test]
    fn producer_fuses_into_consumer() {
        let options =
            ApplyPatternsOptions::default().with_group(PatternGroup::LinalgElementwiseGreedyFusion);
        insta::assert_snapshot!(run(CHAIN, &options), @r"
        core.module @m {
          func.func @f(%0: tensor.tensor(core.f32) {shape = [4]}, %1: tensor.tensor(core.f32) {shape = [4]}, %2: tensor.tensor(core.f32) {shape = [4]}) -> tensor.tensor(core.f32) {shape = [4]} {
            %3 = linalg.generic %1, %0, %2 {iterator_types = [@parallel], num_inputs = 2} : tensor.tensor(core.f32) {shape = [4]} {
              ^bb0(%4: core.f32, %5: core.f32, %6: core.f32):
                %7 = arith.addf %5, %5 : core.f32
                %8 = arith.mulf %7, %4 : core.f32
                linalg.yield %8
            }
            func.return %3
          }
        }
        ");
    }

    #[test]
    fn operand_limit_blocks_fusion() {
        let mut options =
            ApplyPatternsOptions::default().with_group(PatternGroup::LinalgElementwiseGreedyFusion);
        options.fusion.operand_limit = 1;
        let mut ctx = IrContext::new();
        let m = parse_test_module(&mut ctx, CHAIN).op_ref();
        let before = print_module(&ctx, m);
        apply_patterns(&mut ctx, m, &options).unwrap();
        assert_eq!(print_module(&ctx, m), before);
    }
}
