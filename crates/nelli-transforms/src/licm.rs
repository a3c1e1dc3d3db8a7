//! Loop-invariant code motion.

use nelli_ir::dialect::func;
use nelli_ir::op_interface::{LoopLikeOps, PureOps};
use nelli_ir::walk::{collect_typed_inclusive, nested_ops};
use nelli_ir::{DialectOp, IrContext, OpRef};

use crate::loop_utils::promote_if_single_iteration;

/// Whether `op` may run outside `loop_op`: pure, region-free, and only
/// reading values defined outside the loop.
fn is_hoistable(ctx: &IrContext, loop_op: OpRef, op: OpRef) -> bool {
    PureOps::is_pure(ctx, op)
        && ctx.op(op).regions.is_empty()
        && ctx
            .op_operands(op)
            .iter()
            .all(|&v| !ctx.is_defined_inside(v, loop_op))
}

/// Move the invariant operations of `loop_op`'s body in front of the loop.
///
/// Returns the number of hoisted operations.
pub fn hoist_loop_invariants(ctx: &mut IrContext, loop_op: OpRef) -> usize {
    let mut hoisted = 0;
    let regions = ctx.op(loop_op).regions.clone();
    for region in regions {
        let blocks = ctx.region(region).blocks.clone();
        for block in blocks {
            // Hoisting an op can make later ops in the block invariant too.
            let ops = ctx.block(block).ops.clone();
            for op in ops {
                if is_hoistable(ctx, loop_op, op) {
                    ctx.move_op_before(op, loop_op);
                    hoisted += 1;
                }
            }
        }
    }
    hoisted
}

/// Hoist invariants out of every loop under `root`, innermost first, then
/// promote the loops that run exactly once.
pub fn run_licm(ctx: &mut IrContext, root: OpRef) -> usize {
    let mut loops: Vec<OpRef> = nested_ops(ctx, root)
        .into_iter()
        .filter(|&op| LoopLikeOps::is_loop_like(ctx, op))
        .collect();
    loops.reverse();

    let mut changes = 0;
    for &loop_op in &loops {
        changes += hoist_loop_invariants(ctx, loop_op);
    }
    for loop_op in loops {
        if ctx.op(loop_op).parent_block.is_some() && promote_if_single_iteration(ctx, loop_op) {
            changes += 1;
        }
    }
    tracing::debug!(changes, "loop-invariant code motion");
    changes
}

/// Functions in `target`, `target` included, that are not nested in
/// another of them. Their walks cover every function exactly once.
fn outermost_functions(ctx: &IrContext, target: OpRef) -> Vec<OpRef> {
    let funcs: Vec<OpRef> = collect_typed_inclusive::<func::Func>(ctx, target)
        .into_iter()
        .map(|f| f.op_ref())
        .collect();
    funcs
        .iter()
        .copied()
        .filter(|&f| !funcs.iter().any(|&outer| ctx.is_proper_ancestor(outer, f)))
        .collect()
}

/// LICM over every function in `target`, `target` included.
pub(crate) fn licm_functions(ctx: &mut IrContext, target: OpRef) -> usize {
    outermost_functions(ctx, target)
        .into_iter()
        .map(|f| run_licm(ctx, f))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nelli_ir::parser::parse_test_module;
    use nelli_ir::printer::print_module;
    use nelli_ir::validation::validate;

    #[test]
    fn hoists_invariants_and_promotes() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.index, %1: memref.memref(core.index) {shape = [8]}) -> core.nil {
    %2 = arith.constant {value = 0} : core.index
    %3 = arith.constant {value = 8} : core.index
    %4 = arith.constant {value = 1} : core.index
    scf.for %2, %3, %4 {
      ^bb0(%5: core.index):
        %6 = arith.muli %0, %0 : core.index
        %7 = arith.addi %6, %4 : core.index
        %8 = arith.addi %7, %5 : core.index
        memref.store %8, %1, %5
        scf.yield
    }
    scf.for %2, %4, %4 {
      ^bb1(%9: core.index):
        memref.store %9, %1, %9
        scf.yield
    }
    func.return
  }
}
",
        );
        let root = m.op_ref();
        let changes = licm_functions(&mut ctx, root);
        assert_eq!(changes, 3);
        assert!(validate(&ctx, root).is_ok());
        insta::assert_snapshot!(print_module(&ctx, root), @r"
        core.module @m {
          func.func @f(%0: core.index, %1: memref.memref(core.index) {shape = [8]}) -> core.nil {
            %2 = arith.constant {value = 0} : core.index
            %3 = arith.constant {value = 8} : core.index
            %4 = arith.constant {value = 1} : core.index
            %5 = arith.muli %0, %0 : core.index
            %6 = arith.addi %5, %4 : core.index
            scf.for %2, %3, %4 {
              ^bb0(%7: core.index):
                %8 = arith.addi %6, %7 : core.index
                memref.store %8, %1, %7
                scf.yield
            }
            memref.store %2, %1, %2
            func.return
          }
        }
        ");
    }

    #[test]
    fn nested_functions_are_visited_through_their_parent() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @outer(%0: core.index) -> core.nil {
    func.func @inner(%1: core.index, %2: memref.memref(core.index) {shape = [8]}) -> core.nil {
      %3 = arith.constant {value = 0} : core.index
      %4 = arith.constant {value = 8} : core.index
      %5 = arith.constant {value = 1} : core.index
      scf.for %3, %4, %5 {
        ^bb0(%6: core.index):
          %7 = arith.muli %1, %1 : core.index
          memref.store %7, %2, %6
          scf.yield
      }
      func.return
    }
    func.return
  }
}
",
        );
        let root = m.op_ref();
        let funcs = collect_typed_inclusive::<func::Func>(&ctx, root);
        assert_eq!(funcs.len(), 2);
        assert_eq!(outermost_functions(&ctx, root), [funcs[0].op_ref()]);
        assert_eq!(outermost_functions(&ctx, funcs[1].op_ref()), [funcs[1].op_ref()]);

        assert_eq!(licm_functions(&mut ctx, root), 1);
        assert!(validate(&ctx, root).is_ok());
    }
}
