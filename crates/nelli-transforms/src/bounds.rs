//! Constant bounds of index values.
//!
//! Conservative: `None` means "unknown", never "unbounded below/above".

use nelli_ir::dialect::{affine, arith, memref, scf, tensor};
use nelli_ir::{DialectOp, IrContext, OpRef, ShapedType, ValueDef, ValueRef};

use crate::loop_utils::loop_bounds;

/// Deepest producer chain followed before giving up.
const MAX_DEPTH: usize = 16;

/// A constant `c` such that `v <= c` on every execution.
pub fn constant_upper_bound(ctx: &IrContext, v: ValueRef) -> Option<i64> {
    upper(ctx, v, 0)
}

/// A constant `c` such that `v >= c` on every execution.
pub fn constant_lower_bound(ctx: &IrContext, v: ValueRef) -> Option<i64> {
    lower(ctx, v, 0)
}

fn upper(ctx: &IrContext, v: ValueRef, depth: usize) -> Option<i64> {
    if depth > MAX_DEPTH {
        return None;
    }
    if let Some(c) = arith::const_int_value(ctx, v) {
        return Some(c);
    }
    let op = match ctx.value_def(v) {
        ValueDef::BlockArg(..) => return induction_var_range(ctx, v).map(|(_, hi)| hi),
        ValueDef::OpResult(op, _) => op,
    };
    let data = ctx.op(op);
    let operands = ctx.op_operands(op);
    let next = depth + 1;

    if data.is("arith", "minsi") || data.is("arith", "minui") {
        return operands.iter().filter_map(|&x| upper(ctx, x, next)).min();
    }
    if let Ok(min) = affine::Min::from_op(ctx, op) {
        return min
            .constants(ctx)
            .into_iter()
            .chain(min.operands(ctx).iter().filter_map(|&x| upper(ctx, x, next)))
            .min();
    }
    if data.is("arith", "addi") {
        return upper(ctx, operands[0], next)?.checked_add(upper(ctx, operands[1], next)?);
    }
    if data.is("arith", "muli") {
        let (lhs, rhs) = (operands[0], operands[1]);
        if lower(ctx, lhs, next)? < 0 || lower(ctx, rhs, next)? < 0 {
            return None;
        }
        return upper(ctx, lhs, next)?.checked_mul(upper(ctx, rhs, next)?);
    }
    if data.is("arith", "subi") {
        return upper(ctx, operands[0], next)?.checked_sub(lower(ctx, operands[1], next)?);
    }
    static_dim(ctx, op)
}

fn lower(ctx: &IrContext, v: ValueRef, depth: usize) -> Option<i64> {
    if depth > MAX_DEPTH {
        return None;
    }
    if let Some(c) = arith::const_int_value(ctx, v) {
        return Some(c);
    }
    let op = match ctx.value_def(v) {
        ValueDef::BlockArg(..) => return induction_var_range(ctx, v).map(|(lo, _)| lo),
        ValueDef::OpResult(op, _) => op,
    };
    let data = ctx.op(op);
    let operands = ctx.op_operands(op);
    let next = depth + 1;

    if data.is("arith", "minsi") {
        return operands
            .iter()
            .map(|&x| lower(ctx, x, next))
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .min();
    }
    if let Ok(max) = affine::Max::from_op(ctx, op) {
        return max
            .constants(ctx)
            .into_iter()
            .chain(max.operands(ctx).iter().filter_map(|&x| lower(ctx, x, next)))
            .max();
    }
    if data.is("arith", "addi") {
        return lower(ctx, operands[0], next)?.checked_add(lower(ctx, operands[1], next)?);
    }
    if data.is("tensor", "dim") || data.is("memref", "dim") {
        return Some(static_dim(ctx, op).unwrap_or(0));
    }
    None
}

/// Size of a `*.dim` whose source dimension is static.
fn static_dim(ctx: &IrContext, op: OpRef) -> Option<i64> {
    if !(tensor::Dim::matches(ctx, op) || memref::Dim::matches(ctx, op)) {
        return None;
    }
    let operands = ctx.op_operands(op);
    let shaped = ShapedType::of(ctx, ctx.value_ty(operands[0]))?;
    let index = usize::try_from(arith::const_int_value(ctx, operands[1])?).ok()?;
    let size = *shaped.shape.get(index)?;
    (size != nelli_ir::DYNAMIC).then_some(size)
}

/// Range `[first, last]` of the values taken by a loop induction variable.
fn induction_var_range(ctx: &IrContext, v: ValueRef) -> Option<(i64, i64)> {
    let ValueDef::BlockArg(block, 0) = ctx.value_def(v) else {
        return None;
    };
    let owner = ctx.block_parent_op(block)?;
    if !(scf::For::matches(ctx, owner) || affine::For::matches(ctx, owner)) {
        return None;
    }
    let bounds = loop_bounds(ctx, owner)?;
    let trips = bounds.trip_count()?;
    if trips == 0 {
        return Some((bounds.lower, bounds.lower));
    }
    Some((bounds.lower, bounds.lower + (trips - 1) * bounds.step))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nelli_ir::parser::parse_test_module;
    use nelli_ir::walk::nested_ops;

    fn result_of(ctx: &IrContext, root: OpRef, name: &'static str) -> ValueRef {
        let op = nested_ops(ctx, root)
            .into_iter()
            .find(|&op| ctx.op(op).full_name() == name)
            .unwrap();
        ctx.op_result(op, 0)
    }

    #[test]
    fn bounds_through_min_and_loops() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.index) -> core.nil {
    %1 = arith.constant {value = 0} : core.index
    %2 = arith.constant {value = 10} : core.index
    %3 = arith.constant {value = 3} : core.index
    scf.for %1, %2, %3 {
      ^bb0(%4: core.index):
        %5 = affine.min %0 {constants = [16, 8]} : core.index
        %6 = arith.muli %4, %3 : core.index
        %7 = arith.subi %2, %4 : core.index
        scf.yield
    }
    func.return
  }
}
",
        );
        let root = m.op_ref();
        assert_eq!(constant_upper_bound(&ctx, result_of(&ctx, root, "affine.min")), Some(8));
        // iv takes 0, 3, 6, 9
        assert_eq!(constant_upper_bound(&ctx, result_of(&ctx, root, "arith.muli")), Some(27));
        assert_eq!(constant_upper_bound(&ctx, result_of(&ctx, root, "arith.subi")), Some(10));
        assert_eq!(constant_lower_bound(&ctx, result_of(&ctx, root, "arith.subi")), None);
    }

    #[test]
    fn function_arguments_are_unbounded() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.index) -> core.index {
    %1 = arith.constant {value = 4} : core.index
    %2 = arith.addi %0, %1 : core.index
    func.return %2
  }
}
",
        );
        let add = result_of(&ctx, m.op_ref(), "arith.addi");
        assert_eq!(constant_upper_bound(&ctx, add), None);
    }
}
