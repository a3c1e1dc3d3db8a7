//! Legality gate for elementwise producer/consumer fusion.
//!
//! Fusing a producer into its consumer replaces the joining value by the
//! producer's own operands. The gate bounds how many distinct operands the
//! fused operation ends up with.

use smallvec::SmallVec;

use nelli_ir::dialect::linalg;
use nelli_ir::{IrContext, OpRef, Use, ValueRef};

/// Configuration for elementwise fusion.
#[derive(Debug, Clone, Copy)]
pub struct FusionConfig {
    /// Maximum number of distinct operands of a fused operation. Default: 3.
    pub operand_limit: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self { operand_limit: 3 }
    }
}

/// Distinct operands that count towards the budget, in first-use order.
///
/// Destination operands of structured ops are excluded: fusion reuses the
/// consumer's destinations.
fn counted_operands(ctx: &IrContext, op: OpRef) -> SmallVec<[ValueRef; 8]> {
    let operands = if linalg::is_structured(ctx, op) {
        linalg::inputs(ctx, op)
    } else {
        ctx.op_operands(op)
    };
    let mut distinct: SmallVec<[ValueRef; 8]> = SmallVec::new();
    for &v in operands {
        if !distinct.contains(&v) {
            distinct.push(v);
        }
    }
    distinct
}

/// Whether fusing the producer of `operand_use`'s value into its user keeps
/// the fused operation within `limit` distinct operands.
///
/// Fails when the value is a block argument or its producer has more than
/// one result.
pub fn fused_operand_count_within_limit(ctx: &IrContext, operand_use: Use, limit: usize) -> bool {
    let consumer = operand_use.user;
    let Some(&value) = ctx.op_operands(consumer).get(operand_use.operand_index as usize) else {
        return false;
    };
    let Some(producer) = ctx.defining_op(value) else {
        return false;
    };
    if ctx.op_results(producer).len() != 1 {
        return false;
    }

    let mut fused = counted_operands(ctx, consumer);
    fused.retain(|v| *v != value);
    for v in counted_operands(ctx, producer) {
        if !fused.contains(&v) {
            fused.push(v);
        }
    }
    let count = fused.len();
    tracing::trace!(count, limit, "fused operand count");
    count <= limit
}
