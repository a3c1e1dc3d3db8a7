//! Buffer-level cleanups: store-to-load forwarding through vector transfers
//! and erasure of allocations nothing reads from.

use nelli_ir::dialect::{memref, vector};
use nelli_ir::op_interface::PureOps;
use nelli_ir::walk::{collect_typed, nested_ops};
use nelli_ir::{DialectOp, IrContext, OpRef, ValueRef};

use crate::error::TransformResult;
use crate::transform_op::{READ_HANDLE_MODIFY_PAYLOAD, TransformEffect, TransformOp};

/// Operations a forwarded value may be carried across.
fn leaves_memory_unchanged(ctx: &IrContext, op: OpRef) -> bool {
    ctx.op(op).regions.is_empty()
        && (PureOps::is_pure(ctx, op)
            || vector::TransferRead::matches(ctx, op)
            || memref::Load::matches(ctx, op))
}

fn forwards_to(ctx: &IrContext, write: vector::TransferWrite, read: vector::TransferRead) -> bool {
    read.source(ctx) == write.dest(ctx)
        && read.indices(ctx) == write.indices(ctx)
        && read.mask(ctx).is_none()
        && write.mask(ctx).is_none()
        && read.has_identity_permutation(ctx)
        && ctx.value_ty(read.result(ctx)) == ctx.value_ty(write.value(ctx))
}

/// Replace reads of a just-written vector by the written value. Returns the
/// number of erased reads.
fn forward_transfer_writes(ctx: &mut IrContext, root: OpRef) -> usize {
    let mut forwarded = 0;
    for write in collect_typed::<vector::TransferWrite>(ctx, root) {
        let dest = write.dest(ctx);
        // Tensor writes produce a new value instead of updating memory.
        if !ctx.op_results(write.op_ref()).is_empty() {
            continue;
        }
        let Some(block) = ctx.op(write.op_ref()).parent_block else {
            continue;
        };
        let ops = ctx.block(block).ops.clone();
        let Some(pos) = ops.iter().position(|&op| op == write.op_ref()) else {
            continue;
        };
        for &op in &ops[pos + 1..] {
            match vector::TransferRead::from_op(ctx, op) {
                Ok(read) if forwards_to(ctx, write, read) => {
                    let value = write.value(ctx);
                    ctx.replace_all_uses(read.result(ctx), value);
                    ctx.erase_op(op);
                    forwarded += 1;
                }
                _ if leaves_memory_unchanged(ctx, op) => {}
                _ => break,
            }
        }
        tracing::trace!(?dest, forwarded, "forwarded transfer_write");
    }
    forwarded
}

/// Collect the ops that only write to or release `buffer`, looking through
/// subviews. Returns `false` if anything may read it.
fn collect_write_only_users(ctx: &IrContext, buffer: ValueRef, out: &mut Vec<OpRef>) -> bool {
    for user in ctx.users(buffer) {
        if out.contains(&user) {
            continue;
        }
        if memref::Dealloc::matches(ctx, user) {
            out.push(user);
        } else if let Ok(write) = vector::TransferWrite::from_op(ctx, user) {
            if write.value(ctx) == buffer || !ctx.op_results(user).is_empty() {
                return false;
            }
            out.push(user);
        } else if let Ok(store) = memref::Store::from_op(ctx, user) {
            if store.value(ctx) == buffer {
                return false;
            }
            out.push(user);
        } else if let Ok(view) = memref::SubView::from_op(ctx, user) {
            if !collect_write_only_users(ctx, view.result(ctx), out) {
                return false;
            }
            out.push(user);
        } else {
            return false;
        }
    }
    true
}

/// Erase allocations that are only ever written to, with all their uses.
fn erase_dead_allocations(ctx: &mut IrContext, root: OpRef) -> usize {
    let allocs: Vec<OpRef> = nested_ops(ctx, root)
        .into_iter()
        .filter(|&op| memref::Alloc::matches(ctx, op) || memref::Alloca::matches(ctx, op))
        .collect();
    let mut erased = 0;
    for alloc in allocs {
        let mut dead = Vec::new();
        if !collect_write_only_users(ctx, ctx.op_result(alloc, 0), &mut dead) {
            continue;
        }
        for op in dead {
            ctx.erase_op(op);
        }
        ctx.erase_op(alloc);
        erased += 1;
    }
    erased
}

/// Forward vector transfers through memory, then erase write-only
/// allocations under `target`. Returns the number of changes.
#[tracing::instrument(skip_all)]
pub fn apply_buffer_optimizations(ctx: &mut IrContext, target: OpRef) -> usize {
    let forwarded = forward_transfer_writes(ctx, target);
    let erased = erase_dead_allocations(ctx, target);
    tracing::debug!(forwarded, erased, "buffer optimizations");
    forwarded + erased
}

pub struct ApplyBufferOptimizations;

impl TransformOp for ApplyBufferOptimizations {
    fn name(&self) -> &'static str {
        "apply_buffer_optimizations"
    }

    fn effects(&self) -> &'static [TransformEffect] {
        READ_HANDLE_MODIFY_PAYLOAD
    }

    fn apply(&self, ctx: &mut IrContext, target: OpRef) -> TransformResult<OpRef> {
        apply_buffer_optimizations(ctx, target);
        Ok(target)
    }
}
