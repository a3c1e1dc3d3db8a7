//! Hoisting of function-local allocations into the entry block.
//!
//! Allocations with a static shape move as-is. Allocations with dynamic
//! sizes are replaced by a static allocation of the sizes' constant upper
//! bounds plus a `memref.subview` of the actual sizes at the original
//! position. Heap allocations get a single `memref.dealloc` before the
//! entry block's terminator, replacing the deallocs of the original.

use smallvec::SmallVec;

use nelli_ir::dialect::memref::{self, AllocLikeOp};
use nelli_ir::dialect::{OpFoldResult, SliceParams, func};
use nelli_ir::walk::{collect_typed, collect_typed_inclusive};
use nelli_ir::{BlockRef, DialectOp, IrContext, OpRef, TypeRef, ValueRef};

use crate::bounds::constant_upper_bound;
use crate::error::TransformResult;
use crate::transform_op::{READ_HANDLE_MODIFY_PAYLOAD, TransformEffect, TransformOp};

/// Whether every user of a dynamically sized allocation accepts a strided
/// view in its place.
fn users_accept_subview(ctx: &IrContext, memref: ValueRef) -> bool {
    ctx.users(memref).iter().all(|&user| {
        let data = ctx.op(user);
        data.in_dialect("linalg")
            || data.is("memref", "dealloc")
            || data.is("memref", "store")
            || data.is("memref", "subview")
    })
}

fn insert_before_terminator(ctx: &mut IrContext, block: BlockRef, op: OpRef) {
    match ctx.block_terminator(block) {
        Some(term) => ctx.insert_op_before(block, term, op),
        None => ctx.push_op(block, op),
    }
}

/// A new allocation of `ty` carrying the attributes of `original`, such as
/// its `alignment`.
fn build_like<T: AllocLikeOp>(ctx: &mut IrContext, original: OpRef, ty: TypeRef) -> T {
    let loc = ctx.op(original).location;
    let attributes = ctx.op(original).attributes.clone();
    let hoisted = T::build(ctx, loc, ty, &[]);
    ctx.op_mut(hoisted.op_ref()).attributes.extend(attributes);
    hoisted
}

/// Hoist one allocation. Returns `false`, leaving the IR untouched, when a
/// dynamic size has no constant upper bound.
fn hoist_one<T: AllocLikeOp>(ctx: &mut IrContext, alloc: T, entry: BlockRef) -> bool {
    let op = alloc.op_ref();
    let Some(shaped) = alloc.shaped_type(ctx) else {
        return false;
    };
    let dynamic_sizes: SmallVec<[ValueRef; 4]> = alloc.dynamic_sizes(ctx).into();

    let mut bounded_shape: SmallVec<[i64; 4]> = SmallVec::new();
    let mut sizes: SmallVec<[OpFoldResult; 4]> = SmallVec::new();
    for (dim, &size) in shaped.shape.iter().enumerate() {
        match shaped.dynamic_dim_index(dim) {
            None => {
                bounded_shape.push(size);
                sizes.push(OpFoldResult::Static(size));
            }
            Some(index) => {
                let value = dynamic_sizes[index];
                let Some(bound) = constant_upper_bound(ctx, value) else {
                    tracing::debug!(dim, "allocation size has no constant upper bound");
                    return false;
                };
                bounded_shape.push(bound);
                sizes.push(OpFoldResult::Dynamic(value));
            }
        }
    }

    let loc = ctx.op(op).location;
    let memref = alloc.memref(ctx);
    let deallocs: SmallVec<[OpRef; 2]> = ctx
        .users(memref)
        .into_iter()
        .filter(|&user| memref::Dealloc::matches(ctx, user))
        .collect();

    let (hoisted_memref, replacement) = if dynamic_sizes.is_empty() {
        let ty = ctx.op_result_types(op)[0];
        let hoisted: T = build_like(ctx, op, ty);
        ctx.push_op_front(entry, hoisted.op_ref());
        let new = hoisted.memref(ctx);
        (new, new)
    } else {
        let ty = shaped.with_shape(bounded_shape).intern(&mut ctx.types);
        let hoisted: T = build_like(ctx, op, ty);
        let rank = shaped.rank();
        let params = SliceParams {
            offsets: SmallVec::from_elem(OpFoldResult::Static(0), rank),
            sizes,
            strides: SmallVec::from_elem(OpFoldResult::Static(1), rank),
        };
        let hoisted_memref = hoisted.memref(ctx);
        let Some(view) = memref::subview(ctx, loc, hoisted_memref, &params) else {
            // Nothing is attached yet; the detached ops are unreachable.
            return false;
        };
        ctx.push_op_front(entry, hoisted.op_ref());
        let block = ctx.op(op).parent_block;
        if let Some(block) = block {
            ctx.insert_op_before(block, op, view.op_ref());
        }
        (hoisted_memref, view.result(ctx))
    };
    if T::NEEDS_DEALLOC {
        let dealloc = memref::dealloc(ctx, loc, hoisted_memref);
        insert_before_terminator(ctx, entry, dealloc.op_ref());
    }

    for dealloc in deallocs {
        ctx.erase_op(dealloc);
    }
    ctx.replace_all_uses(memref, replacement);
    ctx.erase_op(op);
    true
}

/// Hoist the allocations of kind `T` in `func` to its entry block.
///
/// Candidates are allocations outside the entry block that either have a
/// static shape, or whose users all accept a strided view (`linalg.*`,
/// `memref.dealloc`, `memref.store`, `memref.subview`). Returns the number
/// of hoisted allocations.
#[tracing::instrument(skip_all)]
pub fn hoist_static_allocations<T: AllocLikeOp>(ctx: &mut IrContext, func: func::Func) -> usize {
    let entry = func.entry_block(ctx);
    let func_op = func.op_ref();
    let nested_funcs = collect_typed::<func::Func>(ctx, func_op);
    let candidates: Vec<T> = collect_typed::<T>(ctx, func_op)
        .into_iter()
        .filter(|alloc| {
            let op = alloc.op_ref();
            if ctx.op(op).parent_block == Some(entry) {
                return false;
            }
            // Allocations in nested functions belong to those.
            if nested_funcs
                .iter()
                .any(|inner| ctx.is_proper_ancestor(inner.op_ref(), op))
            {
                return false;
            }
            alloc.dynamic_sizes(ctx).is_empty() || users_accept_subview(ctx, alloc.memref(ctx))
        })
        .collect();

    let mut hoisted = 0;
    for alloc in candidates {
        if hoist_one(ctx, alloc, entry) {
            hoisted += 1;
        }
    }
    tracing::debug!(hoisted, "hoisted allocations");
    hoisted
}

/// Transform op hoisting the heap allocations of every function under the
/// target.
pub struct HoistStaticAlloc;

impl TransformOp for HoistStaticAlloc {
    fn name(&self) -> &'static str {
        "hoist_static_alloc"
    }

    fn effects(&self) -> &'static [TransformEffect] {
        READ_HANDLE_MODIFY_PAYLOAD
    }

    fn apply(&self, ctx: &mut IrContext, target: OpRef) -> TransformResult<OpRef> {
        for f in collect_typed_inclusive::<func::Func>(ctx, target) {
            hoist_static_allocations::<memref::Alloc>(ctx, f);
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nelli_ir::parser::parse_test_module;
    use nelli_ir::printer::print_module;
    use nelli_ir::validation::validate;

    fn only_func(ctx: &IrContext, root: OpRef) -> func::Func {
        collect_typed::<func::Func>(ctx, root)[0]
    }

    #[test]
    fn static_allocation_moves_to_entry() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.index, %1: core.f32) -> core.nil {
    %2 = arith.constant {value = 0} : core.index
    %3 = arith.constant {value = 4} : core.index
    %4 = arith.constant {value = 1} : core.index
    scf.for %2, %3, %4 {
      ^bb0(%5: core.index):
        %6 = memref.alloc : memref.memref(core.f32) {shape = [16]}
        memref.store %1, %6, %5
        memref.dealloc %6
        scf.yield
    }
    func.return
  }
}
",
        );
        let root = m.op_ref();
        let f = only_func(&ctx, root);
        assert_eq!(hoist_static_allocations::<memref::Alloc>(&mut ctx, f), 1);
        assert!(validate(&ctx, root).is_ok());
        insta::assert_snapshot!(print_module(&ctx, root), @r"
        core.module @m {
          func.func @f(%0: core.index, %1: core.f32) -> core.nil {
            %2 = memref.alloc : memref.memref(core.f32) {shape = [16]}
            %3 = arith.constant {value = 0} : core.index
            %4 = arith.constant {value = 4} : core.index
            %5 = arith.constant {value = 1} : core.index
            scf.for %3, %4, %5 {
              ^bb0(%6: core.index):
                memref.store %1, %2, %6
                scf.yield
            }
            memref.dealloc %2
            func.return
          }
        }
        ");
    }

    #[test]
    fn bounded_dynamic_allocation_becomes_subview() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.index, %1: core.f32, %2: core.i1) -> core.nil {
    scf.if %2 {
      %3 = affine.min %0 {constants = [8]} : core.index
      %4 = arith.constant {value = 0} : core.index
      %5 = memref.alloc %3 : memref.memref(core.f32) {shape = [-1]}
      memref.store %1, %5, %4
      memref.dealloc %5
      scf.yield
    } {
      scf.yield
    }
    func.return
  }
}
",
        );
        let root = m.op_ref();
        let f = only_func(&ctx, root);
        assert_eq!(hoist_static_allocations::<memref::Alloc>(&mut ctx, f), 1);
        assert!(validate(&ctx, root).is_ok());
        insta::assert_snapshot!(print_module(&ctx, root), @r"
        core.module @m {
          func.func @f(%0: core.index, %1: core.f32, %2: core.i1) -> core.nil {
            %3 = memref.alloc : memref.memref(core.f32) {shape = [8]}
            scf.if %2 {
              %4 = affine.min %0 {constants = [8]} : core.index
              %5 = arith.constant {value = 0} : core.index
              %6 = memref.subview %3, %4 {static_offsets = [0], static_sizes = [-1], static_strides = [1]} : memref.memref(core.f32) {offset = 0, shape = [-1], strides = [1]}
              memref.store %1, %6, %5
              scf.yield
            } {
              scf.yield
            }
            memref.dealloc %3
            func.return
          }
        }
        ");
    }

    #[test]
    fn unbounded_dynamic_allocation_is_untouched() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.index, %1: core.f32, %2: core.i1) -> core.nil {
    scf.if %2 {
      %3 = arith.constant {value = 0} : core.index
      %4 = memref.alloc %0 : memref.memref(core.f32) {shape = [-1]}
      memref.store %1, %4, %3
      memref.dealloc %4
      scf.yield
    } {
      scf.yield
    }
    func.return
  }
}
",
        );
        let root = m.op_ref();
        let before = print_module(&ctx, root);
        let f = only_func(&ctx, root);
        assert_eq!(hoist_static_allocations::<memref::Alloc>(&mut ctx, f), 0);
        assert_eq!(print_module(&ctx, root), before);
    }

    #[test]
    fn stack_allocations_get_no_dealloc() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.f32, %1: core.i1) -> core.nil {
    scf.if %1 {
      %2 = arith.constant {value = 0} : core.index
      %3 = memref.alloca : memref.memref(core.f32) {shape = [4]}
      memref.store %0, %3, %2
      scf.yield
    } {
      scf.yield
    }
    func.return
  }
}
",
        );
        let root = m.op_ref();
        let f = only_func(&ctx, root);
        assert_eq!(hoist_static_allocations::<memref::Alloca>(&mut ctx, f), 1);
        let entry = f.entry_block(&ctx);
        let names: Vec<String> = ctx
            .block(entry)
            .ops
            .iter()
            .map(|&op| ctx.op(op).full_name())
            .collect();
        assert_eq!(names, ["memref.alloca", "scf.if", "func.return"]);
    }

    #[test]
    fn hoisted_allocations_keep_their_attributes() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.index, %1: core.f32, %2: core.i1) -> core.nil {
    scf.if %2 {
      %3 = arith.constant {value = 0} : core.index
      %4 = memref.alloc {alignment = 64} : memref.memref(core.f32) {shape = [4]}
      %5 = affine.min %0 {constants = [8]} : core.index
      %6 = memref.alloc %5 {alignment = 32} : memref.memref(core.f32) {shape = [-1]}
      memref.store %1, %4, %3
      memref.store %1, %6, %3
      scf.yield
    } {
      scf.yield
    }
    func.return
  }
}
",
        );
        let root = m.op_ref();
        HoistStaticAlloc.apply(&mut ctx, root).unwrap();
        assert!(validate(&ctx, root).is_ok());

        let f = only_func(&ctx, root);
        let entry = f.entry_block(&ctx);
        let mut alignments: Vec<i64> = ctx
            .block(entry)
            .ops
            .iter()
            .filter(|&&op| memref::Alloc::matches(&ctx, op))
            .filter_map(|&op| ctx.op(op).attr("alignment").and_then(|a| a.as_i64()))
            .collect();
        alignments.sort();
        assert_eq!(alignments, [32, 64]);
    }
}
