//! Memref dialect: buffer allocation, access and strided views.

use smallvec::SmallVec;

use crate::context::{IrContext, OperationDataBuilder};
use crate::dialect::{SliceParams, core};
use crate::ir::Symbol;
use crate::ops::DialectOp;
use crate::refs::{OpRef, TypeRef, ValueRef};
use crate::shaped::{DYNAMIC, ShapedType};
use crate::types::{Attribute, Location};
use crate::{define_op, register_pure_op};

define_op! {
    /// Heap allocation; one size operand per dynamic dimension.
    pub struct Alloc = memref.alloc;
    /// Stack allocation; one size operand per dynamic dimension.
    pub struct Alloca = memref.alloca;
    pub struct Dealloc = memref.dealloc;
    /// `memref.load %memref, %indices...`
    pub struct Load = memref.load;
    /// `memref.store %value, %memref, %indices...`
    pub struct Store = memref.store;
    /// `memref.subview %source, %dynamic... {static_offsets, static_sizes, static_strides}`
    pub struct SubView = memref.subview;
    /// `memref.reinterpret_cast %source {offset, sizes, strides}`
    pub struct ReinterpretCast = memref.reinterpret_cast;
    /// `memref.dim %source, %index`
    pub struct Dim = memref.dim;
}

register_pure_op!(memref.subview, memref.reinterpret_cast, memref.dim);

/// Allocation operations: the result is a fresh memref whose dynamic
/// dimensions are given by the operands.
pub trait AllocLikeOp: DialectOp {
    /// Heap allocations must be released with `memref.dealloc`.
    const NEEDS_DEALLOC: bool;

    fn build(ctx: &mut IrContext, loc: Location, ty: TypeRef, dynamic_sizes: &[ValueRef]) -> Self;

    fn memref(self, ctx: &IrContext) -> ValueRef {
        ctx.op_result(self.op_ref(), 0)
    }

    fn dynamic_sizes(self, ctx: &IrContext) -> &[ValueRef] {
        ctx.op_operands(self.op_ref())
    }

    fn shaped_type(self, ctx: &IrContext) -> Option<ShapedType> {
        ShapedType::of(ctx, ctx.op_result_types(self.op_ref())[0])
    }
}

fn build_alloc(
    ctx: &mut IrContext,
    loc: Location,
    name: &'static str,
    ty: TypeRef,
    dynamic_sizes: &[ValueRef],
) -> OpRef {
    OperationDataBuilder::new(loc, Symbol::new("memref"), Symbol::new(name))
        .operands(dynamic_sizes.iter().copied())
        .result(ty)
        .create(ctx)
}

impl AllocLikeOp for Alloc {
    const NEEDS_DEALLOC: bool = true;

    fn build(ctx: &mut IrContext, loc: Location, ty: TypeRef, dynamic_sizes: &[ValueRef]) -> Self {
        Alloc(build_alloc(ctx, loc, "alloc", ty, dynamic_sizes))
    }
}

impl AllocLikeOp for Alloca {
    const NEEDS_DEALLOC: bool = false;

    fn build(ctx: &mut IrContext, loc: Location, ty: TypeRef, dynamic_sizes: &[ValueRef]) -> Self {
        Alloca(build_alloc(ctx, loc, "alloca", ty, dynamic_sizes))
    }
}

pub fn alloc(ctx: &mut IrContext, loc: Location, ty: TypeRef, dynamic_sizes: &[ValueRef]) -> Alloc {
    Alloc::build(ctx, loc, ty, dynamic_sizes)
}

pub fn alloca(
    ctx: &mut IrContext,
    loc: Location,
    ty: TypeRef,
    dynamic_sizes: &[ValueRef],
) -> Alloca {
    Alloca::build(ctx, loc, ty, dynamic_sizes)
}

pub fn dealloc(ctx: &mut IrContext, loc: Location, memref: ValueRef) -> Dealloc {
    let op = OperationDataBuilder::new(loc, Symbol::new("memref"), Symbol::new("dealloc"))
        .operand(memref)
        .create(ctx);
    Dealloc(op)
}

impl Dealloc {
    pub fn memref(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }
}

pub fn load(ctx: &mut IrContext, loc: Location, memref: ValueRef, indices: &[ValueRef]) -> Load {
    let ty = ctx.value_ty(memref);
    let element = ShapedType::of(ctx, ty).map_or(ty, |s| s.element);
    let op = OperationDataBuilder::new(loc, Symbol::new("memref"), Symbol::new("load"))
        .operand(memref)
        .operands(indices.iter().copied())
        .result(element)
        .create(ctx);
    Load(op)
}

impl Load {
    pub fn memref(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn indices(self, ctx: &IrContext) -> &[ValueRef] {
        &ctx.op_operands(self.0)[1..]
    }
}

pub fn store(
    ctx: &mut IrContext,
    loc: Location,
    value: ValueRef,
    memref: ValueRef,
    indices: &[ValueRef],
) -> Store {
    let op = OperationDataBuilder::new(loc, Symbol::new("memref"), Symbol::new("store"))
        .operands([value, memref])
        .operands(indices.iter().copied())
        .create(ctx);
    Store(op)
}

impl Store {
    pub fn value(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn memref(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[1]
    }

    pub fn indices(self, ctx: &IrContext) -> &[ValueRef] {
        &ctx.op_operands(self.0)[2..]
    }
}

/// Type of a subview of `source` with `params`: the slice sizes as shape
/// and the source layout composed with the slice offsets and strides.
pub fn subview_result_type(
    ctx: &mut IrContext,
    source: TypeRef,
    params: &SliceParams,
) -> Option<TypeRef> {
    let shaped = ShapedType::of(ctx, source)?;
    let (src_strides, src_offset) = shaped.strides_and_offset()?;
    let offsets = params.constant_offsets(ctx);
    let strides = params.constant_strides(ctx);

    let result_strides: SmallVec<[i64; 4]> = match &strides {
        Some(strides) => src_strides
            .iter()
            .zip(strides)
            .map(|(&s, &t)| if s == DYNAMIC { DYNAMIC } else { s * t })
            .collect(),
        None => SmallVec::from_elem(DYNAMIC, params.rank()),
    };
    let result_offset = match offsets {
        Some(offsets) if src_offset != DYNAMIC && !src_strides.contains(&DYNAMIC) => {
            src_offset
                + offsets
                    .iter()
                    .zip(&src_strides)
                    .map(|(o, s)| o * s)
                    .sum::<i64>()
        }
        _ => DYNAMIC,
    };
    let result = shaped
        .with_shape(params.result_shape(ctx))
        .with_layout(result_offset, result_strides);
    Some(result.intern(&mut ctx.types))
}

/// Create a subview with an inferred result type.
pub fn subview(
    ctx: &mut IrContext,
    loc: Location,
    source: ValueRef,
    params: &SliceParams,
) -> Option<SubView> {
    let source_ty = ctx.value_ty(source);
    let ty = subview_result_type(ctx, source_ty, params)?;
    let (attrs, dynamic) = params.encode();
    let op = OperationDataBuilder::new(loc, Symbol::new("memref"), Symbol::new("subview"))
        .operand(source)
        .operands(dynamic)
        .attrs(attrs)
        .result(ty)
        .create(ctx);
    Some(SubView(op))
}

impl SubView {
    pub fn source(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn params(self, ctx: &IrContext) -> Option<SliceParams> {
        SliceParams::from_op(ctx, self.0, 1)
    }

    pub fn result(self, ctx: &IrContext) -> ValueRef {
        ctx.op_result(self.0, 0)
    }
}

pub fn reinterpret_cast(
    ctx: &mut IrContext,
    loc: Location,
    source: ValueRef,
    offset: i64,
    sizes: &[i64],
    strides: &[i64],
) -> Option<ReinterpretCast> {
    let shaped = ShapedType::of(ctx, ctx.value_ty(source))?;
    let ty = shaped
        .with_shape(sizes.iter().copied())
        .with_layout(offset, strides.iter().copied())
        .intern(&mut ctx.types);
    let op = OperationDataBuilder::new(loc, Symbol::new("memref"), Symbol::new("reinterpret_cast"))
        .operand(source)
        .attr("offset", Attribute::int(offset))
        .attr("sizes", Attribute::int_list(sizes.iter().copied()))
        .attr("strides", Attribute::int_list(strides.iter().copied()))
        .result(ty)
        .create(ctx);
    Some(ReinterpretCast(op))
}

pub fn dim(ctx: &mut IrContext, loc: Location, source: ValueRef, index: ValueRef) -> Dim {
    let index_ty = core::index(ctx);
    let op = OperationDataBuilder::new(loc, Symbol::new("memref"), Symbol::new("dim"))
        .operands([source, index])
        .result(index_ty)
        .create(ctx);
    Dim(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{OpFoldResult, arith};
    use crate::location::Span;

    fn loc(ctx: &mut IrContext) -> Location {
        let path = ctx.paths.intern("test.mlir".to_owned());
        Location::new(path, Span::new(0, 0))
    }

    #[test]
    fn subview_type_composes_layout() {
        let mut ctx = IrContext::new();
        let loc = loc(&mut ctx);
        let f32_ty = core::f32(&mut ctx);
        let ty = ShapedType::memref(f32_ty, [8, 16]).intern(&mut ctx.types);
        let buffer = alloc(&mut ctx, loc, ty, &[]);
        let params = SliceParams::from_static([2, 4], [4, 4], [1, 2]);

        let source = buffer.memref(&ctx);
        let view = subview(&mut ctx, loc, source, &params).unwrap();
        let result = ShapedType::of(&ctx, ctx.value_ty(view.result(&ctx))).unwrap();
        assert_eq!(result.shape.as_slice(), &[4, 4]);
        let (strides, offset) = result.strides_and_offset().unwrap();
        assert_eq!(strides.as_slice(), &[16, 2]);
        assert_eq!(offset, 2 * 16 + 4);
        assert_eq!(view.params(&ctx), Some(params));
    }

    #[test]
    fn dynamic_offset_makes_offset_dynamic() {
        let mut ctx = IrContext::new();
        let loc = loc(&mut ctx);
        let f32_ty = core::f32(&mut ctx);
        let ty = ShapedType::memref(f32_ty, [8]).intern(&mut ctx.types);
        let buffer = alloca(&mut ctx, loc, ty, &[]);
        let idx = core::index(&mut ctx);
        let (_, block) = ctx.create_single_block_region(loc, [idx]);
        let offset = ctx.block_arg(block, 0);
        let params = SliceParams {
            offsets: [OpFoldResult::Dynamic(offset)].into_iter().collect(),
            sizes: [OpFoldResult::Static(4)].into_iter().collect(),
            strides: [OpFoldResult::Static(1)].into_iter().collect(),
        };
        let source = buffer.memref(&ctx);
        let view = subview(&mut ctx, loc, source, &params).unwrap();
        let result = ShapedType::of(&ctx, ctx.value_ty(view.result(&ctx))).unwrap();
        assert_eq!(result.strides_and_offset().unwrap().1, DYNAMIC);
        assert_eq!(ctx.op_operands(view.op_ref()), &[source, offset]);
    }

    #[test]
    fn load_store_accessors() {
        let mut ctx = IrContext::new();
        let loc = loc(&mut ctx);
        let f32_ty = core::f32(&mut ctx);
        let ty = ShapedType::memref(f32_ty, [4]).intern(&mut ctx.types);
        let buffer = alloc(&mut ctx, loc, ty, &[]).memref(&ctx);
        let i = arith::constant_index(&mut ctx, loc, 1).result(&ctx);
        let l = load(&mut ctx, loc, buffer, &[i]);
        let v = ctx.op_result(l.op_ref(), 0);
        assert_eq!(ctx.value_ty(v), f32_ty);
        let s = store(&mut ctx, loc, v, buffer, &[i]);
        assert_eq!(s.memref(&ctx), buffer);
        assert_eq!(s.indices(&ctx), &[i]);
        assert_eq!(l.indices(&ctx), &[i]);
    }
}
