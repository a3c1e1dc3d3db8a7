//! Vector dialect: transfers between memory and vectors, and vector reshapes.

use smallvec::SmallVec;

use crate::context::{IrContext, OperationDataBuilder};
use crate::dialect::int_list_attr;
use crate::ir::Symbol;
use crate::ops::DialectOp;
use crate::refs::{BlockRef, OpRef, TypeRef, ValueRef};
use crate::shaped::ShapedType;
use crate::types::{Attribute, Location};
use crate::{define_op, register_pure_op};

define_op! {
    /// `vector.transfer_read %source, %indices..., %padding[, %mask] {permutation?}`
    pub struct TransferRead = vector.transfer_read;
    /// `vector.transfer_write %value, %dest, %indices...[, %mask]`
    pub struct TransferWrite = vector.transfer_write;
    /// `vector.transpose %v {permutation}`: result dim `i` is source dim `permutation[i]`.
    pub struct Transpose = vector.transpose;
    pub struct ShapeCast = vector.shape_cast;
    /// `vector.mask %mask { op; vector.yield }`
    pub struct Mask = vector.mask;
    pub struct Yield = vector.yield;
}

register_pure_op!(vector.transpose, vector.shape_cast);

/// Rank of the shaped type of `v`, 0 for scalars.
fn rank_of(ctx: &IrContext, v: ValueRef) -> usize {
    ShapedType::of(ctx, ctx.value_ty(v)).map_or(0, |s| s.rank())
}

#[allow(clippy::too_many_arguments)]
pub fn transfer_read(
    ctx: &mut IrContext,
    loc: Location,
    source: ValueRef,
    indices: &[ValueRef],
    padding: ValueRef,
    mask: Option<ValueRef>,
    vector_ty: TypeRef,
    permutation: Option<&[i64]>,
) -> TransferRead {
    let mut builder =
        OperationDataBuilder::new(loc, Symbol::new("vector"), Symbol::new("transfer_read"))
            .operand(source)
            .operands(indices.iter().copied())
            .operand(padding)
            .operands(mask)
            .result(vector_ty);
    if let Some(permutation) = permutation {
        builder = builder.attr(
            "permutation",
            Attribute::int_list(permutation.iter().copied()),
        );
    }
    TransferRead(builder.create(ctx))
}

impl TransferRead {
    pub fn source(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn indices(self, ctx: &IrContext) -> &[ValueRef] {
        let rank = rank_of(ctx, self.source(ctx));
        &ctx.op_operands(self.0)[1..1 + rank]
    }

    pub fn padding(self, ctx: &IrContext) -> ValueRef {
        let rank = rank_of(ctx, self.source(ctx));
        ctx.op_operands(self.0)[1 + rank]
    }

    pub fn mask(self, ctx: &IrContext) -> Option<ValueRef> {
        let rank = rank_of(ctx, self.source(ctx));
        ctx.op_operands(self.0).get(2 + rank).copied()
    }

    /// Explicit permutation, if any.
    pub fn permutation(self, ctx: &IrContext) -> Option<SmallVec<[i64; 4]>> {
        ctx.op(self.0).attr("permutation")?.as_int_list()
    }

    pub fn has_identity_permutation(self, ctx: &IrContext) -> bool {
        self.permutation(ctx)
            .is_none_or(|p| p.iter().enumerate().all(|(i, &d)| d == i as i64))
    }

    pub fn result(self, ctx: &IrContext) -> ValueRef {
        ctx.op_result(self.0, 0)
    }
}

pub fn transfer_write(
    ctx: &mut IrContext,
    loc: Location,
    value: ValueRef,
    dest: ValueRef,
    indices: &[ValueRef],
    mask: Option<ValueRef>,
) -> TransferWrite {
    let dest_ty = ctx.value_ty(dest);
    let mut builder =
        OperationDataBuilder::new(loc, Symbol::new("vector"), Symbol::new("transfer_write"))
            .operands([value, dest])
            .operands(indices.iter().copied())
            .operands(mask);
    // Writing into a tensor produces the updated tensor.
    if ShapedType::is_tensor(ctx, dest_ty) {
        builder = builder.result(dest_ty);
    }
    TransferWrite(builder.create(ctx))
}

impl TransferWrite {
    pub fn value(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn dest(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[1]
    }

    pub fn indices(self, ctx: &IrContext) -> &[ValueRef] {
        let rank = rank_of(ctx, self.dest(ctx));
        &ctx.op_operands(self.0)[2..2 + rank]
    }

    pub fn mask(self, ctx: &IrContext) -> Option<ValueRef> {
        let rank = rank_of(ctx, self.dest(ctx));
        ctx.op_operands(self.0).get(2 + rank).copied()
    }
}

pub fn transpose(
    ctx: &mut IrContext,
    loc: Location,
    value: ValueRef,
    permutation: &[i64],
) -> Option<Transpose> {
    let shaped = ShapedType::of(ctx, ctx.value_ty(value))?;
    let shape: SmallVec<[i64; 4]> = permutation
        .iter()
        .map(|&p| shaped.shape.get(p as usize).copied())
        .collect::<Option<_>>()?;
    let ty = shaped.with_shape(shape).intern(&mut ctx.types);
    let op = OperationDataBuilder::new(loc, Symbol::new("vector"), Symbol::new("transpose"))
        .operand(value)
        .attr(
            "permutation",
            Attribute::int_list(permutation.iter().copied()),
        )
        .result(ty)
        .create(ctx);
    Some(Transpose(op))
}

impl Transpose {
    pub fn permutation(self, ctx: &IrContext) -> SmallVec<[i64; 4]> {
        int_list_attr(ctx, self.0, "permutation")
    }
}

pub fn shape_cast(ctx: &mut IrContext, loc: Location, value: ValueRef, ty: TypeRef) -> ShapeCast {
    let op = OperationDataBuilder::new(loc, Symbol::new("vector"), Symbol::new("shape_cast"))
        .operand(value)
        .result(ty)
        .create(ctx);
    ShapeCast(op)
}

impl ShapeCast {
    pub fn source(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn result(self, ctx: &IrContext) -> ValueRef {
        ctx.op_result(self.0, 0)
    }
}

/// Create a `vector.mask` with an empty body; the caller adds the masked op
/// and a `vector.yield` of its results.
pub fn mask(
    ctx: &mut IrContext,
    loc: Location,
    mask_value: ValueRef,
    result_types: &[TypeRef],
) -> Mask {
    let (region, _) = ctx.create_single_block_region(loc, []);
    let op = OperationDataBuilder::new(loc, Symbol::new("vector"), Symbol::new("mask"))
        .operand(mask_value)
        .results(result_types.iter().copied())
        .region(region)
        .create(ctx);
    Mask(op)
}

impl Mask {
    pub fn mask_value(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn body(self, ctx: &IrContext) -> BlockRef {
        ctx.region(ctx.op(self.0).regions[0]).blocks[0]
    }

    /// The single operation wrapped by the mask.
    pub fn masked_op(self, ctx: &IrContext) -> Option<OpRef> {
        match ctx.block(self.body(ctx)).ops.as_slice() {
            [op, term] if Yield::matches(ctx, *term) => Some(*op),
            _ => None,
        }
    }
}

pub fn r#yield(ctx: &mut IrContext, loc: Location, values: &[ValueRef]) -> Yield {
    let op = OperationDataBuilder::new(loc, Symbol::new("vector"), Symbol::new("yield"))
        .operands(values.iter().copied())
        .create(ctx);
    Yield(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{arith, core};
    use crate::location::Span;

    #[test]
    fn transfer_operand_layout() {
        let mut ctx = IrContext::new();
        let path = ctx.paths.intern("test.mlir".to_owned());
        let loc = Location::new(path, Span::new(0, 0));
        let f32_ty = core::f32(&mut ctx);
        let mem_ty = ShapedType::memref(f32_ty, [4, 8]).intern(&mut ctx.types);
        let vec_ty = ShapedType::vector(f32_ty, [8, 4]).intern(&mut ctx.types);
        let i1 = core::i1(&mut ctx);
        let mask_ty = ShapedType::vector(i1, [8, 4]).intern(&mut ctx.types);
        let (_, block) = ctx.create_single_block_region(loc, [mem_ty, mask_ty]);
        let (buffer, mask_value) = (ctx.block_arg(block, 0), ctx.block_arg(block, 1));
        let zero = arith::constant_index(&mut ctx, loc, 0).result(&ctx);
        let pad = arith::constant(&mut ctx, loc, f32_ty, Attribute::float(0.0)).result(&ctx);

        let read = transfer_read(
            &mut ctx,
            loc,
            buffer,
            &[zero, zero],
            pad,
            Some(mask_value),
            vec_ty,
            Some(&[1, 0]),
        );
        assert_eq!(read.indices(&ctx), &[zero, zero]);
        assert_eq!(read.padding(&ctx), pad);
        assert_eq!(read.mask(&ctx), Some(mask_value));
        assert!(!read.has_identity_permutation(&ctx));

        let value = read.result(&ctx);
        let write = transfer_write(&mut ctx, loc, value, buffer, &[zero, zero], None);
        assert_eq!(write.indices(&ctx), &[zero, zero]);
        assert_eq!(write.mask(&ctx), None);
        assert!(ctx.op_results(write.op_ref()).is_empty());

        let t = transpose(&mut ctx, loc, value, &[1, 0]).unwrap();
        let t_ty = ShapedType::of(&ctx, ctx.op_result_types(t.op_ref())[0]).unwrap();
        assert_eq!(t_ty.shape.as_slice(), &[4, 8]);
    }
}
