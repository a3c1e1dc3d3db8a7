//! Tensor dialect: value-semantics slicing, padding and reshaping.

use smallvec::SmallVec;

use crate::context::{IrContext, OperationDataBuilder};
use crate::dialect::{SliceParams, core, int_list_attr};
use crate::ir::Symbol;
use crate::refs::{BlockRef, TypeRef, ValueRef};
use crate::shaped::{DYNAMIC, ShapedType};
use crate::types::{Attribute, Location};
use crate::{define_op, register_pure_op};

define_op! {
    /// `tensor.empty %dynamic_sizes...`
    pub struct Empty = tensor.empty;
    /// `tensor.extract_slice %source, %dynamic... {static_offsets, static_sizes, static_strides}`
    pub struct ExtractSlice = tensor.extract_slice;
    /// `tensor.parallel_insert_slice %source, %dest, %dynamic... {...}`, only
    /// valid inside `scf.in_parallel`.
    pub struct ParallelInsertSlice = tensor.parallel_insert_slice;
    /// `tensor.pad %source, %value {low = [..], high = [..]}`
    pub struct Pad = tensor.pad;
    /// `tensor.generate %dynamic_sizes...` whose body maps indices to an element.
    pub struct Generate = tensor.generate;
    pub struct Yield = tensor.yield;
    pub struct Cast = tensor.cast;
    /// `tensor.dim %source, %index`
    pub struct Dim = tensor.dim;
    /// `tensor.collapse_shape %source {reassociation = [[..], ..]}`
    pub struct CollapseShape = tensor.collapse_shape;
    /// `tensor.expand_shape %source {reassociation = [[..], ..]}`
    pub struct ExpandShape = tensor.expand_shape;
    /// `tensor.pack %source, %dest {inner_dims_pos, inner_tiles}`
    pub struct Pack = tensor.pack;
}

register_pure_op!(
    tensor.empty,
    tensor.extract_slice,
    tensor.pad,
    tensor.generate,
    tensor.cast,
    tensor.dim,
    tensor.collapse_shape,
    tensor.expand_shape,
    tensor.pack,
);

pub fn empty(ctx: &mut IrContext, loc: Location, ty: TypeRef, dynamic_sizes: &[ValueRef]) -> Empty {
    let op = OperationDataBuilder::new(loc, Symbol::new("tensor"), Symbol::new("empty"))
        .operands(dynamic_sizes.iter().copied())
        .result(ty)
        .create(ctx);
    Empty(op)
}

impl Empty {
    pub fn result(self, ctx: &IrContext) -> ValueRef {
        ctx.op_result(self.0, 0)
    }
}

pub fn extract_slice(
    ctx: &mut IrContext,
    loc: Location,
    source: ValueRef,
    params: &SliceParams,
) -> Option<ExtractSlice> {
    let shaped = ShapedType::of(ctx, ctx.value_ty(source))?;
    let ty = shaped
        .with_shape(params.result_shape(ctx))
        .intern(&mut ctx.types);
    let (attrs, dynamic) = params.encode();
    let op = OperationDataBuilder::new(loc, Symbol::new("tensor"), Symbol::new("extract_slice"))
        .operand(source)
        .operands(dynamic)
        .attrs(attrs)
        .result(ty)
        .create(ctx);
    Some(ExtractSlice(op))
}

impl ExtractSlice {
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

pub fn parallel_insert_slice(
    ctx: &mut IrContext,
    loc: Location,
    source: ValueRef,
    dest: ValueRef,
    params: &SliceParams,
) -> ParallelInsertSlice {
    let (attrs, dynamic) = params.encode();
    let op = OperationDataBuilder::new(
        loc,
        Symbol::new("tensor"),
        Symbol::new("parallel_insert_slice"),
    )
    .operands([source, dest])
    .operands(dynamic)
    .attrs(attrs)
    .create(ctx);
    ParallelInsertSlice(op)
}

impl ParallelInsertSlice {
    pub fn source(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn dest(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[1]
    }

    pub fn params(self, ctx: &IrContext) -> Option<SliceParams> {
        SliceParams::from_op(ctx, self.0, 2)
    }
}

/// Pad `source` with `value`. Only static padding amounts are supported.
pub fn pad(
    ctx: &mut IrContext,
    loc: Location,
    source: ValueRef,
    value: ValueRef,
    low: &[i64],
    high: &[i64],
) -> Option<Pad> {
    let shaped = ShapedType::of(ctx, ctx.value_ty(source))?;
    let shape: SmallVec<[i64; 4]> = shaped
        .shape
        .iter()
        .zip(low.iter().zip(high))
        .map(|(&d, (&l, &h))| if d == DYNAMIC { DYNAMIC } else { d + l + h })
        .collect();
    let ty = shaped.with_shape(shape).intern(&mut ctx.types);
    let op = OperationDataBuilder::new(loc, Symbol::new("tensor"), Symbol::new("pad"))
        .operands([source, value])
        .attr("low", Attribute::int_list(low.iter().copied()))
        .attr("high", Attribute::int_list(high.iter().copied()))
        .result(ty)
        .create(ctx);
    Some(Pad(op))
}

impl Pad {
    pub fn source(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn padding_value(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[1]
    }

    pub fn low(self, ctx: &IrContext) -> SmallVec<[i64; 4]> {
        int_list_attr(ctx, self.0, "low")
    }

    pub fn high(self, ctx: &IrContext) -> SmallVec<[i64; 4]> {
        int_list_attr(ctx, self.0, "high")
    }

    pub fn result(self, ctx: &IrContext) -> ValueRef {
        ctx.op_result(self.0, 0)
    }
}

/// Create a `tensor.generate` of type `ty` with an empty body block taking
/// one index per dimension. The caller terminates the body with [`r#yield`].
pub fn generate(
    ctx: &mut IrContext,
    loc: Location,
    ty: TypeRef,
    dynamic_sizes: &[ValueRef],
) -> Option<Generate> {
    let rank = ShapedType::of(ctx, ty)?.rank();
    let index = core::index(ctx);
    let (region, _) = ctx.create_single_block_region(loc, std::iter::repeat_n(index, rank));
    let op = OperationDataBuilder::new(loc, Symbol::new("tensor"), Symbol::new("generate"))
        .operands(dynamic_sizes.iter().copied())
        .result(ty)
        .region(region)
        .create(ctx);
    Some(Generate(op))
}

impl Generate {
    pub fn body(self, ctx: &IrContext) -> BlockRef {
        ctx.region(ctx.op(self.0).regions[0]).blocks[0]
    }

    pub fn result(self, ctx: &IrContext) -> ValueRef {
        ctx.op_result(self.0, 0)
    }
}

pub fn r#yield(ctx: &mut IrContext, loc: Location, value: ValueRef) -> Yield {
    let op = OperationDataBuilder::new(loc, Symbol::new("tensor"), Symbol::new("yield"))
        .operand(value)
        .create(ctx);
    Yield(op)
}

pub fn cast(ctx: &mut IrContext, loc: Location, source: ValueRef, ty: TypeRef) -> Cast {
    let op = OperationDataBuilder::new(loc, Symbol::new("tensor"), Symbol::new("cast"))
        .operand(source)
        .result(ty)
        .create(ctx);
    Cast(op)
}

pub fn dim(ctx: &mut IrContext, loc: Location, source: ValueRef, index: ValueRef) -> Dim {
    let index_ty = core::index(ctx);
    let op = OperationDataBuilder::new(loc, Symbol::new("tensor"), Symbol::new("dim"))
        .operands([source, index])
        .result(index_ty)
        .create(ctx);
    Dim(op)
}

/// Groups of source dimensions merged into (or split from) one dimension.
pub type Reassociation = SmallVec<[SmallVec<[i64; 4]>; 4]>;

pub fn reassociation_attr(reassociation: &Reassociation) -> Attribute {
    Attribute::List(
        reassociation
            .iter()
            .map(|group| Attribute::int_list(group.iter().copied()))
            .collect(),
    )
}

/// The `reassociation` attribute of a reshape op.
pub fn reassociation(ctx: &IrContext, op: crate::refs::OpRef) -> Option<Reassociation> {
    ctx.op(op)
        .attr("reassociation")?
        .as_list()?
        .iter()
        .map(Attribute::as_int_list)
        .collect()
}

fn reshape(
    ctx: &mut IrContext,
    loc: Location,
    name: &'static str,
    source: ValueRef,
    reassociation: &Reassociation,
    ty: TypeRef,
) -> crate::refs::OpRef {
    OperationDataBuilder::new(loc, Symbol::new("tensor"), Symbol::new(name))
        .operand(source)
        .attr("reassociation", reassociation_attr(reassociation))
        .result(ty)
        .create(ctx)
}

pub fn collapse_shape(
    ctx: &mut IrContext,
    loc: Location,
    source: ValueRef,
    reassociation: &Reassociation,
    ty: TypeRef,
) -> CollapseShape {
    CollapseShape(reshape(ctx, loc, "collapse_shape", source, reassociation, ty))
}

pub fn expand_shape(
    ctx: &mut IrContext,
    loc: Location,
    source: ValueRef,
    reassociation: &Reassociation,
    ty: TypeRef,
) -> ExpandShape {
    ExpandShape(reshape(ctx, loc, "expand_shape", source, reassociation, ty))
}

/// Shape obtained by collapsing `shape` along `reassociation`.
pub fn collapsed_shape(shape: &[i64], reassociation: &Reassociation) -> SmallVec<[i64; 4]> {
    reassociation
        .iter()
        .map(|group| {
            group.iter().try_fold(1i64, |acc, &d| {
                let size = *shape.get(d as usize)?;
                (size != DYNAMIC).then_some(acc * size)
            })
            .unwrap_or(DYNAMIC)
        })
        .collect()
}

pub fn pack(
    ctx: &mut IrContext,
    loc: Location,
    source: ValueRef,
    dest: ValueRef,
    inner_dims_pos: &[i64],
    inner_tiles: &[i64],
) -> Pack {
    let ty = ctx.value_ty(dest);
    let op = OperationDataBuilder::new(loc, Symbol::new("tensor"), Symbol::new("pack"))
        .operands([source, dest])
        .attr(
            "inner_dims_pos",
            Attribute::int_list(inner_dims_pos.iter().copied()),
        )
        .attr("inner_tiles", Attribute::int_list(inner_tiles.iter().copied()))
        .result(ty)
        .create(ctx);
    Pack(op)
}

impl Pack {
    pub fn source(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[0]
    }

    pub fn dest(self, ctx: &IrContext) -> ValueRef {
        ctx.op_operands(self.0)[1]
    }

    pub fn inner_dims_pos(self, ctx: &IrContext) -> SmallVec<[i64; 4]> {
        int_list_attr(ctx, self.0, "inner_dims_pos")
    }

    pub fn inner_tiles(self, ctx: &IrContext) -> SmallVec<[i64; 4]> {
        int_list_attr(ctx, self.0, "inner_tiles")
    }
}

/// Shape of `shape` packed with the given tiles: outer dims divided by their
/// tile, tiles appended. `None` if a tiled dim is dynamic or not divisible.
pub fn packed_shape(
    shape: &[i64],
    inner_dims_pos: &[i64],
    inner_tiles: &[i64],
) -> Option<SmallVec<[i64; 4]>> {
    let mut outer: SmallVec<[i64; 4]> = shape.into();
    for (&pos, &tile) in inner_dims_pos.iter().zip(inner_tiles) {
        let dim = outer.get_mut(pos as usize)?;
        if *dim == DYNAMIC || tile <= 0 || *dim % tile != 0 {
            return None;
        }
        *dim /= tile;
    }
    outer.extend_from_slice(inner_tiles);
    Some(outer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn collapsed_shape_multiplies_groups() {
        let reassociation: Reassociation = smallvec![smallvec![0, 1], smallvec![2]];
        assert_eq!(
            collapsed_shape(&[2, 3, 4], &reassociation).as_slice(),
            &[6, 4]
        );
        assert_eq!(
            collapsed_shape(&[2, DYNAMIC, 4], &reassociation).as_slice(),
            &[DYNAMIC, 4]
        );
    }

    #[test]
    fn packed_shape_tiles_dims() {
        assert_eq!(
            packed_shape(&[16, 8], &[0, 1], &[4, 2]).unwrap().as_slice(),
            &[4, 4, 4, 2]
        );
        assert_eq!(packed_shape(&[15, 8], &[0], &[4]), None);
        assert_eq!(packed_shape(&[DYNAMIC, 8], &[0], &[4]), None);
    }
}
