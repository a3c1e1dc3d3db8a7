//! Shaped types: tensors, memrefs and vectors.
//!
//! Shaped types are ordinary interned types whose single parameter is the
//! element type and whose `shape` attribute lists the dimensions. A
//! [`DYNAMIC`] entry marks a dimension only known at runtime:
//!
//! ```text
//! tensor.tensor(core.f32) {shape = [4, -1]}
//! memref.memref(core.f32) {offset = 2, shape = [2, 2], strides = [8, 1]}
//! vector.vector(core.f32) {shape = [1, 8]}
//! ```
//!
//! Memrefs may carry an explicit strided layout (`strides` and `offset`);
//! without one they use the contiguous row-major layout.

use smallvec::SmallVec;

use crate::context::IrContext;
use crate::ir::Symbol;
use crate::refs::TypeRef;
use crate::types::{Attribute, TypeDataBuilder, TypeInterner};

/// Marker for a dimension, stride or offset that is not statically known.
pub const DYNAMIC: i64 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Tensor,
    MemRef,
    Vector,
}

impl ShapeKind {
    fn names(self) -> (&'static str, &'static str) {
        match self {
            ShapeKind::Tensor => ("tensor", "tensor"),
            ShapeKind::MemRef => ("memref", "memref"),
            ShapeKind::Vector => ("vector", "vector"),
        }
    }
}

/// Explicit strided layout of a memref.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StridedLayout {
    pub offset: i64,
    pub strides: SmallVec<[i64; 4]>,
}

/// Decoded view of a shaped type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShapedType {
    pub kind: ShapeKind,
    pub element: TypeRef,
    pub shape: SmallVec<[i64; 4]>,
    pub layout: Option<StridedLayout>,
}

impl ShapedType {
    pub fn new(kind: ShapeKind, element: TypeRef, shape: impl IntoIterator<Item = i64>) -> Self {
        Self {
            kind,
            element,
            shape: shape.into_iter().collect(),
            layout: None,
        }
    }

    pub fn tensor(element: TypeRef, shape: impl IntoIterator<Item = i64>) -> Self {
        Self::new(ShapeKind::Tensor, element, shape)
    }

    pub fn memref(element: TypeRef, shape: impl IntoIterator<Item = i64>) -> Self {
        Self::new(ShapeKind::MemRef, element, shape)
    }

    pub fn vector(element: TypeRef, shape: impl IntoIterator<Item = i64>) -> Self {
        Self::new(ShapeKind::Vector, element, shape)
    }

    pub fn with_layout(mut self, offset: i64, strides: impl IntoIterator<Item = i64>) -> Self {
        self.layout = Some(StridedLayout {
            offset,
            strides: strides.into_iter().collect(),
        });
        self
    }

    pub fn with_shape(&self, shape: impl IntoIterator<Item = i64>) -> Self {
        Self {
            kind: self.kind,
            element: self.element,
            shape: shape.into_iter().collect(),
            layout: None,
        }
    }

    /// Decode `ty`, returning `None` if it is not a shaped type.
    pub fn from_type(types: &TypeInterner, ty: TypeRef) -> Option<Self> {
        let data = types.get(ty);
        let kind = [ShapeKind::Tensor, ShapeKind::MemRef, ShapeKind::Vector]
            .into_iter()
            .find(|k| {
                let (d, n) = k.names();
                data.dialect == d && data.name == n
            })?;
        let element = *data.params.first()?;
        let shape = data.attrs.get(&Symbol::new("shape"))?.as_int_list()?;
        let layout = match (
            data.attrs.get(&Symbol::new("strides")),
            data.attrs.get(&Symbol::new("offset")),
        ) {
            (Some(strides), Some(offset)) => Some(StridedLayout {
                offset: offset.as_i64()?,
                strides: strides.as_int_list()?,
            }),
            _ => None,
        };
        Some(Self {
            kind,
            element,
            shape,
            layout,
        })
    }

    /// Decode the type of a value in `ctx`.
    pub fn of(ctx: &IrContext, ty: TypeRef) -> Option<Self> {
        Self::from_type(&ctx.types, ty)
    }

    pub fn is_memref(ctx: &IrContext, ty: TypeRef) -> bool {
        matches!(Self::of(ctx, ty), Some(s) if s.kind == ShapeKind::MemRef)
    }

    pub fn is_tensor(ctx: &IrContext, ty: TypeRef) -> bool {
        matches!(Self::of(ctx, ty), Some(s) if s.kind == ShapeKind::Tensor)
    }

    pub fn intern(&self, types: &mut TypeInterner) -> TypeRef {
        let (dialect, name) = self.kind.names();
        let mut builder = TypeDataBuilder::new(Symbol::new(dialect), Symbol::new(name))
            .param(self.element)
            .attr("shape", Attribute::int_list(self.shape.iter().copied()));
        if let Some(layout) = &self.layout {
            builder = builder
                .attr("offset", Attribute::int(layout.offset))
                .attr("strides", Attribute::int_list(layout.strides.iter().copied()));
        }
        types.intern(builder.build())
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_dynamic_dim(&self, dim: usize) -> bool {
        self.shape[dim] == DYNAMIC
    }

    pub fn has_static_shape(&self) -> bool {
        self.shape.iter().all(|&d| d != DYNAMIC)
    }

    pub fn num_dynamic_dims(&self) -> usize {
        self.shape.iter().filter(|&&d| d == DYNAMIC).count()
    }

    /// Position of `dim` among the dynamic dimensions, i.e. the index of the
    /// size operand that provides it.
    pub fn dynamic_dim_index(&self, dim: usize) -> Option<usize> {
        if !self.is_dynamic_dim(dim) {
            return None;
        }
        Some(self.shape[..dim].iter().filter(|&&d| d == DYNAMIC).count())
    }

    pub fn num_elements(&self) -> Option<i64> {
        self.has_static_shape().then(|| self.shape.iter().product())
    }

    /// Strides and offset of the memref layout.
    ///
    /// Without an explicit layout the identity (row-major) strides are
    /// computed, which requires every dimension but the outermost to be static.
    pub fn strides_and_offset(&self) -> Option<(SmallVec<[i64; 4]>, i64)> {
        if let Some(layout) = &self.layout {
            return Some((layout.strides.clone(), layout.offset));
        }
        let mut strides: SmallVec<[i64; 4]> = SmallVec::from_elem(1, self.rank());
        let mut running = 1i64;
        for dim in (0..self.rank()).rev() {
            strides[dim] = running;
            if dim > 0 {
                let size = self.shape[dim];
                if size == DYNAMIC {
                    return None;
                }
                running *= size;
            }
        }
        Some((strides, 0))
    }

    /// Whether the layout is the plain row-major one.
    pub fn has_identity_layout(&self) -> bool {
        match &self.layout {
            None => true,
            Some(layout) => {
                let plain = self.with_shape(self.shape.iter().copied());
                layout.offset == 0
                    && plain
                        .strides_and_offset()
                        .is_some_and(|(strides, _)| strides == layout.strides)
            }
        }
    }

    /// Dimensions equal to 1 at the front of the shape.
    pub fn leading_unit_dims(&self) -> usize {
        self.shape.iter().take_while(|&&d| d == 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::core;

    #[test]
    fn roundtrip_through_interner() {
        let mut ctx = IrContext::new();
        let f32_ty = core::f32(&mut ctx);
        let shaped = ShapedType::memref(f32_ty, [4, DYNAMIC]).with_layout(2, [8, 1]);
        let ty = shaped.intern(&mut ctx.types);
        assert_eq!(ShapedType::of(&ctx, ty), Some(shaped));
        assert!(ShapedType::is_memref(&ctx, ty));
        assert!(!ShapedType::is_tensor(&ctx, ty));
        assert_eq!(ShapedType::of(&ctx, f32_ty), None);
    }

    #[test]
    fn dynamic_dim_bookkeeping() {
        let mut ctx = IrContext::new();
        let f32_ty = core::f32(&mut ctx);
        let shaped = ShapedType::tensor(f32_ty, [DYNAMIC, 3, DYNAMIC]);
        assert_eq!(shaped.num_dynamic_dims(), 2);
        assert_eq!(shaped.dynamic_dim_index(0), Some(0));
        assert_eq!(shaped.dynamic_dim_index(1), None);
        assert_eq!(shaped.dynamic_dim_index(2), Some(1));
        assert_eq!(shaped.num_elements(), None);
        assert_eq!(shaped.with_shape([2, 3, 4]).num_elements(), Some(24));
    }

    #[test]
    fn identity_strides() {
        let mut ctx = IrContext::new();
        let f32_ty = core::f32(&mut ctx);
        let shaped = ShapedType::memref(f32_ty, [DYNAMIC, 3, 4]);
        let (strides, offset) = shaped.strides_and_offset().unwrap();
        assert_eq!(strides.as_slice(), &[12, 4, 1]);
        assert_eq!(offset, 0);
        assert!(shaped.has_identity_layout());
        assert!(!shaped.clone().with_layout(4, [12, 4, 1]).has_identity_layout());
        assert_eq!(
            ShapedType::memref(f32_ty, [3, DYNAMIC]).strides_and_offset(),
            None
        );
    }
}
