//! Dialect operation wrappers.
//!
//! Each module declares its typed wrappers with [`define_op!`](crate::define_op),
//! free-function builders that create detached operations, and the operation
//! property registrations (purity, isolation, loops).

pub mod affine;
pub mod arith;
pub mod core;
pub mod func;
pub mod linalg;
pub mod memref;
pub mod scf;
pub mod tensor;
pub mod vector;

use smallvec::SmallVec;

use crate::context::IrContext;
use crate::ir::Symbol;
use crate::refs::{OpRef, ValueRef};
use crate::shaped::DYNAMIC;
use crate::types::Attribute;

/// Integer list attribute of `op`, empty if absent.
pub(crate) fn int_list_attr(ctx: &IrContext, op: OpRef, key: &'static str) -> SmallVec<[i64; 4]> {
    ctx.op(op)
        .attr(key)
        .and_then(Attribute::as_int_list)
        .unwrap_or_default()
}

/// Either a compile-time constant or an SSA value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpFoldResult {
    Static(i64),
    Dynamic(ValueRef),
}

impl OpFoldResult {
    /// The constant this stands for, looking through `arith.constant`.
    pub fn constant(self, ctx: &IrContext) -> Option<i64> {
        match self {
            OpFoldResult::Static(v) => Some(v),
            OpFoldResult::Dynamic(v) => arith::const_int_value(ctx, v),
        }
    }
}

/// Offsets, sizes and strides of a slicing operation.
///
/// Stored on the operation as `static_offsets`, `static_sizes` and
/// `static_strides` attributes, where a [`DYNAMIC`] entry consumes the next
/// dynamic operand in order (all offsets, then sizes, then strides).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SliceParams {
    pub offsets: SmallVec<[OpFoldResult; 4]>,
    pub sizes: SmallVec<[OpFoldResult; 4]>,
    pub strides: SmallVec<[OpFoldResult; 4]>,
}

impl SliceParams {
    /// All-static parameters.
    pub fn from_static(
        offsets: impl IntoIterator<Item = i64>,
        sizes: impl IntoIterator<Item = i64>,
        strides: impl IntoIterator<Item = i64>,
    ) -> Self {
        Self {
            offsets: offsets.into_iter().map(OpFoldResult::Static).collect(),
            sizes: sizes.into_iter().map(OpFoldResult::Static).collect(),
            strides: strides.into_iter().map(OpFoldResult::Static).collect(),
        }
    }

    /// Decode the parameters of `op`, whose dynamic values start at
    /// operand `first_dynamic`.
    pub fn from_op(ctx: &IrContext, op: OpRef, first_dynamic: usize) -> Option<Self> {
        let operands = ctx.op_operands(op);
        let mut dynamic = operands.get(first_dynamic..)?.iter().copied();
        let mut decode = |key: &'static str| -> Option<SmallVec<[OpFoldResult; 4]>> {
            int_list_attr(ctx, op, key)
                .into_iter()
                .map(|v| {
                    if v == DYNAMIC {
                        dynamic.next().map(OpFoldResult::Dynamic)
                    } else {
                        Some(OpFoldResult::Static(v))
                    }
                })
                .collect()
        };
        let offsets = decode("static_offsets")?;
        let sizes = decode("static_sizes")?;
        let strides = decode("static_strides")?;
        Some(Self {
            offsets,
            sizes,
            strides,
        })
    }

    /// Split into the three static attributes and the dynamic operands.
    pub fn encode(&self) -> ([(Symbol, Attribute); 3], SmallVec<[ValueRef; 4]>) {
        let mut dynamic = SmallVec::new();
        let mut encode = |list: &[OpFoldResult]| {
            Attribute::int_list(list.iter().map(|entry| match *entry {
                OpFoldResult::Static(v) => v,
                OpFoldResult::Dynamic(v) => {
                    dynamic.push(v);
                    DYNAMIC
                }
            }))
        };
        let attrs = [
            (Symbol::new("static_offsets"), encode(&self.offsets)),
            (Symbol::new("static_sizes"), encode(&self.sizes)),
            (Symbol::new("static_strides"), encode(&self.strides)),
        ];
        (attrs, dynamic)
    }

    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    fn all_constant(
        ctx: &IrContext,
        list: &[OpFoldResult],
    ) -> Option<SmallVec<[i64; 4]>> {
        list.iter().map(|entry| entry.constant(ctx)).collect()
    }

    pub fn constant_offsets(&self, ctx: &IrContext) -> Option<SmallVec<[i64; 4]>> {
        Self::all_constant(ctx, &self.offsets)
    }

    pub fn constant_sizes(&self, ctx: &IrContext) -> Option<SmallVec<[i64; 4]>> {
        Self::all_constant(ctx, &self.sizes)
    }

    pub fn constant_strides(&self, ctx: &IrContext) -> Option<SmallVec<[i64; 4]>> {
        Self::all_constant(ctx, &self.strides)
    }

    /// Result shape: constant sizes, [`DYNAMIC`] for the others.
    pub fn result_shape(&self, ctx: &IrContext) -> SmallVec<[i64; 4]> {
        self.sizes
            .iter()
            .map(|s| s.constant(ctx).unwrap_or(DYNAMIC))
            .collect()
    }
}
