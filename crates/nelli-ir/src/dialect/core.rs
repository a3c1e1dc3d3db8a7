//! Core dialect: modules and builtin scalar types.

use crate::context::{IrContext, OperationDataBuilder};
use crate::ir::Symbol;
use crate::ops::DialectOp;
use crate::refs::{BlockRef, TypeRef};
use crate::types::{Attribute, Location, TypeDataBuilder};
use crate::{define_op, register_isolated_op};

define_op! {
    /// `core.module @name { ... }`
    pub struct Module = core.module;
}

register_isolated_op!(core.module);

/// Create an empty module with a single body block.
pub fn module(ctx: &mut IrContext, loc: Location, name: Symbol) -> Module {
    let (region, _) = ctx.create_single_block_region(loc, []);
    let op = OperationDataBuilder::new(loc, Symbol::new("core"), Symbol::new("module"))
        .attr("sym_name", Attribute::Symbol(name))
        .region(region)
        .create(ctx);
    Module(op)
}

impl Module {
    pub fn name(self, ctx: &IrContext) -> Option<Symbol> {
        ctx.op(self.op_ref())
            .attr("sym_name")
            .and_then(Attribute::as_symbol)
    }

    pub fn body(self, ctx: &IrContext) -> BlockRef {
        ctx.region(ctx.op(self.op_ref()).regions[0]).blocks[0]
    }
}

fn scalar(ctx: &mut IrContext, name: &'static str) -> TypeRef {
    ctx.types
        .intern(TypeDataBuilder::new(Symbol::new("core"), Symbol::new(name)).build())
}

pub fn i1(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "i1")
}

pub fn i32(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "i32")
}

pub fn i64(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "i64")
}

pub fn index(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "index")
}

pub fn f32(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "f32")
}

pub fn f64(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "f64")
}

pub fn nil(ctx: &mut IrContext) -> TypeRef {
    scalar(ctx, "nil")
}

/// `core.func(ret, params...)`
pub fn func_type(ctx: &mut IrContext, ret: TypeRef, params: &[TypeRef]) -> TypeRef {
    ctx.types.intern(
        TypeDataBuilder::new(Symbol::new("core"), Symbol::new("func"))
            .param(ret)
            .params(params.iter().copied())
            .build(),
    )
}

fn is_core(ctx: &IrContext, ty: TypeRef, names: &[&'static str]) -> bool {
    let data = ctx.types.get(ty);
    data.dialect == "core" && names.iter().any(|&n| data.name == n)
}

pub fn is_index(ctx: &IrContext, ty: TypeRef) -> bool {
    is_core(ctx, ty, &["index"])
}

/// Signless integer or index type.
pub fn is_integer_like(ctx: &IrContext, ty: TypeRef) -> bool {
    is_core(ctx, ty, &["i1", "i32", "i64", "index"])
}

pub fn is_float(ctx: &IrContext, ty: TypeRef) -> bool {
    is_core(ctx, ty, &["f32", "f64"])
}
