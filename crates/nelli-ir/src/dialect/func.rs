//! Func dialect: functions and returns.

use crate::context::{IrContext, OperationDataBuilder};
use crate::dialect::core;
use crate::ir::Symbol;
use crate::ops::DialectOp;
use crate::refs::{BlockRef, RegionRef, TypeRef, ValueRef};
use crate::types::{Attribute, Location};
use crate::{define_op, register_isolated_op};

define_op! {
    /// `func.func @name(%args...) -> ret { body }`
    pub struct Func = func.func;
    /// `func.return %values...`
    pub struct Return = func.return;
}

register_isolated_op!(func.func);

/// Create a function whose entry block takes `params`. The body is empty.
pub fn func(
    ctx: &mut IrContext,
    loc: Location,
    name: Symbol,
    params: &[TypeRef],
    ret: TypeRef,
) -> Func {
    let ty = core::func_type(ctx, ret, params);
    let (region, _) = ctx.create_single_block_region(loc, params.iter().copied());
    let op = OperationDataBuilder::new(loc, Symbol::new("func"), Symbol::new("func"))
        .attr("sym_name", Attribute::Symbol(name))
        .attr("type", Attribute::Type(ty))
        .region(region)
        .create(ctx);
    Func(op)
}

impl Func {
    pub fn sym_name(self, ctx: &IrContext) -> Option<Symbol> {
        ctx.op(self.op_ref())
            .attr("sym_name")
            .and_then(Attribute::as_symbol)
    }

    /// The `core.func` signature type.
    pub fn ty(self, ctx: &IrContext) -> Option<TypeRef> {
        ctx.op(self.op_ref()).attr("type").and_then(Attribute::as_type)
    }

    pub fn return_type(self, ctx: &IrContext) -> Option<TypeRef> {
        let ty = self.ty(ctx)?;
        ctx.types.get(ty).params.first().copied()
    }

    pub fn body(self, ctx: &IrContext) -> RegionRef {
        ctx.op(self.op_ref()).regions[0]
    }

    pub fn entry_block(self, ctx: &IrContext) -> BlockRef {
        ctx.region(self.body(ctx)).blocks[0]
    }

    pub fn args(self, ctx: &IrContext) -> &[ValueRef] {
        ctx.block_args(self.entry_block(ctx))
    }
}

pub fn r#return(ctx: &mut IrContext, loc: Location, values: &[ValueRef]) -> Return {
    let op = OperationDataBuilder::new(loc, Symbol::new("func"), Symbol::new("return"))
        .operands(values.iter().copied())
        .create(ctx);
    Return(op)
}

impl Return {
    pub fn values(self, ctx: &IrContext) -> &[ValueRef] {
        ctx.op_operands(self.op_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Span;
    use crate::printer::print_op;

    #[test]
    fn build_function_and_return() {
        let mut ctx = IrContext::new();
        let path = ctx.paths.intern("test.mlir".to_owned());
        let loc = Location::new(path, Span::new(0, 0));
        let idx = core::index(&mut ctx);

        let f = func(&mut ctx, loc, Symbol::new("id"), &[idx], idx);
        let entry = f.entry_block(&ctx);
        let arg = f.args(&ctx)[0];
        let ret = r#return(&mut ctx, loc, &[arg]);
        ctx.push_op(entry, ret.op_ref());

        assert_eq!(f.sym_name(&ctx), Some(Symbol::new("id")));
        assert_eq!(f.return_type(&ctx), Some(idx));
        assert_eq!(ret.values(&ctx), &[arg]);
        assert_eq!(
            print_op(&ctx, f.op_ref()),
            "func.func @id(%0: core.index) -> core.index {\n  func.return %0\n}\n"
        );
    }
}
