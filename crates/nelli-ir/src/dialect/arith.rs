//! Arith dialect: constants and scalar/elementwise arithmetic.

use crate::context::{IrContext, OperationDataBuilder};
use crate::dialect::core;
use crate::ir::Symbol;
use crate::ops::DialectOp;
use crate::refs::{OpRef, TypeRef, ValueRef};
use crate::shaped::ShapedType;
use crate::types::{Attribute, Location};
use crate::{define_op, register_pure_op};

define_op! {
    /// `arith.constant {value}`. A shaped result type makes it a splat.
    pub struct Constant = arith.constant;
    pub struct AddI = arith.addi;
    pub struct SubI = arith.subi;
    pub struct MulI = arith.muli;
    pub struct DivSI = arith.divsi;
    pub struct MinSI = arith.minsi;
    pub struct MinUI = arith.minui;
    pub struct MaxSI = arith.maxsi;
    pub struct AddF = arith.addf;
    pub struct SubF = arith.subf;
    pub struct MulF = arith.mulf;
    pub struct DivF = arith.divf;
    /// `arith.cmpi %lhs, %rhs {predicate = @slt}`
    pub struct CmpI = arith.cmpi;
    pub struct Select = arith.select;
    pub struct IndexCast = arith.index_cast;
}

register_pure_op!(
    arith.constant,
    arith.addi,
    arith.subi,
    arith.muli,
    arith.divsi,
    arith.minsi,
    arith.minui,
    arith.maxsi,
    arith.addf,
    arith.subf,
    arith.mulf,
    arith.divf,
    arith.cmpi,
    arith.select,
    arith.index_cast,
);

pub fn constant(ctx: &mut IrContext, loc: Location, ty: TypeRef, value: Attribute) -> Constant {
    let op = OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::new("constant"))
        .attr("value", value)
        .result(ty)
        .create(ctx);
    Constant(op)
}

pub fn constant_index(ctx: &mut IrContext, loc: Location, value: i64) -> Constant {
    let ty = core::index(ctx);
    constant(ctx, loc, ty, Attribute::int(value))
}

impl Constant {
    pub fn value(self, ctx: &IrContext) -> Option<&Attribute> {
        ctx.op(self.op_ref()).attr("value")
    }

    pub fn result(self, ctx: &IrContext) -> ValueRef {
        ctx.op_result(self.op_ref(), 0)
    }

    /// Whether this constant fills a shaped type with one value.
    pub fn is_splat(self, ctx: &IrContext) -> bool {
        ShapedType::of(ctx, ctx.op_result_types(self.op_ref())[0]).is_some()
    }
}

/// Scalar value of a non-splat constant.
fn scalar_constant(ctx: &IrContext, v: ValueRef) -> Option<&Attribute> {
    let constant = Constant::from_op(ctx, ctx.defining_op(v)?).ok()?;
    if constant.is_splat(ctx) {
        return None;
    }
    constant.value(ctx)
}

/// Integer value of `v` if it is defined by a scalar `arith.constant`.
pub fn const_int_value(ctx: &IrContext, v: ValueRef) -> Option<i64> {
    scalar_constant(ctx, v)?.as_i64()
}

/// Float value of `v` if it is defined by a scalar `arith.constant`.
pub fn const_float_value(ctx: &IrContext, v: ValueRef) -> Option<f64> {
    scalar_constant(ctx, v)?.as_f64()
}

/// Two-operand arithmetic operations with the result type of their operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    AddI,
    SubI,
    MulI,
    DivSI,
    MinSI,
    MinUI,
    MaxSI,
    AddF,
    SubF,
    MulF,
    DivF,
}

impl BinaryKind {
    pub const ALL: [BinaryKind; 11] = [
        BinaryKind::AddI,
        BinaryKind::SubI,
        BinaryKind::MulI,
        BinaryKind::DivSI,
        BinaryKind::MinSI,
        BinaryKind::MinUI,
        BinaryKind::MaxSI,
        BinaryKind::AddF,
        BinaryKind::SubF,
        BinaryKind::MulF,
        BinaryKind::DivF,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BinaryKind::AddI => "addi",
            BinaryKind::SubI => "subi",
            BinaryKind::MulI => "muli",
            BinaryKind::DivSI => "divsi",
            BinaryKind::MinSI => "minsi",
            BinaryKind::MinUI => "minui",
            BinaryKind::MaxSI => "maxsi",
            BinaryKind::AddF => "addf",
            BinaryKind::SubF => "subf",
            BinaryKind::MulF => "mulf",
            BinaryKind::DivF => "divf",
        }
    }

    pub fn of(ctx: &IrContext, op: OpRef) -> Option<Self> {
        let data = ctx.op(op);
        if !data.in_dialect("arith") {
            return None;
        }
        Self::ALL.into_iter().find(|k| data.name == k.name())
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            BinaryKind::AddF | BinaryKind::SubF | BinaryKind::MulF | BinaryKind::DivF
        )
    }

    /// Evaluate on integers with wrapping semantics. Division by zero and
    /// float kinds do not fold.
    pub fn fold_int(self, lhs: i64, rhs: i64) -> Option<i64> {
        match self {
            BinaryKind::AddI => Some(lhs.wrapping_add(rhs)),
            BinaryKind::SubI => Some(lhs.wrapping_sub(rhs)),
            BinaryKind::MulI => Some(lhs.wrapping_mul(rhs)),
            BinaryKind::DivSI => lhs.checked_div(rhs),
            BinaryKind::MinSI => Some(lhs.min(rhs)),
            BinaryKind::MinUI => Some((lhs as u64).min(rhs as u64) as i64),
            BinaryKind::MaxSI => Some(lhs.max(rhs)),
            _ => None,
        }
    }

    pub fn fold_float(self, lhs: f64, rhs: f64) -> Option<f64> {
        match self {
            BinaryKind::AddF => Some(lhs + rhs),
            BinaryKind::SubF => Some(lhs - rhs),
            BinaryKind::MulF => Some(lhs * rhs),
            BinaryKind::DivF => Some(lhs / rhs),
            _ => None,
        }
    }
}

/// Create a binary op whose result has the type of `lhs`.
pub fn binary(
    ctx: &mut IrContext,
    loc: Location,
    kind: BinaryKind,
    lhs: ValueRef,
    rhs: ValueRef,
) -> OpRef {
    let ty = ctx.value_ty(lhs);
    OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::from_dynamic(kind.name()))
        .operands([lhs, rhs])
        .result(ty)
        .create(ctx)
}

pub fn addi(ctx: &mut IrContext, loc: Location, lhs: ValueRef, rhs: ValueRef) -> AddI {
    AddI(binary(ctx, loc, BinaryKind::AddI, lhs, rhs))
}

pub fn muli(ctx: &mut IrContext, loc: Location, lhs: ValueRef, rhs: ValueRef) -> MulI {
    MulI(binary(ctx, loc, BinaryKind::MulI, lhs, rhs))
}

/// Comparison predicates of `arith.cmpi`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CmpPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CmpPredicate {
    const ALL: [CmpPredicate; 6] = [
        CmpPredicate::Eq,
        CmpPredicate::Ne,
        CmpPredicate::Slt,
        CmpPredicate::Sle,
        CmpPredicate::Sgt,
        CmpPredicate::Sge,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CmpPredicate::Eq => "eq",
            CmpPredicate::Ne => "ne",
            CmpPredicate::Slt => "slt",
            CmpPredicate::Sle => "sle",
            CmpPredicate::Sgt => "sgt",
            CmpPredicate::Sge => "sge",
        }
    }

    pub fn from_symbol(sym: Symbol) -> Option<Self> {
        Self::ALL.into_iter().find(|p| sym == p.name())
    }

    pub fn evaluate(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CmpPredicate::Eq => lhs == rhs,
            CmpPredicate::Ne => lhs != rhs,
            CmpPredicate::Slt => lhs < rhs,
            CmpPredicate::Sle => lhs <= rhs,
            CmpPredicate::Sgt => lhs > rhs,
            CmpPredicate::Sge => lhs >= rhs,
        }
    }
}

pub fn cmpi(
    ctx: &mut IrContext,
    loc: Location,
    predicate: CmpPredicate,
    lhs: ValueRef,
    rhs: ValueRef,
) -> CmpI {
    let i1 = core::i1(ctx);
    let op = OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::new("cmpi"))
        .operands([lhs, rhs])
        .attr(
            "predicate",
            Attribute::Symbol(Symbol::from_dynamic(predicate.name())),
        )
        .result(i1)
        .create(ctx);
    CmpI(op)
}

impl CmpI {
    pub fn predicate(self, ctx: &IrContext) -> Option<CmpPredicate> {
        ctx.op(self.op_ref())
            .attr("predicate")
            .and_then(Attribute::as_symbol)
            .and_then(CmpPredicate::from_symbol)
    }
}

pub fn select(
    ctx: &mut IrContext,
    loc: Location,
    cond: ValueRef,
    on_true: ValueRef,
    on_false: ValueRef,
) -> Select {
    let ty = ctx.value_ty(on_true);
    let op = OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::new("select"))
        .operands([cond, on_true, on_false])
        .result(ty)
        .create(ctx);
    Select(op)
}

pub fn index_cast(ctx: &mut IrContext, loc: Location, value: ValueRef, ty: TypeRef) -> IndexCast {
    let op = OperationDataBuilder::new(loc, Symbol::new("arith"), Symbol::new("index_cast"))
        .operand(value)
        .result(ty)
        .create(ctx);
    IndexCast(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Span;

    #[test]
    fn binary_kinds_fold() {
        assert_eq!(BinaryKind::AddI.fold_int(2, 3), Some(5));
        assert_eq!(BinaryKind::DivSI.fold_int(7, 0), None);
        assert_eq!(BinaryKind::MinUI.fold_int(-1, 4), Some(4));
        assert_eq!(BinaryKind::MinSI.fold_int(-1, 4), Some(-1));
        assert_eq!(BinaryKind::MulF.fold_float(1.5, 2.0), Some(3.0));
        assert_eq!(BinaryKind::AddF.fold_int(1, 2), None);
    }

    #[test]
    fn constants_are_recognized() {
        let mut ctx = IrContext::new();
        let path = ctx.paths.intern("test.mlir".to_owned());
        let loc = Location::new(path, Span::new(0, 0));
        let c = constant_index(&mut ctx, loc, -3);
        let v = c.result(&ctx);
        assert_eq!(const_int_value(&ctx, v), Some(-3));
        assert_eq!(const_float_value(&ctx, v), None);

        let sum = addi(&mut ctx, loc, v, v);
        assert_eq!(BinaryKind::of(&ctx, sum.op_ref()), Some(BinaryKind::AddI));
        assert_eq!(const_int_value(&ctx, ctx.op_result(sum.op_ref(), 0)), None);

        let cmp = cmpi(&mut ctx, loc, CmpPredicate::Slt, v, v);
        assert_eq!(cmp.predicate(&ctx), Some(CmpPredicate::Slt));
    }
}
