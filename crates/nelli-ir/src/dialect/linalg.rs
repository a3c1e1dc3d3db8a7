//! Linalg dialect: structured computations in destination-passing style.
//!
//! Every structured op carries `num_inputs`; its operands are the inputs
//! followed by the inits (the destinations). On tensors, each init is tied
//! to one result.

use smallvec::SmallVec;

use crate::context::{IrContext, OperationDataBuilder};
use crate::define_op;
use crate::ir::Symbol;
use crate::ops::DialectOp;
use crate::refs::{BlockRef, OpRef, TypeRef, ValueRef};
use crate::shaped::{ShapeKind, ShapedType};
use crate::types::{Attribute, Location};

define_op! {
    /// `linalg.generic %inputs..., %inits... {iterator_types, num_inputs}`
    /// with a body taking one element per operand and ending in `linalg.yield`.
    /// Indexing maps are implicitly the identity.
    pub struct Generic = linalg.generic;
    pub struct Yield = linalg.yield;
    pub struct Fill = linalg.fill;
    pub struct Matmul = linalg.matmul;
    pub struct CopyOp = linalg.copy;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IteratorType {
    Parallel,
    Reduction,
}

impl IteratorType {
    pub fn name(self) -> &'static str {
        match self {
            IteratorType::Parallel => "parallel",
            IteratorType::Reduction => "reduction",
        }
    }

    fn from_attr(attr: &Attribute) -> Option<Self> {
        let sym = attr.as_symbol()?;
        if sym == "parallel" {
            Some(IteratorType::Parallel)
        } else if sym == "reduction" {
            Some(IteratorType::Reduction)
        } else {
            None
        }
    }
}

/// Whether `op` is a structured linalg operation.
pub fn is_structured(ctx: &IrContext, op: OpRef) -> bool {
    let data = ctx.op(op);
    data.in_dialect("linalg") && data.attr("num_inputs").is_some()
}

fn num_inputs(ctx: &IrContext, op: OpRef) -> usize {
    ctx.op(op)
        .attr("num_inputs")
        .and_then(Attribute::as_i64)
        .map_or(0, |n| n as usize)
        .min(ctx.op_operands(op).len())
}

/// Input operands of a structured op.
pub fn inputs(ctx: &IrContext, op: OpRef) -> &[ValueRef] {
    &ctx.op_operands(op)[..num_inputs(ctx, op)]
}

/// Init (destination) operands of a structured op.
pub fn inits(ctx: &IrContext, op: OpRef) -> &[ValueRef] {
    &ctx.op_operands(op)[num_inputs(ctx, op)..]
}

fn element_type(ctx: &IrContext, ty: TypeRef) -> TypeRef {
    ShapedType::of(ctx, ty).map_or(ty, |s| s.element)
}

/// Result types of a structured op: the tensor-typed inits.
fn tensor_results(ctx: &IrContext, inits: &[ValueRef]) -> SmallVec<[TypeRef; 2]> {
    inits
        .iter()
        .map(|&v| ctx.value_ty(v))
        .filter(|&ty| ShapedType::is_tensor(ctx, ty))
        .collect()
}

fn structured(
    ctx: &IrContext,
    loc: Location,
    name: &'static str,
    inputs: &[ValueRef],
    inits: &[ValueRef],
) -> OperationDataBuilder {
    let results = tensor_results(ctx, inits);
    OperationDataBuilder::new(loc, Symbol::new("linalg"), Symbol::new(name))
        .operands(inputs.iter().copied())
        .operands(inits.iter().copied())
        .attr("num_inputs", Attribute::int(inputs.len() as i64))
        .results(results)
}

/// Create a generic op with an empty body block; the caller fills it and
/// terminates it with [`r#yield`].
pub fn generic(
    ctx: &mut IrContext,
    loc: Location,
    inputs: &[ValueRef],
    inits: &[ValueRef],
    iterator_types: &[IteratorType],
) -> Generic {
    let arg_tys: SmallVec<[TypeRef; 4]> = inputs
        .iter()
        .chain(inits)
        .map(|&v| element_type(ctx, ctx.value_ty(v)))
        .collect();
    let (region, _) = ctx.create_single_block_region(loc, arg_tys);
    let iterators = Attribute::List(
        iterator_types
            .iter()
            .map(|it| Attribute::Symbol(Symbol::from_dynamic(it.name())))
            .collect(),
    );
    let op = structured(ctx, loc, "generic", inputs, inits)
        .attr("iterator_types", iterators)
        .region(region)
        .create(ctx);
    Generic(op)
}

impl Generic {
    pub fn inputs(self, ctx: &IrContext) -> &[ValueRef] {
        inputs(ctx, self.0)
    }

    pub fn inits(self, ctx: &IrContext) -> &[ValueRef] {
        inits(ctx, self.0)
    }

    pub fn body(self, ctx: &IrContext) -> BlockRef {
        ctx.region(ctx.op(self.0).regions[0]).blocks[0]
    }

    pub fn iterator_types(self, ctx: &IrContext) -> SmallVec<[IteratorType; 4]> {
        ctx.op(self.0)
            .attr("iterator_types")
            .and_then(Attribute::as_list)
            .map(|list| list.iter().filter_map(IteratorType::from_attr).collect())
            .unwrap_or_default()
    }

    pub fn yield_op(self, ctx: &IrContext) -> Option<Yield> {
        let term = ctx.block_terminator(self.body(ctx))?;
        Yield::from_op(ctx, term).ok()
    }

    /// All loops parallel and every operand a tensor of one common shape.
    pub fn is_elementwise(self, ctx: &IrContext) -> bool {
        let iterators = self.iterator_types(ctx);
        if iterators.iter().any(|&it| it != IteratorType::Parallel) {
            return false;
        }
        let mut shape = None;
        ctx.op_operands(self.0).iter().all(|&v| {
            let Some(shaped) = ShapedType::of(ctx, ctx.value_ty(v)) else {
                return false;
            };
            if shaped.kind != ShapeKind::Tensor || shaped.rank() != iterators.len() {
                return false;
            }
            match &shape {
                None => {
                    shape = Some(shaped.shape);
                    true
                }
                Some(s) => *s == shaped.shape,
            }
        })
    }
}

pub fn r#yield(ctx: &mut IrContext, loc: Location, values: &[ValueRef]) -> Yield {
    let op = OperationDataBuilder::new(loc, Symbol::new("linalg"), Symbol::new("yield"))
        .operands(values.iter().copied())
        .create(ctx);
    Yield(op)
}

impl Yield {
    pub fn values(self, ctx: &IrContext) -> &[ValueRef] {
        ctx.op_operands(self.0)
    }
}

pub fn fill(ctx: &mut IrContext, loc: Location, value: ValueRef, init: ValueRef) -> Fill {
    Fill(structured(ctx, loc, "fill", &[value], &[init]).create(ctx))
}

pub fn matmul(
    ctx: &mut IrContext,
    loc: Location,
    lhs: ValueRef,
    rhs: ValueRef,
    init: ValueRef,
) -> Matmul {
    Matmul(structured(ctx, loc, "matmul", &[lhs, rhs], &[init]).create(ctx))
}

pub fn copy(ctx: &mut IrContext, loc: Location, source: ValueRef, dest: ValueRef) -> CopyOp {
    CopyOp(structured(ctx, loc, "copy", &[source], &[dest]).create(ctx))
}
