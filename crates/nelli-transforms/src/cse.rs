//! Common subexpression elimination.
//!
//! Pure, region-free operations are keyed by name, operands, attributes
//! and result types. A scope is opened per block; an operation may reuse an
//! equivalent one from its own block (earlier in it) or from an enclosing
//! block. Isolated-from-above operations start from an empty scope stack.

use std::collections::{BTreeMap, HashMap};

use smallvec::SmallVec;

use nelli_ir::dialect::func;
use nelli_ir::op_interface::{IsolatedFromAboveOps, PureOps};
use nelli_ir::walk::collect_typed_inclusive;
use nelli_ir::{
    Attribute, BlockRef, DialectOp, IrContext, OpRef, RegionRef, Symbol, TypeRef, ValueRef,
};

use crate::error::TransformResult;
use crate::transform_op::{READ_HANDLE_MODIFY_PAYLOAD, TransformEffect, TransformOp};

#[derive(Clone, PartialEq, Eq, Hash)]
struct OpKey {
    dialect: Symbol,
    name: Symbol,
    operands: SmallVec<[ValueRef; 4]>,
    attributes: BTreeMap<Symbol, Attribute>,
    result_types: SmallVec<[TypeRef; 2]>,
}

impl OpKey {
    fn of(ctx: &IrContext, op: OpRef) -> Option<Self> {
        let data = ctx.op(op);
        if !data.regions.is_empty()
            || !data.successors.is_empty()
            || ctx.op_results(op).is_empty()
            || !PureOps::is_pure(ctx, op)
        {
            return None;
        }
        Some(Self {
            dialect: data.dialect,
            name: data.name,
            operands: ctx.op_operands(op).into(),
            attributes: data.attributes.clone(),
            result_types: ctx.op_result_types(op).into(),
        })
    }
}

type Scope = HashMap<OpKey, OpRef>;

struct CseState {
    scopes: Vec<Scope>,
    erased: usize,
}

impl CseState {
    fn lookup(&self, key: &OpKey) -> Option<OpRef> {
        self.scopes.iter().rev().find_map(|scope| scope.get(key).copied())
    }

    fn region(&mut self, ctx: &mut IrContext, region: RegionRef) {
        let blocks = ctx.region(region).blocks.clone();
        for block in blocks {
            self.block(ctx, block);
        }
    }

    fn block(&mut self, ctx: &mut IrContext, block: BlockRef) {
        self.scopes.push(Scope::new());
        let ops = ctx.block(block).ops.clone();
        for op in ops {
            if let Some(key) = OpKey::of(ctx, op) {
                match self.lookup(&key) {
                    Some(existing) => {
                        let results: SmallVec<[ValueRef; 4]> = ctx.op_results(op).into();
                        for (i, old) in results.into_iter().enumerate() {
                            let new = ctx.op_result(existing, i as u32);
                            ctx.replace_all_uses(old, new);
                        }
                        ctx.erase_op(op);
                        self.erased += 1;
                    }
                    None => {
                        if let Some(scope) = self.scopes.last_mut() {
                            scope.insert(key, op);
                        }
                    }
                }
                continue;
            }
            let regions = ctx.op(op).regions.clone();
            if IsolatedFromAboveOps::is_isolated(ctx, op) {
                let outer = std::mem::take(&mut self.scopes);
                for region in regions {
                    self.region(ctx, region);
                }
                self.scopes = outer;
            } else {
                for region in regions {
                    self.region(ctx, region);
                }
            }
        }
        self.scopes.pop();
    }
}

/// Eliminate common subexpressions in `op`'s regions.
///
/// Returns the number of erased operations.
#[tracing::instrument(skip_all)]
pub fn eliminate_common_subexpressions(ctx: &mut IrContext, op: OpRef) -> usize {
    let mut cse = CseState {
        scopes: Vec::new(),
        erased: 0,
    };
    let regions = ctx.op(op).regions.clone();
    for region in regions {
        cse.region(ctx, region);
    }
    tracing::debug!(erased = cse.erased, "cse");
    cse.erased
}

/// Transform op running CSE on every function under the target.
pub struct Cse;

impl TransformOp for Cse {
    fn name(&self) -> &'static str {
        "cse"
    }

    fn effects(&self) -> &'static [TransformEffect] {
        READ_HANDLE_MODIFY_PAYLOAD
    }

    fn apply(&self, ctx: &mut IrContext, target: OpRef) -> TransformResult<OpRef> {
        for f in collect_typed_inclusive::<func::Func>(ctx, target) {
            eliminate_common_subexpressions(ctx, f.op_ref());
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nelli_ir::parser::parse_test_module;
    use nelli_ir::printer::print_module;

    #[test]
    fn merges_equivalent_ops_across_nesting() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.index, %1: core.i1) -> core.index {
    %2 = arith.constant {value = 1} : core.index
    %3 = arith.addi %0, %2 : core.index
    %4 = scf.if %1 : core.index {
      %5 = arith.constant {value = 1} : core.index
      %6 = arith.addi %0, %5 : core.index
      scf.yield %6
    } {
      %7 = arith.constant {value = 2} : core.index
      scf.yield %7
    }
    %8 = arith.constant {value = 2} : core.index
    %9 = arith.addi %4, %8 : core.index
    %10 = arith.addi %9, %3 : core.index
    func.return %10
  }
}
",
        );
        let root = m.op_ref();
        let erased = Cse.apply(&mut ctx, root).map(|_| ());
        assert!(erased.is_ok());
        insta::assert_snapshot!(print_module(&ctx, root), @r"
        core.module @m {
          func.func @f(%0: core.index, %1: core.i1) -> core.index {
            %2 = arith.constant {value = 1} : core.index
            %3 = arith.addi %0, %2 : core.index
            %4 = scf.if %1 : core.index {
              scf.yield %3
            } {
              %5 = arith.constant {value = 2} : core.index
              scf.yield %5
            }
            %6 = arith.constant {value = 2} : core.index
            %7 = arith.addi %4, %6 : core.index
            %8 = arith.addi %7, %3 : core.index
            func.return %8
          }
        }
        ");
    }

    #[test]
    fn sibling_regions_do_not_share() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.i1) -> core.index {
    %1 = scf.if %0 : core.index {
      %2 = arith.constant {value = 3} : core.index
      scf.yield %2
    } {
      %3 = arith.constant {value = 3} : core.index
      scf.yield %3
    }
    func.return %1
  }
}
",
        );
        let f = ctx.block(m.body(&ctx)).ops[0];
        assert_eq!(eliminate_common_subexpressions(&mut ctx, f), 0);
    }
}
