//! Scope and use-chain validation.
//!
//! 1. **Scope validation**: every operand must be visible at its user: a
//!    block argument or an earlier result in the user's block, or in a block
//!    enclosing it, without crossing an isolated-from-above operation.
//!    Values defined in sibling blocks of a multi-block region are accepted
//!    without dominance analysis.
//!
//! 2. **Use-chain consistency**: the use-chains stored in [`IrContext`] must
//!    exactly match the operands of the operations under the root.

use std::collections::HashSet;
use std::fmt;
use std::ops::ControlFlow;

use crate::context::IrContext;
use crate::op_interface::IsolatedFromAboveOps;
use crate::refs::{OpRef, ValueDef, ValueRef};
use crate::walk::{self, WalkAction};

/// An operand that is not visible where it is used.
pub struct ScopeError {
    /// Full name of the consuming operation.
    pub consumer_op: String,
    pub operand_index: usize,
    pub value_description: String,
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operand #{} of {} references {}, which is not in scope",
            self.operand_index, self.consumer_op, self.value_description,
        )
    }
}

impl fmt::Debug for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Describes a use-chain inconsistency.
pub struct UseChainError {
    pub message: String,
}

impl fmt::Display for UseChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for UseChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Result of validation.
#[derive(Default)]
pub struct ValidationResult {
    pub scope_errors: Vec<ScopeError>,
    pub use_chain_errors: Vec<UseChainError>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.scope_errors.is_empty() && self.use_chain_errors.is_empty()
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return write!(f, "validation passed");
        }
        if !self.scope_errors.is_empty() {
            writeln!(f, "{} scope error(s) found:", self.scope_errors.len())?;
            for err in &self.scope_errors {
                writeln!(f, "  - {err}")?;
            }
        }
        if !self.use_chain_errors.is_empty() {
            writeln!(
                f,
                "{} use-chain error(s) found:",
                self.use_chain_errors.len()
            )?;
            for err in &self.use_chain_errors {
                writeln!(f, "  - {err}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

fn describe_value(ctx: &IrContext, v: ValueRef) -> String {
    match ctx.value_def(v) {
        ValueDef::OpResult(op, idx) => match ctx.op(op).attr("sym_name") {
            Some(name) => format!("result #{idx} of {} ({name:?})", ctx.op(op).full_name()),
            None => format!("result #{idx} of {}", ctx.op(op).full_name()),
        },
        ValueDef::BlockArg(block, idx) => format!("block arg #{idx} of {block}"),
    }
}

fn position_in_block(ctx: &IrContext, op: OpRef) -> Option<usize> {
    let block = ctx.op(op).parent_block?;
    ctx.block(block).ops.iter().position(|&o| o == op)
}

/// Whether `v` may be used by `user`.
pub fn is_visible(ctx: &IrContext, v: ValueRef, user: OpRef) -> bool {
    let Some(def_block) = ctx.value_block(v) else {
        return false;
    };
    let def_region = ctx.block(def_block).parent_region;

    let mut current = user;
    loop {
        let Some(block) = ctx.op(current).parent_block else {
            return false;
        };
        if block == def_block {
            return match ctx.value_def(v) {
                ValueDef::BlockArg(..) => true,
                ValueDef::OpResult(def, _) => {
                    def != current && position_in_block(ctx, def) < position_in_block(ctx, current)
                }
            };
        }
        if def_region.is_some() && ctx.block(block).parent_region == def_region {
            return true;
        }
        match ctx.block_parent_op(block) {
            Some(parent) if !IsolatedFromAboveOps::is_isolated(ctx, parent) => current = parent,
            _ => return false,
        }
    }
}

/// Check that every operand under `root` is visible at its user.
pub fn validate_scopes(ctx: &IrContext, root: OpRef) -> ValidationResult {
    let mut errors = Vec::new();
    for op in walk::nested_ops(ctx, root) {
        for (i, &operand) in ctx.op_operands(op).iter().enumerate() {
            if !is_visible(ctx, operand, op) {
                errors.push(ScopeError {
                    consumer_op: ctx.op(op).full_name(),
                    operand_index: i,
                    value_description: describe_value(ctx, operand),
                });
            }
        }
    }
    ValidationResult {
        scope_errors: errors,
        use_chain_errors: vec![],
    }
}

/// Check that the use-chains match the actual operands, in both directions.
pub fn validate_use_chains(ctx: &IrContext, root: OpRef) -> ValidationResult {
    let mut errors = Vec::new();

    let mut actual_uses: HashSet<(ValueRef, OpRef, u32)> = HashSet::new();
    let mut defined: HashSet<ValueRef> = HashSet::new();
    let _ = walk::walk_op::<()>(ctx, root, &mut |op| {
        for (idx, &operand) in ctx.op_operands(op).iter().enumerate() {
            actual_uses.insert((operand, op, idx as u32));
        }
        defined.extend(ctx.op_results(op).iter().copied());
        for &region in &ctx.op(op).regions {
            for &block in &ctx.region(region).blocks {
                defined.extend(ctx.block_args(block).iter().copied());
            }
        }
        ControlFlow::Continue(WalkAction::Advance)
    });

    for &(val, op, idx) in &actual_uses {
        let found = ctx
            .uses(val)
            .iter()
            .any(|u| u.user == op && u.operand_index == idx);
        if !found {
            errors.push(UseChainError {
                message: format!(
                    "operand #{idx} of {} ({op}) uses {val} but no use-chain entry exists",
                    ctx.op(op).full_name(),
                ),
            });
        }
    }

    let under_root = |op: OpRef| op == root || ctx.is_proper_ancestor(root, op);
    defined.extend(actual_uses.iter().map(|&(v, _, _)| v));
    for &val in &defined {
        for u in ctx.uses(val) {
            // Uses from outside the root are not ours to judge.
            if !under_root(u.user) && ctx.op(u.user).parent_block.is_some() {
                continue;
            }
            if !actual_uses.contains(&(val, u.user, u.operand_index)) {
                errors.push(UseChainError {
                    message: format!(
                        "use-chain entry for {val} claims use by {} operand #{}, but no such operand exists",
                        u.user, u.operand_index,
                    ),
                });
            }
        }
    }

    ValidationResult {
        scope_errors: vec![],
        use_chain_errors: errors,
    }
}

/// Run both validations.
pub fn validate(ctx: &IrContext, root: OpRef) -> ValidationResult {
    ValidationResult {
        scope_errors: validate_scopes(ctx, root).scope_errors,
        use_chain_errors: validate_use_chains(ctx, root).use_chain_errors,
    }
}

/// Debug-only validation that panics on any error.
///
/// Only runs under `cfg!(debug_assertions)`; meant as a checkpoint after
/// transformations.
pub fn debug_assert_valid(ctx: &IrContext, root: OpRef, pass_name: &str) {
    if !cfg!(debug_assertions) {
        return;
    }
    let result = validate(ctx, root);
    if !result.is_ok() {
        panic!("IR validation failed after `{pass_name}`:\n{result}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationDataBuilder;
    use crate::dialect::core;
    use crate::ir::Symbol;
    use crate::ops::DialectOp;
    use crate::parser::parse_test_module;

    const VALID: &str = "core.module @m {
  func.func @f(%0: core.index) -> core.index {
    %1 = arith.constant {value = 1} : core.index
    %2 = scf.for %1, %0, %1, %0 : core.index {
      ^bb0(%3: core.index, %4: core.index):
        %5 = arith.addi %4, %3 : core.index
        scf.yield %5
    }
    func.return %2
  }
}
";

    fn ops_named(ctx: &IrContext, root: OpRef, dialect: &'static str, name: &'static str) -> Vec<OpRef> {
        walk::nested_ops(ctx, root)
            .into_iter()
            .filter(|&op| ctx.op(op).is(dialect, name))
            .collect()
    }

    #[test]
    fn parsed_ir_is_valid() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(&mut ctx, VALID);
        let result = validate(&ctx, m.op_ref());
        assert!(result.is_ok(), "{result}");
    }

    #[test]
    fn use_before_definition_is_reported() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(&mut ctx, VALID);
        let root = m.op_ref();
        let add = ops_named(&ctx, root, "arith", "addi")[0];
        let sum = ctx.op_result(add, 0);
        // The constant now uses a value defined later, deeper in the loop.
        let constant = ops_named(&ctx, root, "arith", "constant")[0];
        let loc = ctx.op(constant).location;
        let user = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("use"))
            .operand(sum)
            .create(&mut ctx);
        let entry = ctx.op(constant).parent_block.unwrap();
        ctx.insert_op_before(entry, constant, user);

        let result = validate_scopes(&ctx, root);
        assert_eq!(result.scope_errors.len(), 1);
        assert_eq!(result.scope_errors[0].consumer_op, "test.use");
    }

    #[test]
    fn isolation_boundary_hides_outer_values() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  %0 = arith.constant {value = 1} : core.index
  func.func @f() -> core.index {
    func.return %0
  }
}
",
        );
        let result = validate_scopes(&ctx, m.op_ref());
        assert_eq!(result.scope_errors.len(), 1);
        assert!(result.to_string().contains("func.return"));
    }

    #[test]
    fn stale_use_chain_is_reported() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(&mut ctx, VALID);
        let root = m.op_ref();
        assert!(validate_use_chains(&ctx, root).is_ok());

        let ret = ops_named(&ctx, root, "func", "return")[0];
        let index = core::index(&mut ctx);
        let loc = ctx.op(ret).location;
        // Detached op using a value under the root: not part of the tree,
        // so its use-chain entry has no matching operand.
        let arg = ctx.op_operands(ret)[0];
        let _detached = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("use"))
            .operand(arg)
            .result(index)
            .create(&mut ctx);
        let result = validate_use_chains(&ctx, root);
        assert_eq!(result.use_chain_errors.len(), 1, "{result}");
    }
}
