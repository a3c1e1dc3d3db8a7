//! Greedy pattern driver.
//!
//! Every iteration re-walks the operations nested under the root in
//! pre-order. Trivially dead side-effect-free operations are erased; every
//! other live operation gets the first pattern that matches it. Producers
//! left dead by an erasure or a rewrite are erased in the same pass, so a
//! dead chain costs one iteration whatever its length. Iteration stops at
//! the first pass without changes (the fixpoint) or after `max_iterations`
//! passes.

use smallvec::SmallVec;

use super::pattern::RewritePattern;
use super::rewriter::{self, PatternRewriter};
use crate::context::IrContext;
use crate::op_interface::PureOps;
use crate::refs::OpRef;
use crate::walk;

/// Configuration for the greedy driver.
#[derive(Debug, Clone, Copy)]
pub struct GreedyConfig {
    /// Maximum number of full passes over the IR.
    pub max_iterations: usize,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

/// Result of applying rewrite patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyResult {
    /// Number of iterations performed.
    pub iterations: usize,
    /// Total number of changes (pattern applications and dead-op erasures).
    pub total_changes: usize,
    /// Whether the last iteration made no changes.
    pub reached_fixpoint: bool,
}

/// Applies rewrite patterns greedily until a fixpoint.
pub struct PatternApplicator {
    patterns: Vec<Box<dyn RewritePattern>>,
    config: GreedyConfig,
}

impl Default for PatternApplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternApplicator {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            config: GreedyConfig::default(),
        }
    }

    /// Add a rewrite pattern. Patterns are tried in insertion order.
    pub fn add_pattern(mut self, pattern: impl RewritePattern + 'static) -> Self {
        self.patterns.push(Box::new(pattern));
        self
    }

    /// Add an already boxed pattern.
    pub fn add_boxed(mut self, pattern: Box<dyn RewritePattern>) -> Self {
        self.patterns.push(pattern);
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.config.max_iterations = n;
        self
    }

    pub fn with_config(mut self, config: GreedyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn num_patterns(&self) -> usize {
        self.patterns.len()
    }

    /// Apply the patterns to every operation nested under `root` (excluding
    /// `root` itself).
    pub fn apply_greedily(&self, ctx: &mut IrContext, root: OpRef) -> ApplyResult {
        let mut total_changes = 0;
        let mut iterations = 0;

        while iterations < self.config.max_iterations {
            iterations += 1;
            let changes = self.run_one_iteration(ctx, root);
            tracing::trace!(iteration = iterations, changes, "greedy iteration");
            total_changes += changes;
            if changes == 0 {
                tracing::debug!(iterations, total_changes, "greedy driver converged");
                return ApplyResult {
                    iterations,
                    total_changes,
                    reached_fixpoint: true,
                };
            }
        }

        tracing::debug!(
            iterations,
            total_changes,
            "greedy driver stopped without convergence"
        );
        ApplyResult {
            iterations,
            total_changes,
            reached_fixpoint: false,
        }
    }

    fn run_one_iteration(&self, ctx: &mut IrContext, root: OpRef) -> usize {
        let mut changes = 0;

        for op in walk::nested_ops(ctx, root) {
            // Skip ops erased or detached earlier in this pass.
            if !is_live_under(ctx, root, op) {
                continue;
            }

            if PureOps::is_trivially_dead(ctx, op) {
                changes += erase_dead_chain(ctx, root, [op]);
                continue;
            }

            let producers = operand_producers(ctx, op);
            let applied = self.patterns.iter().any(|pattern| {
                let mut rw = PatternRewriter::new();
                if pattern.match_and_rewrite(ctx, op, &mut rw) && rw.has_mutations() {
                    tracing::trace!(pattern = pattern.name(), "pattern applied");
                    rewriter::apply_mutations(ctx, op, rw.take_mutations());
                    true
                } else {
                    false
                }
            });
            if applied {
                changes += 1 + erase_dead_chain(ctx, root, producers);
            }
        }

        changes
    }
}

fn is_live_under(ctx: &IrContext, root: OpRef, op: OpRef) -> bool {
    ctx.op(op).parent_block.is_some() && ctx.is_proper_ancestor(root, op)
}

fn operand_producers(ctx: &IrContext, op: OpRef) -> SmallVec<[OpRef; 4]> {
    ctx.op_operands(op)
        .iter()
        .filter_map(|&v| ctx.defining_op(v))
        .collect()
}

/// Erase every trivially dead op among `candidates`, then the producers
/// each erasure leaves dead. Returns the number of erased ops.
fn erase_dead_chain(
    ctx: &mut IrContext,
    root: OpRef,
    candidates: impl IntoIterator<Item = OpRef>,
) -> usize {
    let mut worklist: Vec<OpRef> = candidates.into_iter().collect();
    let mut erased = 0;
    while let Some(op) = worklist.pop() {
        if !is_live_under(ctx, root, op) || !PureOps::is_trivially_dead(ctx, op) {
            continue;
        }
        worklist.extend(operand_producers(ctx, op));
        tracing::trace!(op = %ctx.op(op).full_name(), "erasing dead op");
        ctx.erase_op(op);
        erased += 1;
    }
    erased
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OperationDataBuilder;
    use crate::ir::Symbol;
    use crate::ops::DialectOp;
    use crate::parser::parse_test_module;
    use crate::printer::print_module;

    /// test.source -> test.target
    struct RenamePattern;

    impl RewritePattern for RenamePattern {
        fn match_and_rewrite(
            &self,
            ctx: &mut IrContext,
            op: OpRef,
            rewriter: &mut PatternRewriter,
        ) -> bool {
            let data = ctx.op(op);
            if !data.is("test", "source") {
                return false;
            }
            let loc = data.location;
            let result_types = ctx.op_result_types(op).to_vec();
            let new_op = OperationDataBuilder::new(loc, Symbol::new("test"), Symbol::new("target"))
                .results(result_types)
                .create(ctx);
            rewriter.replace_op(new_op);
            true
        }
    }

    /// Flips a boolean attribute forever.
    struct Flip;

    impl RewritePattern for Flip {
        fn match_and_rewrite(
            &self,
            ctx: &mut IrContext,
            op: OpRef,
            rewriter: &mut PatternRewriter,
        ) -> bool {
            let Some(flag) = ctx.op(op).attr("flag").and_then(|a| a.as_bool()) else {
                return false;
            };
            ctx.op_mut(op)
                .attributes
                .insert(Symbol::new("flag"), (!flag).into());
            rewriter.modified_in_place();
            true
        }
    }

    #[test]
    fn renames_and_preserves_uses() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {\n  %0 = test.source : core.index\n  test.use %0\n}\n",
        );
        let result = PatternApplicator::new()
            .add_pattern(RenamePattern)
            .apply_greedily(&mut ctx, m.op_ref());
        assert!(result.reached_fixpoint);
        assert_eq!(result.total_changes, 1);
        assert_eq!(result.iterations, 2);
        insta::assert_snapshot!(print_module(&ctx, m.op_ref()), @r"
        core.module @m {
          %0 = test.target : core.index
          test.use %0
        }
        ");
    }

    #[test]
    fn erases_dead_pure_ops_and_nested_ops() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.index) -> core.index {
    %1 = arith.constant {value = 1} : core.index
    %2 = arith.addi %0, %1 : core.index
    %3 = arith.muli %2, %2 : core.index
    func.return %0
  }
}
",
        );
        let result = PatternApplicator::new().apply_greedily(&mut ctx, m.op_ref());
        assert!(result.reached_fixpoint);
        // muli, then the addi and constant it leaves dead
        assert_eq!(result.total_changes, 3);
        assert_eq!(result.iterations, 2);
        insta::assert_snapshot!(print_module(&ctx, m.op_ref()), @r"
        core.module @m {
          func.func @f(%0: core.index) -> core.index {
            func.return %0
          }
        }
        ");
        assert!(crate::validation::validate(&ctx, m.op_ref()).is_ok());
    }

    #[test]
    fn dead_chain_longer_than_the_cap_converges() {
        let mut text = String::from(
            "core.module @m {\n  func.func @f(%0: core.index) -> core.index {\n",
        );
        for i in 1..=12 {
            text.push_str(&format!(
                "    %{i} = arith.addi %{}, %0 : core.index\n",
                i - 1
            ));
        }
        text.push_str("    func.return %0\n  }\n}\n");

        let mut ctx = IrContext::new();
        let m = parse_test_module(&mut ctx, &text);
        let result = PatternApplicator::new()
            .with_max_iterations(3)
            .apply_greedily(&mut ctx, m.op_ref());
        assert!(result.reached_fixpoint);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.total_changes, 12);
        insta::assert_snapshot!(print_module(&ctx, m.op_ref()), @r"
        core.module @m {
          func.func @f(%0: core.index) -> core.index {
            func.return %0
          }
        }
        ");
    }

    /// test.wrap(x) -> x
    struct Unwrap;

    impl RewritePattern for Unwrap {
        fn match_and_rewrite(
            &self,
            ctx: &mut IrContext,
            op: OpRef,
            rewriter: &mut PatternRewriter,
        ) -> bool {
            if !ctx.op(op).is("test", "wrap") {
                return false;
            }
            let inner = ctx.op_operands(op)[0];
            rewriter.erase_op(vec![inner]);
            true
        }
    }

    #[test]
    fn rewrites_release_their_operand_chains() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {
  func.func @f(%0: core.index) -> core.index {
    %1 = arith.addi %0, %0 : core.index
    %2 = arith.muli %1, %1 : core.index
    %3 = test.wrap %2 : core.index
    func.return %0
  }
}
",
        );
        let result = PatternApplicator::new()
            .add_pattern(Unwrap)
            .apply_greedily(&mut ctx, m.op_ref());
        assert!(result.reached_fixpoint);
        assert_eq!(result.iterations, 2);
        insta::assert_snapshot!(print_module(&ctx, m.op_ref()), @r"
        core.module @m {
          func.func @f(%0: core.index) -> core.index {
            func.return %0
          }
        }
        ");
    }

    #[test]
    fn stops_at_iteration_limit() {
        let mut ctx = IrContext::new();
        let m = parse_test_module(
            &mut ctx,
            "core.module @m {\n  test.op {flag = true}\n}\n",
        );
        let result = PatternApplicator::new()
            .add_pattern(Flip)
            .with_max_iterations(4)
            .apply_greedily(&mut ctx, m.op_ref());
        assert!(!result.reached_fixpoint);
        assert_eq!(result.iterations, 4);
        assert_eq!(result.total_changes, 4);
    }
}
