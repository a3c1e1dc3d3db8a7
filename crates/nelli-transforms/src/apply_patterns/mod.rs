//! Greedy rewriting with a configurable set of rule groups.
//!
//! [`ApplyPatternsOptions`] selects which [`PatternGroup`]s contribute
//! rules. The rule set is built once from a declarative table, run to a
//! fixpoint by the greedy driver, and optionally followed by
//! loop-invariant code motion over every function in the target.

mod canonicalize;
mod groups;
mod linalg_rules;
mod memref_rules;
mod tensor_rules;
mod tiling;
mod vector_rules;

pub use groups::{PatternGroup, UnknownPatternGroup};

use nelli_ir::dialect::func;
use nelli_ir::op_interface::IsolatedFromAboveOps;
use nelli_ir::rewrite::{GreedyConfig, PatternApplicator};
use nelli_ir::validation::debug_assert_valid;
use nelli_ir::walk::{collect_typed_inclusive, nested_ops};
use nelli_ir::{DialectOp, IrContext, OpRef};

use crate::error::{TransformError, TransformResult};
use crate::fusion::FusionConfig;
use crate::licm::licm_functions;
use crate::transform_op::{READ_HANDLE_MODIFY_PAYLOAD, TransformEffect, TransformOp};

/// Options for [`apply_patterns`].
///
/// Every rule group is off by default. `licm`, `cse` and
/// `swap_padding_elide_conditional` tune the run without adding rules.
#[derive(Debug, Clone)]
pub struct ApplyPatternsOptions {
    pub additional_patterns: bool,
    pub bubble_collapse: bool,
    pub bubble_expand: bool,
    pub bubble_pack_unpack: bool,
    pub canonicalization: bool,
    pub erase_unnecessary_tensor_operands: bool,
    pub expand_memref_strided_metadata: bool,
    pub fold_memref_aliases: bool,
    pub fold_reassociative_reshapes: bool,
    pub fold_tensor_empty_extract: bool,
    pub linalg_elementwise_greedy_fusion: bool,
    pub lower_transfer_op_permutations: bool,
    pub lower_vector_masks: bool,
    pub rank_reducing_vector: bool,
    pub swapping_patterns: bool,
    pub tiling_canonicalization: bool,
    /// Hoist loop invariants after the rewrite converges.
    pub licm: bool,
    /// Walk the functions for CSE after the rewrite. Nothing is eliminated.
    pub cse: bool,
    /// Leave slices lying entirely in padding alone instead of turning them
    /// into `tensor.generate`.
    pub swap_padding_elide_conditional: bool,
    /// Greedy driver iteration cap. Default: 10.
    pub max_iterations: usize,
    pub fusion: FusionConfig,
}

impl Default for ApplyPatternsOptions {
    fn default() -> Self {
        Self {
            additional_patterns: false,
            bubble_collapse: false,
            bubble_expand: false,
            bubble_pack_unpack: false,
            canonicalization: false,
            erase_unnecessary_tensor_operands: false,
            expand_memref_strided_metadata: false,
            fold_memref_aliases: false,
            fold_reassociative_reshapes: false,
            fold_tensor_empty_extract: false,
            linalg_elementwise_greedy_fusion: false,
            lower_transfer_op_permutations: false,
            lower_vector_masks: false,
            rank_reducing_vector: false,
            swapping_patterns: false,
            tiling_canonicalization: false,
            licm: false,
            cse: false,
            swap_padding_elide_conditional: false,
            max_iterations: GreedyConfig::default().max_iterations,
            fusion: FusionConfig::default(),
        }
    }
}

impl ApplyPatternsOptions {
    fn flag_mut(&mut self, group: PatternGroup) -> &mut bool {
        match group {
            PatternGroup::AdditionalPatterns => &mut self.additional_patterns,
            PatternGroup::BubbleCollapse => &mut self.bubble_collapse,
            PatternGroup::BubbleExpand => &mut self.bubble_expand,
            PatternGroup::BubblePackUnpack => &mut self.bubble_pack_unpack,
            PatternGroup::Canonicalization => &mut self.canonicalization,
            PatternGroup::EraseUnnecessaryTensorOperands => {
                &mut self.erase_unnecessary_tensor_operands
            }
            PatternGroup::ExpandMemrefStridedMetadata => &mut self.expand_memref_strided_metadata,
            PatternGroup::FoldMemrefAliases => &mut self.fold_memref_aliases,
            PatternGroup::FoldReassociativeReshapes => &mut self.fold_reassociative_reshapes,
            PatternGroup::FoldTensorEmptyExtract => &mut self.fold_tensor_empty_extract,
            PatternGroup::LinalgElementwiseGreedyFusion => {
                &mut self.linalg_elementwise_greedy_fusion
            }
            PatternGroup::LowerTransferOpPermutations => &mut self.lower_transfer_op_permutations,
            PatternGroup::LowerVectorMasks => &mut self.lower_vector_masks,
            PatternGroup::RankReducingVector => &mut self.rank_reducing_vector,
            PatternGroup::SwappingPatterns => &mut self.swapping_patterns,
            PatternGroup::TilingCanonicalization => &mut self.tiling_canonicalization,
        }
    }

    pub fn enable(&mut self, group: PatternGroup) {
        *self.flag_mut(group) = true;
    }

    pub fn with_group(mut self, group: PatternGroup) -> Self {
        self.enable(group);
        self
    }

    pub fn is_enabled(&self, group: PatternGroup) -> bool {
        match group {
            PatternGroup::AdditionalPatterns => self.additional_patterns,
            PatternGroup::BubbleCollapse => self.bubble_collapse,
            PatternGroup::BubbleExpand => self.bubble_expand,
            PatternGroup::BubblePackUnpack => self.bubble_pack_unpack,
            PatternGroup::Canonicalization => self.canonicalization,
            PatternGroup::EraseUnnecessaryTensorOperands => self.erase_unnecessary_tensor_operands,
            PatternGroup::ExpandMemrefStridedMetadata => self.expand_memref_strided_metadata,
            PatternGroup::FoldMemrefAliases => self.fold_memref_aliases,
            PatternGroup::FoldReassociativeReshapes => self.fold_reassociative_reshapes,
            PatternGroup::FoldTensorEmptyExtract => self.fold_tensor_empty_extract,
            PatternGroup::LinalgElementwiseGreedyFusion => self.linalg_elementwise_greedy_fusion,
            PatternGroup::LowerTransferOpPermutations => self.lower_transfer_op_permutations,
            PatternGroup::LowerVectorMasks => self.lower_vector_masks,
            PatternGroup::RankReducingVector => self.rank_reducing_vector,
            PatternGroup::SwappingPatterns => self.swapping_patterns,
            PatternGroup::TilingCanonicalization => self.tiling_canonicalization,
        }
    }

    pub fn enabled_groups(&self) -> impl Iterator<Item = PatternGroup> + '_ {
        PatternGroup::ALL
            .into_iter()
            .filter(|&group| self.is_enabled(group))
    }
}

/// Rewrite the IR under `target` with the rules of every enabled group
/// until nothing changes, then run the requested cleanups.
///
/// `target` must be isolated from above. A non-isolated target, or a run
/// that does not converge within `max_iterations`, is a definite failure;
/// the former leaves the IR untouched. Returns `target`.
#[tracing::instrument(skip_all, fields(target = %ctx.op(target).full_name()))]
pub fn apply_patterns(
    ctx: &mut IrContext,
    target: OpRef,
    options: &ApplyPatternsOptions,
) -> TransformResult<OpRef> {
    if !IsolatedFromAboveOps::is_isolated(ctx, target) {
        return Err(TransformError::not_isolated(ctx.op(target).full_name()));
    }

    let applicator = groups::rule_set(options).into_iter().fold(
        PatternApplicator::new().with_config(GreedyConfig {
            max_iterations: options.max_iterations,
        }),
        PatternApplicator::add_boxed,
    );
    tracing::debug!(
        rules = applicator.num_patterns(),
        groups = ?options.enabled_groups().collect::<Vec<_>>(),
        "built rule set"
    );
    let result = applicator.apply_greedily(ctx, target);
    if !result.reached_fixpoint {
        return Err(TransformError::greedy_patterns_failed(result.iterations));
    }
    tracing::debug!(
        iterations = result.iterations,
        changes = result.total_changes,
        "greedy rewrite converged"
    );

    if options.licm {
        licm_functions(ctx, target);
    }
    debug_assert_valid(ctx, target, "apply_patterns");
    if options.cse {
        // Walk only; nothing is eliminated.
        for f in collect_typed_inclusive::<func::Func>(ctx, target) {
            let ops = nested_ops(ctx, f.op_ref()).len();
            tracing::trace!(func = ?f.op_ref(), ops, "cse walk");
        }
    }
    Ok(target)
}

/// Transform op running [`apply_patterns`] on its target.
#[derive(Debug, Clone, Default)]
pub struct ApplyPatterns {
    pub options: ApplyPatternsOptions,
}

impl TransformOp for ApplyPatterns {
    fn name(&self) -> &'static str {
        "apply_patterns"
    }

    fn effects(&self) -> &'static [TransformEffect] {
        READ_HANDLE_MODIFY_PAYLOAD
    }

    fn apply(&self, ctx: &mut IrContext, target: OpRef) -> TransformResult<OpRef> {
        apply_patterns(ctx, target, &self.options)
    }
}
