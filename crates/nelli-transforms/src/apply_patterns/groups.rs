//! The rule groups `apply_patterns` can enable, and the table mapping each
//! group to the rules it contributes.

use std::str::FromStr;

use derive_more::{Display, Error};

use nelli_ir::rewrite::RewritePattern;

use super::{
    ApplyPatternsOptions, canonicalize, linalg_rules, memref_rules, tensor_rules, tiling,
    vector_rules,
};

/// An independently toggleable group of rewrite rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PatternGroup {
    #[display("additional-patterns")]
    AdditionalPatterns,
    #[display("bubble-collapse")]
    BubbleCollapse,
    #[display("bubble-expand")]
    BubbleExpand,
    #[display("bubble-pack-unpack")]
    BubblePackUnpack,
    #[display("canonicalization")]
    Canonicalization,
    #[display("erase-unnecessary-tensor-operands")]
    EraseUnnecessaryTensorOperands,
    #[display("expand-memref-strided-metadata")]
    ExpandMemrefStridedMetadata,
    #[display("fold-memref-aliases")]
    FoldMemrefAliases,
    #[display("fold-reassociative-reshapes")]
    FoldReassociativeReshapes,
    #[display("fold-tensor-empty-extract")]
    FoldTensorEmptyExtract,
    #[display("linalg-elementwise-greedy-fusion")]
    LinalgElementwiseGreedyFusion,
    #[display("lower-transfer-op-permutations")]
    LowerTransferOpPermutations,
    #[display("lower-vector-masks")]
    LowerVectorMasks,
    #[display("rank-reducing-vector")]
    RankReducingVector,
    #[display("swapping-patterns")]
    SwappingPatterns,
    #[display("tiling-canonicalization")]
    TilingCanonicalization,
}

impl PatternGroup {
    pub const ALL: [PatternGroup; 16] = [
        PatternGroup::AdditionalPatterns,
        PatternGroup::BubbleCollapse,
        PatternGroup::BubbleExpand,
        PatternGroup::BubblePackUnpack,
        PatternGroup::Canonicalization,
        PatternGroup::EraseUnnecessaryTensorOperands,
        PatternGroup::ExpandMemrefStridedMetadata,
        PatternGroup::FoldMemrefAliases,
        PatternGroup::FoldReassociativeReshapes,
        PatternGroup::FoldTensorEmptyExtract,
        PatternGroup::LinalgElementwiseGreedyFusion,
        PatternGroup::LowerTransferOpPermutations,
        PatternGroup::LowerVectorMasks,
        PatternGroup::RankReducingVector,
        PatternGroup::SwappingPatterns,
        PatternGroup::TilingCanonicalization,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("unknown pattern group `{_0}`")]
pub struct UnknownPatternGroup(#[error(not(source))] pub String);

impl FromStr for PatternGroup {
    type Err = UnknownPatternGroup;

    /// Accepts the kebab-case name, or the same name with underscores.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().replace('_', "-");
        PatternGroup::ALL
            .into_iter()
            .find(|group| group.to_string() == name)
            .ok_or_else(|| UnknownPatternGroup(s.to_owned()))
    }
}

type RuleFactory = fn(&ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>>;

/// Rules contributed by each group, in application order.
const RULES: [(PatternGroup, RuleFactory); 16] = [
    (PatternGroup::AdditionalPatterns, tensor_rules::additional),
    (PatternGroup::BubbleCollapse, linalg_rules::bubble_collapse),
    (PatternGroup::BubbleExpand, linalg_rules::bubble_expand),
    (PatternGroup::BubblePackUnpack, linalg_rules::bubble_pack),
    (PatternGroup::Canonicalization, canonicalize::patterns),
    (
        PatternGroup::EraseUnnecessaryTensorOperands,
        linalg_rules::erase_unnecessary_operands,
    ),
    (
        PatternGroup::ExpandMemrefStridedMetadata,
        memref_rules::expand_strided_metadata,
    ),
    (PatternGroup::FoldMemrefAliases, memref_rules::fold_aliases),
    (
        PatternGroup::FoldReassociativeReshapes,
        tensor_rules::fold_reassociative_reshapes,
    ),
    (
        PatternGroup::FoldTensorEmptyExtract,
        tensor_rules::fold_tensor_empty_extract,
    ),
    (
        PatternGroup::LinalgElementwiseGreedyFusion,
        linalg_rules::elementwise_fusion,
    ),
    (
        PatternGroup::LowerTransferOpPermutations,
        vector_rules::lower_transfer_permutations,
    ),
    (PatternGroup::LowerVectorMasks, vector_rules::lower_masks),
    (PatternGroup::RankReducingVector, vector_rules::rank_reducing),
    (PatternGroup::SwappingPatterns, tensor_rules::swapping),
    (PatternGroup::TilingCanonicalization, tiling::patterns),
];

/// The union, in table order, of the rules of every enabled group.
pub(super) fn rule_set(options: &ApplyPatternsOptions) -> Vec<Box<dyn RewritePattern>> {
    RULES
        .iter()
        .filter(|(group, _)| options.is_enabled(*group))
        .flat_map(|(_, factory)| factory(options))
        .collect()
}
