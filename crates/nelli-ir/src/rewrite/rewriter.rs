//! PatternRewriter: records the mutations of one pattern application.
//!
//! No value remapping is needed: replacements go through RAUW on the context.

use crate::context::IrContext;
use crate::refs::{OpRef, ValueRef};

/// Accumulated mutations from a pattern rewrite.
pub(crate) struct Mutations {
    /// Operations to insert before the current op.
    pub(crate) prefix_ops: Vec<OpRef>,
    /// The replacement operation (if any).
    pub(crate) replacement: Option<OpRef>,
    /// If set, the operation is erased and its results mapped to these values.
    pub(crate) erase_values: Option<Vec<ValueRef>>,
}

/// Rewriter interface for patterns.
///
/// Patterns use this to record mutations of the matched operation, which
/// the driver applies after the pattern returns. Edits elsewhere in the IR
/// (operands of other ops, erasing producers) are made on the context
/// directly.
#[derive(Default)]
pub struct PatternRewriter {
    prefix_ops: Vec<OpRef>,
    replacement: Option<OpRef>,
    erase_values: Option<Vec<ValueRef>>,
    modified: bool,
}

impl PatternRewriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a detached operation before the current operation.
    /// Multiple calls keep their order.
    pub fn insert_op(&mut self, op: OpRef) {
        self.prefix_ops.push(op);
    }

    /// Replace the current operation with a new detached one.
    ///
    /// Old results are replaced 1:1 by the new results, then the old
    /// operation is erased.
    pub fn replace_op(&mut self, new_op: OpRef) {
        debug_assert!(
            self.replacement.is_none() && self.erase_values.is_none(),
            "replace_op called after replace_op or erase_op"
        );
        self.replacement = Some(new_op);
    }

    /// Erase the current operation, mapping its results to the given values.
    pub fn erase_op(&mut self, replacement_values: Vec<ValueRef>) {
        debug_assert!(
            self.replacement.is_none() && self.erase_values.is_none(),
            "erase_op called after replace_op or erase_op"
        );
        self.erase_values = Some(replacement_values);
    }

    /// Replace the current op and insert prefix ops in one call.
    pub fn replace_with_prefix(&mut self, prefix: Vec<OpRef>, replacement: OpRef) {
        self.prefix_ops.extend(prefix);
        self.replace_op(replacement);
    }

    /// Record that the pattern changed the IR directly (operands,
    /// attributes, other operations).
    pub fn modified_in_place(&mut self) {
        self.modified = true;
    }

    pub(crate) fn has_mutations(&self) -> bool {
        self.modified
            || !self.prefix_ops.is_empty()
            || self.replacement.is_some()
            || self.erase_values.is_some()
    }

    pub(crate) fn take_mutations(self) -> Mutations {
        Mutations {
            prefix_ops: self.prefix_ops,
            replacement: self.replacement,
            erase_values: self.erase_values,
        }
    }
}

/// Apply recorded mutations to the context.
pub(crate) fn apply_mutations(ctx: &mut IrContext, original_op: OpRef, mutations: Mutations) {
    let Some(block) = ctx.op(original_op).parent_block else {
        return;
    };

    for prefix_op in mutations.prefix_ops {
        ctx.insert_op_before(block, original_op, prefix_op);
    }

    if let Some(new_op) = mutations.replacement {
        let old_results: Vec<ValueRef> = ctx.op_results(original_op).to_vec();
        let new_results: Vec<ValueRef> = ctx.op_results(new_op).to_vec();
        debug_assert_eq!(
            old_results.len(),
            new_results.len(),
            "replace_op: result count mismatch ({} vs {})",
            old_results.len(),
            new_results.len()
        );
        for (&old_v, &new_v) in old_results.iter().zip(&new_results) {
            ctx.replace_all_uses(old_v, new_v);
        }
        ctx.insert_op_before(block, original_op, new_op);
        ctx.erase_op(original_op);
    } else if let Some(values) = mutations.erase_values {
        let old_results: Vec<ValueRef> = ctx.op_results(original_op).to_vec();
        debug_assert_eq!(
            old_results.len(),
            values.len(),
            "erase_op: replacement value count mismatch ({} vs {})",
            old_results.len(),
            values.len()
        );
        for (&old_v, &new_v) in old_results.iter().zip(&values) {
            ctx.replace_all_uses(old_v, new_v);
        }
        ctx.erase_op(original_op);
    }
}
