//! The interface shared by every transform operation.

use nelli_ir::{IrContext, OpRef};

use crate::error::TransformResult;

/// Side effect of a transform operation on its handles or on the payload IR.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransformEffect {
    /// Reads the target handle without invalidating it.
    OnlyReadsHandle,
    /// Invalidates the target handle.
    ConsumesHandle,
    /// Produces a new handle to payload operations.
    ProducesHandle,
    /// Rewrites payload IR.
    ModifiesPayload,
}

/// A transform applied to one payload operation.
///
/// `apply` returns the operation the produced handle points at; for every
/// transform here that is the (possibly rewritten) target itself.
pub trait TransformOp {
    fn name(&self) -> &'static str;

    fn effects(&self) -> &'static [TransformEffect];

    fn apply(&self, ctx: &mut IrContext, target: OpRef) -> TransformResult<OpRef>;
}

/// Effects of transforms that rewrite the payload behind a read-only handle.
pub(crate) const READ_HANDLE_MODIFY_PAYLOAD: &[TransformEffect] = &[
    TransformEffect::OnlyReadsHandle,
    TransformEffect::ProducesHandle,
    TransformEffect::ModifiesPayload,
];
