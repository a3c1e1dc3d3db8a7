//! Typed operation wrappers.
//!
//! A dialect operation is a `Copy` newtype around an [`OpRef`] that has been
//! checked to carry the right `dialect.name`. Wrappers are declared with
//! [`define_op!`] and get accessors written by hand next to the declaration.

use derive_more::{Display, Error};

use crate::context::IrContext;
use crate::ir::Symbol;
use crate::refs::OpRef;

/// Error when converting an [`OpRef`] into a typed wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ConversionError {
    /// Operation name doesn't match expected dialect.operation.
    #[display("expected {expected}, found {actual}")]
    WrongOperation {
        expected: &'static str,
        actual: String,
    },
    /// Missing required attribute.
    #[display("missing attribute `{_0}`")]
    MissingAttribute(#[error(not(source))] &'static str),
    /// Wrong number of operands.
    #[display("expected {expected} operands, found {actual}")]
    WrongOperandCount { expected: usize, actual: usize },
}

/// Trait for typed dialect operation wrappers.
pub trait DialectOp: Sized + Copy {
    const DIALECT_NAME: &'static str;
    const OP_NAME: &'static str;

    fn from_op(ctx: &IrContext, op: OpRef) -> Result<Self, ConversionError>;
    fn op_ref(&self) -> OpRef;

    fn matches(ctx: &IrContext, op: OpRef) -> bool {
        let data = ctx.op(op);
        data.dialect == Symbol::new(Self::DIALECT_NAME) && data.name == Symbol::new(Self::OP_NAME)
    }
}

/// Declare typed wrappers for dialect operations.
///
/// ```
/// use nelli_ir::{define_op, DialectOp};
///
/// define_op! {
///     /// `demo.noop`
///     pub struct Noop = demo.noop;
/// }
///
/// assert_eq!(Noop::OP_NAME, "noop");
/// ```
#[macro_export]
macro_rules! define_op {
    ($($(#[$meta:meta])* pub struct $ty:ident = $dialect:ident . $op:tt;)+) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
            pub struct $ty($crate::refs::OpRef);

            impl $crate::ops::DialectOp for $ty {
                const DIALECT_NAME: &'static str = stringify!($dialect);
                const OP_NAME: &'static str = stringify!($op);

                fn from_op(
                    ctx: &$crate::context::IrContext,
                    op: $crate::refs::OpRef,
                ) -> Result<Self, $crate::ops::ConversionError> {
                    if <Self as $crate::ops::DialectOp>::matches(ctx, op) {
                        Ok($ty(op))
                    } else {
                        Err($crate::ops::ConversionError::WrongOperation {
                            expected: concat!(stringify!($dialect), ".", stringify!($op)),
                            actual: ctx.op(op).full_name(),
                        })
                    }
                }

                fn op_ref(&self) -> $crate::refs::OpRef {
                    self.0
                }
            }
        )+
    };
}
