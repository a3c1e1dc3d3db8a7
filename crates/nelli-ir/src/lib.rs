//! nelli IR: an arena-based SSA IR for tensor/memref/vector programs.
//!
//! All entities live in an [`IrContext`] and are addressed by small `Copy`
//! refs ([`OpRef`], [`ValueRef`], [`BlockRef`], [`RegionRef`], [`TypeRef`]).
//! Use-chains are maintained automatically so rewrites can use RAUW.
//!
//! ```text
//! core.module @m {
//!   func.func @f(%0: core.index) -> core.index {
//!     %1 = arith.constant {value = 1} : core.index
//!     %2 = arith.addi %0, %1 : core.index
//!     func.return %2
//!   }
//! }
//! ```

pub mod context;
pub mod dialect;
pub mod ir;
pub mod location;
pub mod op_interface;
pub mod ops;
pub mod parser;
pub mod printer;
pub mod refs;
pub mod rewrite;
pub mod shaped;
pub mod types;
pub mod validation;
pub mod walk;

pub use context::{
    BlockArgData, BlockData, IrContext, IrMapping, OperationData, OperationDataBuilder,
    RegionData, Use, ValueData,
};
pub use ir::Symbol;
pub use location::Span;
pub use ops::{ConversionError, DialectOp};
pub use refs::{BlockRef, OpRef, PathRef, RegionRef, TypeRef, ValueDef, ValueRef};
pub use shaped::{DYNAMIC, ShapeKind, ShapedType};
pub use types::{Attribute, Location, PathInterner, TypeData, TypeDataBuilder, TypeInterner};
pub use walk::WalkAction;

#[doc(hidden)]
pub use inventory;
