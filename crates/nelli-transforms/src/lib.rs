//! Transform operations over nelli IR.
//!
//! Each transform takes a payload operation, rewrites the IR under it, and
//! reports failures as [`TransformError`]s:
//!
//! - [`apply_patterns`]: greedy rewriting with a configurable set of rule
//!   groups, followed by optional loop-invariant code motion.
//! - [`hoist_alloc`]: moves function-local allocations to the entry block.
//! - [`buffer_opts`]: store-to-load forwarding and dead buffer removal.
//! - [`share_forall`]: makes `scf.forall` slices read their shared outputs.
//! - [`loop_utils`]: loop bounds, single-iteration promotion and unrolling.
//! - [`cse`]: common subexpression elimination.

pub mod apply_patterns;
pub mod bounds;
pub mod buffer_opts;
pub mod cse;
pub mod error;
pub mod fusion;
pub mod hoist_alloc;
pub mod licm;
pub mod loop_utils;
pub mod share_forall;
pub mod transform_op;

pub use apply_patterns::{ApplyPatterns, ApplyPatternsOptions, PatternGroup, apply_patterns};
pub use buffer_opts::{ApplyBufferOptimizations, apply_buffer_optimizations};
pub use cse::{Cse, eliminate_common_subexpressions};
pub use error::{Severity, TransformError, TransformErrorKind, TransformResult};
pub use fusion::{FusionConfig, fused_operand_count_within_limit};
pub use hoist_alloc::{HoistStaticAlloc, hoist_static_allocations};
pub use loop_utils::{LoopBounds, LoopUnroll, loop_bounds, promote_if_single_iteration, unroll_by_factor};
pub use share_forall::{ShareForallOperands, share_forall_operands};
pub use transform_op::{TransformEffect, TransformOp};
