//! In-place rewrite infrastructure: patterns record mutations through a
//! [`PatternRewriter`] and the greedy [`PatternApplicator`] applies them
//! until a fixpoint.

pub mod greedy;
pub mod pattern;
pub mod rewriter;

pub use greedy::{ApplyResult, GreedyConfig, PatternApplicator};
pub use pattern::RewritePattern;
pub use rewriter::PatternRewriter;
