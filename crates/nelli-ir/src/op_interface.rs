//! Operation interface registries for querying operation properties.
//!
//! Properties are registered with `inventory` at the dialect definition site
//! and collected into lazily-built lookup tables on first access.

use std::collections::HashSet;
use std::sync::LazyLock;

use crate::context::IrContext;
use crate::ir::Symbol;
use crate::refs::{OpRef, ValueRef};
use crate::shaped::ShapedType;

/// Registration entry for an operation property.
pub struct OpRegistration {
    /// Dialect name (e.g., "arith").
    pub dialect: &'static str,
    /// Operation name within the dialect (e.g., "addi").
    pub op_name: &'static str,
}

/// Pure operations: no side effects, safe to remove or move if unused.
pub struct PureOpRegistration(pub OpRegistration);
/// Operations whose regions cannot reference values from above.
pub struct IsolatedFromAboveRegistration(pub OpRegistration);
/// Operations with a single-block loop body region.
pub struct LoopLikeRegistration(pub OpRegistration);

inventory::collect!(PureOpRegistration);
inventory::collect!(IsolatedFromAboveRegistration);
inventory::collect!(LoopLikeRegistration);

type OpSet = HashSet<(Symbol, Symbol)>;

fn build_set<'a>(entries: impl Iterator<Item = &'a OpRegistration>) -> OpSet {
    entries
        .map(|reg| {
            (
                Symbol::from_dynamic(reg.dialect),
                Symbol::from_dynamic(reg.op_name),
            )
        })
        .collect()
}

static PURE: LazyLock<OpSet> =
    LazyLock::new(|| build_set(inventory::iter::<PureOpRegistration>.into_iter().map(|r| &r.0)));
static ISOLATED: LazyLock<OpSet> = LazyLock::new(|| {
    build_set(
        inventory::iter::<IsolatedFromAboveRegistration>
            .into_iter()
            .map(|r| &r.0),
    )
});
static LOOP_LIKE: LazyLock<OpSet> =
    LazyLock::new(|| build_set(inventory::iter::<LoopLikeRegistration>.into_iter().map(|r| &r.0)));

fn lookup(set: &OpSet, ctx: &IrContext, op: OpRef) -> bool {
    let data = ctx.op(op);
    set.contains(&(data.dialect, data.name))
}

/// Interface for querying operation purity.
pub struct PureOps;

impl PureOps {
    #[doc(hidden)]
    pub const fn register(dialect: &'static str, op_name: &'static str) -> PureOpRegistration {
        PureOpRegistration(OpRegistration { dialect, op_name })
    }

    /// Whether the operation has been explicitly registered as pure.
    /// Unregistered operations are conservatively impure.
    pub fn is_pure(ctx: &IrContext, op: OpRef) -> bool {
        lookup(&PURE, ctx, op)
    }

    /// Whether the operation can be dropped when its results are unused.
    ///
    /// Structured `linalg` operations only qualify when they operate purely
    /// on tensors, since on buffers they write their destination operands.
    pub fn is_side_effect_free(ctx: &IrContext, op: OpRef) -> bool {
        if Self::is_pure(ctx, op) {
            return true;
        }
        let data = ctx.op(op);
        data.in_dialect("linalg")
            && !ctx.op_results(op).is_empty()
            && ctx
                .op_operands(op)
                .iter()
                .all(|&v| !ShapedType::is_memref(ctx, ctx.value_ty(v)))
    }

    /// Whether the operation is dead: side-effect free with unused results.
    pub fn is_trivially_dead(ctx: &IrContext, op: OpRef) -> bool {
        Self::is_side_effect_free(ctx, op) && !ctx.op_has_uses(op)
    }
}

/// Interface for querying operation isolation.
pub struct IsolatedFromAboveOps;

impl IsolatedFromAboveOps {
    #[doc(hidden)]
    pub const fn register(
        dialect: &'static str,
        op_name: &'static str,
    ) -> IsolatedFromAboveRegistration {
        IsolatedFromAboveRegistration(OpRegistration { dialect, op_name })
    }

    pub fn is_isolated(ctx: &IrContext, op: OpRef) -> bool {
        lookup(&ISOLATED, ctx, op)
    }

    /// Verify that an isolated operation doesn't reference outer values.
    ///
    /// Returns the offending `(operation, value)` pairs. Nested isolated
    /// operations are their own verification scope and are not entered.
    pub fn verify_isolation(ctx: &IrContext, op: OpRef) -> Vec<IsolationViolation> {
        if !Self::is_isolated(ctx, op) {
            return vec![];
        }
        let mut violations = Vec::new();
        for &region in &ctx.op(op).regions {
            Self::verify_region(ctx, op, region, &mut violations);
        }
        violations
    }

    fn verify_region(
        ctx: &IrContext,
        scope: OpRef,
        region: crate::refs::RegionRef,
        violations: &mut Vec<IsolationViolation>,
    ) {
        for &block in &ctx.region(region).blocks {
            for &op in &ctx.block(block).ops {
                for &operand in ctx.op_operands(op) {
                    if !ctx.is_defined_inside(operand, scope) {
                        violations.push(IsolationViolation {
                            operation: op,
                            external_value: operand,
                        });
                    }
                }
                if !Self::is_isolated(ctx, op) {
                    for &nested in &ctx.op(op).regions {
                        Self::verify_region(ctx, scope, nested, violations);
                    }
                }
            }
        }
    }
}

/// A violation of the isolated-from-above constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsolationViolation {
    /// The operation that has the invalid reference.
    pub operation: OpRef,
    /// The value referenced from outside the isolated region.
    pub external_value: ValueRef,
}

/// Interface for loop-like operations.
pub struct LoopLikeOps;

impl LoopLikeOps {
    #[doc(hidden)]
    pub const fn register(dialect: &'static str, op_name: &'static str) -> LoopLikeRegistration {
        LoopLikeRegistration(OpRegistration { dialect, op_name })
    }

    pub fn is_loop_like(ctx: &IrContext, op: OpRef) -> bool {
        lookup(&LOOP_LIKE, ctx, op)
    }
}

/// Register pure operations.
///
/// ```text
/// register_pure_op!(arith.addi, arith.subi);
/// ```
#[macro_export]
macro_rules! register_pure_op {
    ($($dialect:ident . $op_name:tt),+ $(,)?) => {
        $(
            $crate::inventory::submit! {
                $crate::op_interface::PureOps::register(
                    stringify!($dialect),
                    stringify!($op_name)
                )
            }
        )+
    };
}

/// Register operations whose regions are isolated from above.
#[macro_export]
macro_rules! register_isolated_op {
    ($($dialect:ident . $op_name:tt),+ $(,)?) => {
        $(
            $crate::inventory::submit! {
                $crate::op_interface::IsolatedFromAboveOps::register(
                    stringify!($dialect),
                    stringify!($op_name)
                )
            }
        )+
    };
}

/// Register loop-like operations.
#[macro_export]
macro_rules! register_loop_like_op {
    ($($dialect:ident . $op_name:tt),+ $(,)?) => {
        $(
            $crate::inventory::submit! {
                $crate::op_interface::LoopLikeOps::register(
                    stringify!($dialect),
                    stringify!($op_name)
                )
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    #[test]
    fn registries_know_dialect_ops() {
        let mut ctx = IrContext::new();
        let module = parse_module(
            &mut ctx,
            r#"core.module @m {
  func.func @f() -> core.nil {
    %0 = arith.constant {value = 1} : core.index
    func.return
  }
}
"#,
        )
        .unwrap();
        let func = crate::walk::nested_ops(&ctx, module)[0];
        let constant = crate::walk::nested_ops(&ctx, module)[1];

        assert!(IsolatedFromAboveOps::is_isolated(&ctx, module));
        assert!(IsolatedFromAboveOps::is_isolated(&ctx, func));
        assert!(!IsolatedFromAboveOps::is_isolated(&ctx, constant));
        assert!(PureOps::is_pure(&ctx, constant));
        assert!(PureOps::is_trivially_dead(&ctx, constant));
        assert!(!PureOps::is_pure(&ctx, func));
        assert!(IsolatedFromAboveOps::verify_isolation(&ctx, func).is_empty());
    }

    #[test]
    fn verify_isolation_reports_outer_values() {
        let mut ctx = IrContext::new();
        let module = parse_module(
            &mut ctx,
            r#"core.module @m {
  %0 = arith.constant {value = 1} : core.index
  func.func @f() -> core.nil {
    test.use %0
    func.return
  }
}
"#,
        )
        .unwrap();
        let ops = crate::walk::nested_ops(&ctx, module);
        let (constant, func, user) = (ops[0], ops[1], ops[2]);
        let outer = ctx.op_result(constant, 0);

        assert_eq!(
            IsolatedFromAboveOps::verify_isolation(&ctx, func),
            vec![IsolationViolation {
                operation: user,
                external_value: outer,
            }]
        );
        assert!(IsolatedFromAboveOps::verify_isolation(&ctx, module).is_empty());
    }
}
