//! Error types for transform operations.

use derive_more::Display;

pub type TransformResult<T> = Result<T, TransformError>;

/// How a failure propagates through an enclosing transform sequence.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Severity {
    /// Aborts the whole sequence; the payload may be partially rewritten.
    #[display("definite")]
    Definite,
    /// May be suppressed by the caller; the payload is left untouched.
    #[display("silenceable")]
    Silenceable,
}

#[derive(Clone, Display, Debug, PartialEq, derive_more::Error)]
#[display("{kind}")]
pub struct TransformError {
    #[error(not(source))]
    kind: Box<TransformErrorKind>,
    #[error(not(source))]
    severity: Severity,
}

impl From<TransformErrorKind> for TransformError {
    fn from(kind: TransformErrorKind) -> Self {
        TransformError {
            kind: Box::new(kind),
            severity: Severity::Definite,
        }
    }
}

impl TransformError {
    pub fn not_isolated(op_name: impl std::fmt::Display) -> Self {
        TransformErrorKind::NotIsolated(op_name.to_string()).into()
    }

    pub fn greedy_patterns_failed(iterations: usize) -> Self {
        TransformErrorKind::GreedyPatternsFailed { iterations }.into()
    }

    pub fn operand_index_overflow(index: i64, num_outputs: usize) -> Self {
        TransformErrorKind::OperandIndexOverflow { index, num_outputs }.into()
    }

    pub fn unroll_failed(msg: impl std::fmt::Display) -> Self {
        TransformErrorKind::UnrollFailed(msg.to_string()).into()
    }

    pub fn invalid_target(expected: &'static str, found: impl std::fmt::Display) -> Self {
        TransformErrorKind::InvalidTarget {
            expected,
            found: found.to_string(),
        }
        .into()
    }

    /// Downgrade to a silenceable failure.
    pub fn silenceable(mut self) -> Self {
        self.severity = Severity::Silenceable;
        self
    }

    pub fn kind(&self) -> &TransformErrorKind {
        &self.kind
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_definite(&self) -> bool {
        self.severity == Severity::Definite
    }
}

#[derive(Clone, Display, Debug, PartialEq)]
pub enum TransformErrorKind {
    #[display(
        "applies only to isolated-from-above targets because it needs to apply patterns greedily (got {_0})"
    )]
    NotIsolated(String),

    #[display("greedy patterns failed (no fixpoint after {iterations} iterations)")]
    GreedyPatternsFailed { iterations: usize },

    #[display("operand idx overflow: {index} is not below {num_outputs}")]
    OperandIndexOverflow { index: i64, num_outputs: usize },

    #[display("unroll by factor failed: {_0}")]
    UnrollFailed(String),

    #[display("expected a {expected} target, got {found}")]
    InvalidTarget { expected: &'static str, found: String },
}
