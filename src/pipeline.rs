//! The transform pipeline run by `nelli-opt`.
//!
//! Steps run in a fixed order, each over every matching target in the
//! module:
//!
//! ```text
//! parse
//!   │
//!   ▼
//! apply_patterns          (each func.func)
//!   │
//!   ▼
//! hoist_static_alloc      (each func.func)
//!   │
//!   ▼
//! apply_buffer_optimizations (each func.func)
//!   │
//!   ▼
//! share_forall_operands   (each scf.forall)
//!   │
//!   ▼
//! loop_unroll             (the module)
//!   │
//!   ▼
//! cse                     (the module)
//!   │
//!   ▼
//! validate ─► print
//! ```

use derive_more::{Display, Error, From};

use nelli_ir::dialect::{func, scf};
use nelli_ir::parser::{ParseError, parse_module};
use nelli_ir::printer::print_module;
use nelli_ir::validation::validate;
use nelli_ir::walk::collect_typed_inclusive;
use nelli_ir::{DialectOp, IrContext, OpRef};
use nelli_transforms::{
    ApplyBufferOptimizations, ApplyPatterns, ApplyPatternsOptions, Cse, HoistStaticAlloc,
    LoopUnroll, ShareForallOperands, TransformError, TransformOp,
};

#[derive(Debug, Display, Error, From)]
pub enum PipelineError {
    #[display("{_0}")]
    Parse(ParseError),
    #[display("{step} failed: {source}")]
    #[from(ignore)]
    Transform {
        step: &'static str,
        source: TransformError,
    },
    #[display("invalid IR after {step}:\n{report}")]
    #[from(ignore)]
    Invalid {
        step: &'static str,
        #[error(not(source))]
        report: String,
    },
}

/// Which transforms to run. Everything is off by default.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub apply_patterns: Option<ApplyPatternsOptions>,
    pub hoist_static_alloc: bool,
    pub buffer_opts: bool,
    /// Output positions to share; empty shares all of them.
    pub share_forall_operands: Option<Vec<i64>>,
    pub unroll: Option<u32>,
    pub run_cse: bool,
}

/// Where a step is applied.
#[derive(Clone, Copy)]
enum Targets {
    Functions,
    Foralls,
    Module,
}

impl Targets {
    fn collect(self, ctx: &IrContext, module: OpRef) -> Vec<OpRef> {
        match self {
            Targets::Functions => collect_typed_inclusive::<func::Func>(ctx, module)
                .into_iter()
                .map(|f| f.op_ref())
                .collect(),
            Targets::Foralls => collect_typed_inclusive::<scf::Forall>(ctx, module)
                .into_iter()
                .map(|f| f.op_ref())
                .collect(),
            Targets::Module => vec![module],
        }
    }
}

impl Pipeline {
    fn steps(&self) -> Vec<(Box<dyn TransformOp>, Targets)> {
        let mut steps: Vec<(Box<dyn TransformOp>, Targets)> = Vec::new();
        if let Some(options) = &self.apply_patterns {
            let op = ApplyPatterns {
                options: options.clone(),
            };
            steps.push((Box::new(op), Targets::Functions));
        }
        if self.hoist_static_alloc {
            steps.push((Box::new(HoistStaticAlloc), Targets::Functions));
        }
        if self.buffer_opts {
            steps.push((Box::new(ApplyBufferOptimizations), Targets::Functions));
        }
        if let Some(indices) = &self.share_forall_operands {
            let op = ShareForallOperands {
                indices: indices.clone(),
            };
            steps.push((Box::new(op), Targets::Foralls));
        }
        if let Some(factor) = self.unroll {
            steps.push((Box::new(LoopUnroll { factor }), Targets::Module));
        }
        if self.run_cse {
            steps.push((Box::new(Cse), Targets::Module));
        }
        steps
    }

    /// Run every enabled step on `module`, validating the IR after each.
    pub fn run(&self, ctx: &mut IrContext, module: OpRef) -> Result<(), PipelineError> {
        for (op, targets) in self.steps() {
            let step = op.name();
            let targets = targets.collect(ctx, module);
            tracing::debug!(step, targets = targets.len(), "running step");
            for target in targets {
                op.apply(ctx, target)
                    .map_err(|source| PipelineError::Transform { step, source })?;
            }
            let result = validate(ctx, module);
            if !result.is_ok() {
                return Err(PipelineError::Invalid {
                    step,
                    report: result.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Parse `input`, run the pipeline, and print the resulting module.
    pub fn run_on_text(&self, input: &str) -> Result<String, PipelineError> {
        let mut ctx = IrContext::new();
        let module = parse_module(&mut ctx, input)?;
        self.run(&mut ctx, module)?;
        Ok(print_module(&ctx, module))
    }
}
