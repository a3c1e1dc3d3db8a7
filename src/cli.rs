//! Command-line interface for `nelli-opt`.

use std::path::PathBuf;

use clap::Parser;

use nelli::Pipeline;
use nelli_transforms::{ApplyPatternsOptions, PatternGroup};

#[derive(Parser, Debug)]
#[command(name = "nelli-opt")]
#[command(about = "Run nelli IR transforms over a module", long_about = None)]
pub struct Cli {
    /// Input module, or `-` for stdin
    #[arg(default_value = "-")]
    pub input: String,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Greedily apply the given rule groups to every function
    #[arg(long, value_delimiter = ',', value_name = "GROUPS")]
    pub apply_patterns: Vec<PatternGroup>,

    /// Hoist loop invariants after applying patterns
    #[arg(long)]
    pub licm: bool,

    /// Walk functions for CSE after applying patterns
    #[arg(long)]
    pub cse: bool,

    /// Leave extract_slice of pad alone when the slice lies in the padding
    #[arg(long)]
    pub swap_padding_elide_conditional: bool,

    /// Iteration cap of the greedy driver
    #[arg(long, default_value_t = 10)]
    pub max_iterations: usize,

    /// Operand limit for elementwise fusion
    #[arg(long, default_value_t = 3)]
    pub fusion_operand_limit: usize,

    /// Move function-local allocations to the entry block
    #[arg(long)]
    pub hoist_static_alloc: bool,

    /// Forward vector transfers and erase write-only buffers
    #[arg(long)]
    pub buffer_opts: bool,

    /// Share the given scf.forall outputs (all of them when empty)
    #[arg(long, value_delimiter = ',', num_args = 0.., value_name = "INDICES", allow_negative_numbers = true)]
    pub share_forall_operands: Option<Vec<i64>>,

    /// Unroll every constant-bound loop by this factor
    #[arg(long, value_name = "FACTOR")]
    pub unroll: Option<u32>,

    /// Eliminate common subexpressions over the whole module
    #[arg(long)]
    pub run_cse: bool,
}

impl Cli {
    fn patterns_requested(&self) -> bool {
        !self.apply_patterns.is_empty() || self.licm || self.cse
    }

    pub fn pipeline(&self) -> Pipeline {
        let apply_patterns = self.patterns_requested().then(|| {
            let mut options = ApplyPatternsOptions {
                licm: self.licm,
                cse: self.cse,
                swap_padding_elide_conditional: self.swap_padding_elide_conditional,
                max_iterations: self.max_iterations,
                ..Default::default()
            };
            options.fusion.operand_limit = self.fusion_operand_limit;
            for &group in &self.apply_patterns {
                options.enable(group);
            }
            options
        });
        Pipeline {
            apply_patterns,
            hoist_static_alloc: self.hoist_static_alloc,
            buffer_opts: self.buffer_opts,
            share_forall_operands: self.share_forall_operands.clone(),
            unroll: self.unroll,
            run_cse: self.run_cse,
        }
    }
}
