//! `nelli-opt`: parse nelli IR, run a fixed pipeline of transforms over it,
//! and print the result.

pub mod pipeline;

pub use pipeline::{Pipeline, PipelineError};
