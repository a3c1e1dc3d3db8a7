//! `nelli-opt` entry point.

mod cli;

use std::io::Read;
use std::process::ExitCode;

use clap::Parser;
use derive_more::{Display, Error, From};
use tracing_subscriber::EnvFilter;

use cli::Cli;
use nelli::PipelineError;

#[derive(Debug, Display, Error, From)]
enum CliError {
    #[display("cannot read {path}: {source}")]
    #[from(ignore)]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[display("cannot write output: {_0}")]
    Write(std::io::Error),
    #[display("{_0}")]
    Pipeline(PipelineError),
}

fn read_input(input: &str) -> Result<String, CliError> {
    let read = if input == "-" {
        let mut text = String::new();
        std::io::stdin().read_to_string(&mut text).map(|_| text)
    } else {
        std::fs::read_to_string(input)
    };
    read.map_err(|source| CliError::Read {
        path: input.to_owned(),
        source,
    })
}

fn run(cli: &Cli) -> Result<(), CliError> {
    let input = read_input(&cli.input)?;
    let output = cli.pipeline().run_on_text(&input)?;
    match &cli.output {
        Some(path) => std::fs::write(path, output)?,
        None => print!("{output}"),
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
