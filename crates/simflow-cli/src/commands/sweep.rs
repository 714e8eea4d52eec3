use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;

use clap::Args;
use simflow_core::errors::FlowError;
use simflow_model::{Simulation, Task};
use simflow_sweep::{load_sweep_file, SweepFileOptions, ValueType};
use tracing::info;

use super::parse_pair;

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// CSV or YAML sweep file.
    #[arg(long)]
    pub file: PathBuf,
    /// Column type override, as `name=int|float|str|bool`.
    #[arg(long = "type", value_name = "NAME=TYPE", value_parser = parse_pair)]
    pub types: Vec<(String, String)>,
}

pub fn run(args: &SweepArgs) -> Result<(), Box<dyn Error>> {
    let options = file_options(args.types.iter().map(|(name, kind)| (name.as_str(), kind.as_str())))?;
    let builder = load_sweep_file(&args.file, &options)?;
    let base = Simulation::new(Task::default());
    let mut out = io::stdout().lock();
    for simulation in builder.simulations(&base) {
        let simulation = simulation?;
        writeln!(out, "{}", serde_json::to_string(simulation.task.parameters())?)?;
    }
    out.flush()?;
    info!(file = %args.file.display(), count = builder.count(), "expanded sweep");
    Ok(())
}

/// Sweep file options from `(column, type)` pairs.
pub fn file_options<'a>(
    types: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<SweepFileOptions, FlowError> {
    types
        .into_iter()
        .try_fold(SweepFileOptions::default(), |options, (column, kind)| {
            Ok(options.with_type(column, ValueType::from_str(kind)?))
        })
}
