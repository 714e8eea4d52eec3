use std::error::Error;

use clap::{Parser, Subcommand};
use commands::{
    analyze::{self, AnalyzeArgs},
    run::{self, RunArgs},
    status::{self, StatusArgs},
    sweep::{self, SweepArgs},
};
use tracing::error;

mod commands;
mod logging;

#[derive(Parser, Debug)]
#[command(name = "simflow", about = "Simulation experiment orchestrator")]
struct Cli {
    /// Raise the default log level from info to debug.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Expand a CSV or YAML sweep file and print one parameter set per line.
    Sweep(SweepArgs),
    /// Build an experiment from a plan and run it on a job directory.
    Run(RunArgs),
    /// List metadata records matching property and tag filters.
    Status(StatusArgs),
    /// Collect simulation output files of an experiment into one JSON document.
    Analyze(AnalyzeArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);
    let result = match cli.command {
        Command::Sweep(args) => sweep::run(&args),
        Command::Run(args) => run::run(&args),
        Command::Status(args) => status::run(&args),
        Command::Analyze(args) => analyze::run(&args),
    };
    if let Err(err) = &result {
        error!(error = %err, "command failed");
    }
    result
}
