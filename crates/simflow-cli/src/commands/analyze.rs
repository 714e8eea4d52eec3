use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use simflow_analyze::{AnalyzeManager, AnalyzeOptions, CollectingAnalyzer};
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::serde::to_canonical_json_pretty;
use simflow_platform::{FilePlatform, FilePlatformOptions};
use tracing::info;

use super::run::load_config;

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Job directory holding the experiment.
    #[arg(long)]
    pub job_dir: PathBuf,
    /// Experiment id.
    #[arg(long)]
    pub experiment: ItemId,
    /// Output file to collect from every simulation, relative to its directory.
    #[arg(long = "file", required = true)]
    pub files: Vec<String>,
    /// Destination of the collected JSON document.
    #[arg(long)]
    pub out: PathBuf,
    /// YAML configuration overriding the defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Analyze whatever is ready instead of refusing incomplete experiments.
    #[arg(long)]
    pub partial: bool,
    /// Treat failed simulations as analyzable.
    #[arg(long)]
    pub include_failed: bool,
}

pub fn run(args: &AnalyzeArgs) -> Result<(), Box<dyn Error>> {
    let config = load_config(args.config.as_deref())?;
    let platform = Arc::new(FilePlatform::new(&args.job_dir, FilePlatformOptions::from(&config))?);
    let mut options = AnalyzeOptions::from(&config);
    options.partial_analyze_ok |= args.partial;
    options.analyze_failed_items |= args.include_failed;
    options.verbose = true;

    let mut manager = AnalyzeManager::new(platform, options);
    manager
        .add_item(args.experiment, ItemType::Experiment)
        .add_analyzer(Box::new(CollectingAnalyzer::new(args.files.iter().cloned())));
    let outcome = manager.analyze()?;

    let collected = outcome
        .result("collect")
        .ok_or("collecting analyzer produced no result")?;
    if let Some(parent) = args.out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(&args.out, to_canonical_json_pretty(collected)?)?;
    info!(
        analyzed = outcome.analyzed,
        ignored = outcome.ignored,
        out = %args.out.display(),
        "wrote collected outputs"
    );
    Ok(())
}
