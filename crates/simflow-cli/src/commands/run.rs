use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use simflow_assets::{AssetCollection, DirectoryOptions};
use simflow_core::config::FlowConfig;
use simflow_core::hash::stable_hash_string;
use simflow_core::serde::from_yaml_slice;
use simflow_model::{CommandLine, Experiment, Suite, Task};
use simflow_manage::{ExperimentManager, ManagerOptions};
use simflow_platform::{FilePlatform, FilePlatformOptions};
use tracing::info;

use super::sweep::file_options;

/// Experiment tag carrying the fingerprint of the plan that built it.
pub const FINGERPRINT_TAG: &str = "plan_fingerprint";

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML plan describing the experiment.
    #[arg(long)]
    pub plan: PathBuf,
    /// Job directory the file platform writes into.
    #[arg(long)]
    pub job_dir: PathBuf,
    /// YAML configuration overriding the defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Poll until every simulation is done and persist final statuses.
    #[arg(long)]
    pub wait: bool,
}

/// Experiment plan. Relative paths resolve against the plan's directory.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunPlan {
    pub name: String,
    pub command: PlanCommand,
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,
    #[serde(default)]
    pub sweep: Option<PathBuf>,
    /// Column types of the sweep file.
    #[serde(default)]
    pub types: BTreeMap<String, String>,
    /// Directory scanned into the experiment's common assets.
    #[serde(default)]
    pub assets: Option<PathBuf>,
    /// Emit the parameters as this JSON file in every simulation directory.
    #[serde(default)]
    pub config_filename: Option<String>,
    #[serde(default)]
    pub suite: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A whitespace-split command line or an explicit argument vector.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanCommand {
    Line(String),
    Argv(Vec<String>),
}

impl PlanCommand {
    fn command_line(&self) -> Result<CommandLine, Box<dyn Error>> {
        match self {
            PlanCommand::Line(line) if !line.trim().is_empty() => Ok(CommandLine::from_string(line)),
            PlanCommand::Argv(argv) => match argv.split_first() {
                Some((executable, args)) => Ok(args
                    .iter()
                    .fold(CommandLine::new(executable.clone()), |command, arg| command.arg(arg.clone()))),
                None => Err("plan command is empty".into()),
            },
            PlanCommand::Line(_) => Err("plan command is empty".into()),
        }
    }
}

impl RunPlan {
    pub fn load(path: &Path) -> Result<Self, Box<dyn Error>> {
        let bytes = fs::read(path).map_err(|err| format!("cannot read plan {}: {err}", path.display()))?;
        Ok(from_yaml_slice(&bytes)?)
    }

    /// SHA-256 over the canonical JSON form of the plan.
    pub fn fingerprint(&self) -> Result<String, Box<dyn Error>> {
        Ok(stable_hash_string(self)?)
    }

    /// Builds the experiment, and its suite when the plan names one.
    pub fn build(&self, root: &Path) -> Result<(Experiment, Option<Suite>), Box<dyn Error>> {
        let mut task = Task::new(self.command.command_line()?);
        if let Some(filename) = &self.config_filename {
            task = task.with_config_file(filename.clone());
        }
        for (name, value) in &self.parameters {
            task.set_parameter(name.clone(), value.clone());
        }

        let mut experiment = match &self.sweep {
            Some(sweep) => {
                let options = file_options(self.types.iter().map(|(name, kind)| (name.as_str(), kind.as_str())))?;
                let builder = simflow_sweep::load_sweep_file(&root.join(sweep), &options)?;
                Experiment::from_builder(self.name.clone(), task, Arc::from(builder))
            }
            None => {
                let mut experiment = Experiment::new(self.name.clone(), task);
                let single = experiment.base_simulation();
                experiment.add_simulation(single)?;
                experiment
            }
        };
        experiment.meta.merge_tags(self.tags.clone());
        experiment
            .meta
            .tags
            .insert(FINGERPRINT_TAG.to_string(), self.fingerprint()?);
        if let Some(dir) = &self.assets {
            let assets = AssetCollection::from_directory(&root.join(dir), &DirectoryOptions::default())?;
            experiment.common_assets.merge(&assets)?;
        }
        let suite = self.suite.as_ref().map(|name| {
            let mut suite = Suite::new(name.clone());
            suite.add_experiment(&mut experiment);
            suite
        });
        Ok((experiment, suite))
    }
}

pub fn load_config(path: Option<&Path>) -> Result<FlowConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => FlowConfig::load(path)?,
        None => FlowConfig::default(),
    };
    Ok(config.apply_env()?)
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let config = load_config(args.config.as_deref())?;
    let plan = RunPlan::load(&args.plan)?;
    let root = args.plan.parent().unwrap_or_else(|| Path::new("."));
    let (experiment, suite) = plan.build(root)?;
    let fingerprint = plan.fingerprint()?;

    let platform = Arc::new(FilePlatform::new(&args.job_dir, FilePlatformOptions::from(&config))?);
    let mut manager = ExperimentManager::new(experiment, platform.clone(), ManagerOptions::from(&config));
    if let Some(suite) = suite {
        manager = manager.with_suite(suite);
    }
    let report = manager.run(args.wait)?;
    // Local jobs die with the process, so the command outlives them either way.
    platform.wait_for_jobs()?;

    let summary = json!({
        "experiment": report.experiment.to_string(),
        "fingerprint": fingerprint,
        "expected": report.expected,
        "created": report.created,
        "unique_assets": report.unique_assets,
        "failed_batches": report.failed_batches.len(),
        "status": report.status.as_str(),
        "distribution": report.distribution(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    info!(experiment = %report.experiment, status = %report.status, "run finished");

    if !report.failed_batches.is_empty() {
        return Err(format!("{} creation batch(es) failed", report.failed_batches.len()).into());
    }
    if args.wait && !report.success() {
        return Err(format!("experiment finished with {}", report.distribution()).into());
    }
    Ok(())
}
