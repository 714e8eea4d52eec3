//! Filesystem job-directory platform.
//!
//! Layout: `<job_dir>/s_<suite>/e_<experiment>/<simulation>/`, each level
//! holding its `metadata.json`. Common assets live in the experiment's
//! `Assets/` directory and are linked into every simulation directory.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use simflow_assets::Asset;
use simflow_core::config::FlowConfig;
use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::status::EntityStatus;
use simflow_model::{clean_name, EntityMeta, Experiment, JobRecord, Simulation, Suite, IMPLICIT_SUITE_NAME};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::capabilities::Capabilities;
use crate::item::{child_type, unsupported, Item};
use crate::metadata::JsonMetadataOperations;
use crate::platform::Platform;
use crate::runner::{read_job_status, LocalRunner, RunnerJob};

/// Directory of an experiment's common assets.
pub const COMMON_ASSETS_DIR: &str = "Assets";

const SUITE_PREFIX: &str = "s_";
const EXPERIMENT_PREFIX: &str = "e_";

/// Options of a [`FilePlatform`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePlatformOptions {
    /// Link common assets into simulation directories instead of copying them.
    pub sym_link: bool,
    /// Use `<name>_<id>` for suite and experiment directories.
    pub name_directory: bool,
    /// Use `<name>_<id>` for simulation directories.
    pub sim_name_directory: bool,
    /// Path-length ceiling enforced before any write.
    pub max_path_length: Option<usize>,
    /// Local processes running at once.
    pub max_running_jobs: usize,
}

impl Default for FilePlatformOptions {
    fn default() -> Self {
        Self::from(&FlowConfig::default())
    }
}

impl From<&FlowConfig> for FilePlatformOptions {
    fn from(config: &FlowConfig) -> Self {
        Self {
            sym_link: config.sym_link,
            name_directory: config.name_directory,
            sim_name_directory: config.sim_name_directory,
            max_path_length: config.max_path_length,
            max_running_jobs: config.max_workers,
        }
    }
}

/// Platform persisting entities to a job directory and running simulations as local processes.
#[derive(Debug)]
pub struct FilePlatform {
    job_directory: PathBuf,
    options: FilePlatformOptions,
    metadata: JsonMetadataOperations,
    directories: Mutex<HashMap<ItemId, PathBuf>>,
    provisioned: Mutex<BTreeSet<String>>,
    runner: LocalRunner,
}

impl FilePlatform {
    /// Opens (creating if needed) the job directory.
    pub fn new(job_directory: impl Into<PathBuf>, options: FilePlatformOptions) -> Result<Self, FlowError> {
        let job_directory = job_directory.into();
        fs::create_dir_all(&job_directory).map_err(|err| {
            FlowError::io("job_dir", err).with_context("path", job_directory.display().to_string())
        })?;
        let job_directory = job_directory
            .canonicalize()
            .map_err(|err| FlowError::io("job_dir", err))?;
        Ok(Self {
            metadata: JsonMetadataOperations::new(&job_directory, options.max_path_length),
            runner: LocalRunner::new(options.max_running_jobs),
            job_directory,
            options,
            directories: Mutex::new(HashMap::new()),
            provisioned: Mutex::new(BTreeSet::new()),
        })
    }

    /// Root of the job directory.
    pub fn job_directory(&self) -> &Path {
        &self.job_directory
    }

    /// Platform options.
    pub fn options(&self) -> &FilePlatformOptions {
        &self.options
    }

    /// The metadata store.
    pub fn metadata(&self) -> &JsonMetadataOperations {
        &self.metadata
    }

    /// Directory name of an entity: `<name>_<id>` or `<id>`.
    pub fn entity_display_name(&self, meta: &EntityMeta) -> String {
        let named = match meta.item_type {
            ItemType::Simulation => self.options.name_directory && self.options.sim_name_directory,
            _ => self.options.name_directory,
        };
        let name = clean_name(&meta.name);
        if named && !name.is_empty() {
            format!("{name}_{}", meta.uid)
        } else {
            meta.uid.to_string()
        }
    }

    /// Directory of `item`, derived from its parent's directory.
    pub fn get_directory(&self, item: &Item) -> Result<PathBuf, FlowError> {
        if let Some(dir) = self.lock_directories()?.get(&item.uid()) {
            return Ok(dir.clone());
        }
        let meta = item.meta();
        let display = self.entity_display_name(meta);
        match item {
            Item::Suite(_) => Ok(self.job_directory.join(format!("{SUITE_PREFIX}{display}"))),
            Item::Experiment(_) => {
                let suite = meta.parent_id.ok_or_else(|| missing_parent(meta))?;
                Ok(self
                    .get_directory_by_id(suite, ItemType::Suite)?
                    .join(format!("{EXPERIMENT_PREFIX}{display}")))
            }
            Item::Simulation(_) => {
                let experiment = meta.parent_id.ok_or_else(|| missing_parent(meta))?;
                Ok(self.get_directory_by_id(experiment, ItemType::Experiment)?.join(display))
            }
        }
    }

    /// Directory of an existing entity, found by id.
    pub fn get_directory_by_id(&self, id: ItemId, item_type: ItemType) -> Result<PathBuf, FlowError> {
        if let Some(dir) = self.lock_directories()?.get(&id) {
            return Ok(dir.clone());
        }
        let dir = self.scan_directory(id, item_type)?;
        self.lock_directories()?.insert(id, dir.clone());
        Ok(dir)
    }

    /// Blocks until every locally running job finished.
    pub fn wait_for_jobs(&self) -> Result<(), FlowError> {
        self.runner.wait()
    }

    fn scan_directory(&self, id: ItemId, item_type: ItemType) -> Result<PathBuf, FlowError> {
        let (depth, prefix) = match item_type {
            ItemType::Suite => (1, SUITE_PREFIX),
            ItemType::Experiment => (2, EXPERIMENT_PREFIX),
            ItemType::Simulation => (3, ""),
            other => return Err(unsupported(other)),
        };
        let suffix = id.to_string();
        let walker = WalkDir::new(&self.job_directory)
            .min_depth(depth)
            .max_depth(depth)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|err| FlowError::io("job_dir_scan", err))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name.starts_with(prefix) && name.ends_with(&suffix) {
                return Ok(entry.into_path());
            }
        }
        Err(FlowError::NotFound(
            ErrorInfo::new("directory_not_found", "no directory for entity in job directory")
                .with_context("entity", suffix)
                .with_context("item_type", item_type.as_str()),
        ))
    }

    fn lock_directories(&self) -> Result<MutexGuard<'_, HashMap<ItemId, PathBuf>>, FlowError> {
        self.directories
            .lock()
            .map_err(|_| FlowError::Io(ErrorInfo::new("directory_cache_lock", "directory cache poisoned")))
    }

    fn lock_provisioned(&self) -> Result<MutexGuard<'_, BTreeSet<String>>, FlowError> {
        self.provisioned
            .lock()
            .map_err(|_| FlowError::Io(ErrorInfo::new("asset_registry_lock", "asset registry poisoned")))
    }

    fn make_directory(&self, dir: &Path) -> Result<(), FlowError> {
        self.metadata.check_path(dir)?;
        fs::create_dir_all(dir)
            .map_err(|err| FlowError::io("mk_directory", err).with_context("path", dir.display().to_string()))
    }

    fn write_asset(&self, dir: &Path, asset: &Asset) -> Result<(), FlowError> {
        let parent = if asset.relative_path().is_empty() {
            dir.to_path_buf()
        } else {
            dir.join(asset.relative_path())
        };
        let dest = parent.join(asset.filename());
        self.metadata.check_path(&dest)?;
        fs::create_dir_all(&parent).map_err(|err| FlowError::io("asset_dir", err))?;
        fs::write(&dest, asset.content()?.as_ref())
            .map_err(|err| FlowError::io("asset_write", err).with_context("path", dest.display().to_string()))
    }

    fn link_common_assets(&self, experiment_dir: &Path, simulation_dir: &Path) -> Result<(), FlowError> {
        let source = experiment_dir.join(COMMON_ASSETS_DIR);
        let link = simulation_dir.join(COMMON_ASSETS_DIR);
        if !source.exists() || link.exists() {
            return Ok(());
        }
        self.metadata.check_path(&link)?;
        if self.options.sym_link && self.capabilities().supports_symlinks {
            match symlink_dir(&source, &link) {
                Ok(()) => return Ok(()),
                Err(err) => warn!(error = %err, path = %link.display(), "symlink failed, copying assets"),
            }
        }
        copy_tree(&source, &link)
    }

    fn write_record(&self, dir: &Path, mut record: JobRecord) -> Result<(), FlowError> {
        record.directory = Some(dir.display().to_string());
        if record.created_at.is_none() {
            record = record.stamped();
        }
        self.metadata.dump(dir, &record)
    }

    fn link_experiment_to_suite(&self, suite_id: ItemId, experiment_id: ItemId) -> Result<(), FlowError> {
        let suite_dir = self.get_directory_by_id(suite_id, ItemType::Suite)?;
        let mut record = self.metadata.load(&suite_dir)?;
        let experiments = record.experiments.get_or_insert_with(Vec::new);
        if !experiments.contains(&experiment_id) {
            experiments.push(experiment_id);
            self.metadata.dump(&suite_dir, &record)?;
        }
        Ok(())
    }

    fn load_item(&self, dir: &Path) -> Result<Item, FlowError> {
        let record = self.metadata.load(dir)?;
        let mut item = Item::from_record(&record)?;
        if let Item::Simulation(simulation) = &mut item {
            simulation.meta.set_status(read_job_status(dir)?);
        }
        self.lock_directories()?.insert(record.id, dir.to_path_buf());
        Ok(item)
    }
}

impl Platform for FilePlatform {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            max_batch_size: None,
            max_name_length: None,
            supports_symlinks: cfg!(unix),
            filesystem: true,
        }
    }

    fn asset_exists(&self, checksum: &str) -> Result<bool, FlowError> {
        Ok(self.lock_provisioned()?.contains(checksum))
    }

    // Content is materialized with the entities that own it.
    fn upload_asset(&self, asset: &Asset) -> Result<String, FlowError> {
        let checksum = asset.checksum()?;
        self.lock_provisioned()?.insert(checksum.clone());
        Ok(checksum)
    }

    fn create_suite(&self, suite: &mut Suite) -> Result<ItemId, FlowError> {
        if suite.meta.platform_id.is_some() {
            return Ok(suite.uid());
        }
        let item = Item::Suite(suite.clone());
        let dir = self.get_directory(&item)?;
        self.make_directory(&dir)?;
        self.write_record(&dir, suite.record()?)?;
        suite.meta.platform_id = Some(suite.uid().to_string());
        self.lock_directories()?.insert(suite.uid(), dir.clone());
        info!(suite = %suite.uid(), path = %dir.display(), "created suite");
        Ok(suite.uid())
    }

    fn create_experiment(&self, experiment: &mut Experiment) -> Result<ItemId, FlowError> {
        if experiment.meta.platform_id.is_some() {
            return Ok(experiment.uid());
        }
        let suite_id = match experiment.meta.parent_id {
            Some(suite_id) => suite_id,
            None => {
                let mut suite = Suite::new(IMPLICIT_SUITE_NAME);
                suite.add_experiment(experiment);
                self.create_suite(&mut suite)?
            }
        };
        let dir = self.get_directory(&Item::Experiment(experiment.clone()))?;
        let assets_dir = dir.join(COMMON_ASSETS_DIR);
        self.make_directory(&assets_dir)?;
        let mut written = BTreeSet::new();
        for asset in experiment.common_assets.iter() {
            self.write_asset(&assets_dir, asset)?;
            written.insert(asset.checksum()?);
        }
        self.lock_provisioned()?.extend(written);
        self.write_record(&dir, experiment.record()?)?;
        self.lock_directories()?.insert(experiment.uid(), dir.clone());
        self.link_experiment_to_suite(suite_id, experiment.uid())?;
        experiment.meta.platform_id = Some(experiment.uid().to_string());
        info!(
            experiment = %experiment.uid(),
            common_assets = experiment.common_assets.len(),
            path = %dir.display(),
            "created experiment"
        );
        Ok(experiment.uid())
    }

    fn create_simulations(&self, batch: &mut [Simulation]) -> Result<Vec<ItemId>, FlowError> {
        let mut ids = Vec::with_capacity(batch.len());
        for simulation in batch.iter_mut() {
            if simulation.meta.platform_id.is_some() {
                ids.push(simulation.uid());
                continue;
            }
            let experiment_id = simulation
                .experiment_id()
                .ok_or_else(|| missing_parent(&simulation.meta))?;
            let experiment_dir = self.get_directory_by_id(experiment_id, ItemType::Experiment)?;
            let dir = experiment_dir.join(self.entity_display_name(&simulation.meta));
            self.make_directory(&dir)?;
            for asset in simulation.assets.iter() {
                self.write_asset(&dir, asset)?;
            }
            self.link_common_assets(&experiment_dir, &dir)?;
            let mut record = simulation.record()?;
            record
                .extra
                .insert("command".to_string(), Value::from(simulation.task.rendered_command()));
            self.write_record(&dir, record)?;
            self.lock_directories()?.insert(simulation.uid(), dir);
            simulation.meta.platform_id = Some(simulation.uid().to_string());
            ids.push(simulation.uid());
        }
        debug!(created = ids.len(), "created simulation batch");
        Ok(ids)
    }

    fn run_simulations(&self, experiment: &Experiment) -> Result<(), FlowError> {
        let mut jobs = Vec::with_capacity(experiment.simulations().len());
        for simulation in experiment.simulations() {
            if simulation.status().is_terminal() {
                continue;
            }
            jobs.push(RunnerJob {
                simulation: simulation.uid(),
                directory: self.get_directory_by_id(simulation.uid(), ItemType::Simulation)?,
                argv: simulation.task.rendered_command(),
            });
        }
        info!(experiment = %experiment.uid(), jobs = jobs.len(), "starting local jobs");
        self.runner.submit(jobs)
    }

    fn simulation_status(&self, id: ItemId) -> Result<EntityStatus, FlowError> {
        read_job_status(&self.get_directory_by_id(id, ItemType::Simulation)?)
    }

    fn get_item(&self, id: ItemId, item_type: ItemType, force: bool) -> Result<Item, FlowError> {
        let dir = if force {
            self.scan_directory(id, item_type)?
        } else {
            self.get_directory_by_id(id, item_type)?
        };
        self.load_item(&dir)
    }

    fn get_children(&self, item: &Item) -> Result<Vec<Item>, FlowError> {
        let Some(child_type) = child_type(item.item_type()) else {
            return Ok(Vec::new());
        };
        let dir = self.get_directory_by_id(item.uid(), item.item_type())?;
        let mut children = Vec::new();
        for document in self.metadata.get_children(&dir, child_type)? {
            let child_dir = document
                .get("directory")
                .and_then(Value::as_str)
                .map(PathBuf::from)
                .ok_or_else(|| {
                    FlowError::Serde(
                        ErrorInfo::new("metadata_directory", "record has no directory")
                            .with_context("parent", item.uid().to_string()),
                    )
                })?;
            children.push(self.load_item(&child_dir)?);
        }
        Ok(children)
    }

    fn get_files(
        &self,
        simulation: &Simulation,
        filenames: &[String],
    ) -> Result<BTreeMap<String, Vec<u8>>, FlowError> {
        let dir = self.get_directory_by_id(simulation.uid(), ItemType::Simulation)?;
        let mut files = BTreeMap::new();
        let mut missing = Vec::new();
        for filename in filenames {
            let path = dir.join(contained_path(filename)?);
            if !path.is_file() {
                missing.push(filename.clone());
                continue;
            }
            let bytes = fs::read(&path).map_err(|err| {
                FlowError::io("file_read", err).with_context("path", path.display().to_string())
            })?;
            files.insert(filename.clone(), bytes);
        }
        if !missing.is_empty() {
            return Err(files_not_found(simulation.uid(), &missing));
        }
        Ok(files)
    }

    fn persist_record(&self, item: &Item) -> Result<(), FlowError> {
        let dir = self.get_directory(item)?;
        let mut record = item.record()?;
        if let Ok(previous) = self.metadata.load(&dir) {
            record.created_at = previous.created_at;
            for (key, value) in previous.extra {
                record.extra.entry(key).or_insert(value);
            }
        }
        self.write_record(&dir, record)
    }

    fn cleanup(&self) -> Result<(), FlowError> {
        self.wait_for_jobs()
    }
}

/// `filename` as a path that stays inside the simulation directory.
fn contained_path(filename: &str) -> Result<&Path, FlowError> {
    let path = Path::new(filename);
    let contained = path
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if contained && path.components().next().is_some() {
        Ok(path)
    } else {
        Err(FlowError::validation(
            "output_path",
            "output file names must be relative and stay inside the simulation directory",
        )
        .with_context("filename", filename))
    }
}

pub(crate) fn files_not_found(simulation: ItemId, missing: &[String]) -> FlowError {
    FlowError::FileNotFound(
        ErrorInfo::new("files_not_found", format!("missing files: {}", missing.join(", ")))
            .with_context("entity", simulation.to_string())
            .with_context("missing", missing.join(",")),
    )
}

fn missing_parent(meta: &EntityMeta) -> FlowError {
    FlowError::Validation(
        ErrorInfo::new("missing_parent", "entity has no parent on this platform")
            .with_context("entity", meta.uid.to_string())
            .with_context("item_type", meta.item_type.as_str()),
    )
}

#[cfg(unix)]
fn symlink_dir(source: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(source, link)
}

#[cfg(windows)]
fn symlink_dir(source: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(source, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink_dir(_source: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "symbolic links unsupported"))
}

fn copy_tree(source: &Path, dest: &Path) -> Result<(), FlowError> {
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|err| FlowError::io("asset_copy_scan", err))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| FlowError::io("asset_copy_prefix", err))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|err| FlowError::io("asset_copy_dir", err))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|err| {
                FlowError::io("asset_copy", err).with_context("path", target.display().to_string())
            })?;
        }
    }
    Ok(())
}
