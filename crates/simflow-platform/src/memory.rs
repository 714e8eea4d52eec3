//! In-process backend.
//!
//! Keeps records and file contents in memory, counts asset writes per
//! checksum and lets callers script simulation outcomes, output files,
//! creation failures and transient outages.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use simflow_assets::Asset;
use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::status::EntityStatus;
use simflow_model::{Experiment, JobRecord, Simulation, Suite};
use tracing::debug;

use crate::capabilities::Capabilities;
use crate::file::files_not_found;
use crate::item::{child_type, Item};
use crate::platform::Platform;

#[derive(Debug)]
struct MemoryState {
    records: HashMap<ItemId, JobRecord>,
    children: HashMap<ItemId, Vec<ItemId>>,
    assets: HashMap<String, Vec<u8>>,
    asset_writes: HashMap<String, usize>,
    started: HashSet<ItemId>,
    scripted: HashMap<ItemId, EntityStatus>,
    files: HashMap<ItemId, BTreeMap<String, Vec<u8>>>,
    default_outcome: EntityStatus,
    rejected_tags: Vec<(String, String)>,
    outages: u32,
    get_files_calls: usize,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            children: HashMap::new(),
            assets: HashMap::new(),
            asset_writes: HashMap::new(),
            started: HashSet::new(),
            scripted: HashMap::new(),
            files: HashMap::new(),
            default_outcome: EntityStatus::Succeeded,
            rejected_tags: Vec::new(),
            outages: 0,
            get_files_calls: 0,
        }
    }
}

/// Platform keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    capabilities: Capabilities,
    state: Mutex<MemoryState>,
}

impl MemoryPlatform {
    /// Empty platform without constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty platform declaring `capabilities`.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Status every started simulation reports unless scripted otherwise. Defaults to succeeded.
    pub fn set_default_outcome(&self, status: EntityStatus) -> Result<(), FlowError> {
        self.lock()?.default_outcome = status;
        Ok(())
    }

    /// Forces the status a simulation reports.
    pub fn script_status(&self, simulation: ItemId, status: EntityStatus) -> Result<(), FlowError> {
        self.lock()?.scripted.insert(simulation, status);
        Ok(())
    }

    /// Makes `content` available as `filename` of a simulation.
    pub fn put_file(&self, simulation: ItemId, filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Result<(), FlowError> {
        self.lock()?
            .files
            .entry(simulation)
            .or_default()
            .insert(filename.into(), content.into());
        Ok(())
    }

    /// Rejects creation of any batch holding a simulation tagged `key = value`.
    pub fn reject_tagged(&self, key: impl Into<String>, value: impl Into<String>) -> Result<(), FlowError> {
        self.lock()?.rejected_tags.push((key.into(), value.into()));
        Ok(())
    }

    /// Fails the next `count` backend calls with `PlatformUnavailable`.
    pub fn inject_outages(&self, count: u32) -> Result<(), FlowError> {
        self.lock()?.outages = count;
        Ok(())
    }

    /// Times content with `checksum` was written.
    pub fn asset_writes(&self, checksum: &str) -> Result<usize, FlowError> {
        Ok(self.lock()?.asset_writes.get(checksum).copied().unwrap_or(0))
    }

    /// Asset writes across every checksum.
    pub fn total_asset_writes(&self) -> Result<usize, FlowError> {
        Ok(self.lock()?.asset_writes.values().sum())
    }

    /// Number of `get_files` calls served.
    pub fn get_files_calls(&self) -> Result<usize, FlowError> {
        Ok(self.lock()?.get_files_calls)
    }

    /// Ids of created simulations under `experiment`, in creation order.
    pub fn simulation_ids(&self, experiment: ItemId) -> Result<Vec<ItemId>, FlowError> {
        Ok(self.lock()?.children.get(&experiment).cloned().unwrap_or_default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, FlowError> {
        self.state
            .lock()
            .map_err(|_| FlowError::Io(ErrorInfo::new("memory_platform_lock", "platform state poisoned")))
    }

    /// Locks the state, consuming one scripted outage if any is pending.
    fn available(&self, operation: &str) -> Result<MutexGuard<'_, MemoryState>, FlowError> {
        let mut state = self.lock()?;
        if state.outages > 0 {
            state.outages -= 1;
            return Err(FlowError::PlatformUnavailable(
                ErrorInfo::new("memory_outage", "scripted outage").with_context("operation", operation),
            ));
        }
        Ok(state)
    }
}

impl MemoryState {
    fn status_of(&self, id: ItemId) -> Result<EntityStatus, FlowError> {
        if !self.records.contains_key(&id) {
            return Err(not_found(id));
        }
        Ok(match self.scripted.get(&id) {
            Some(status) => *status,
            None if self.started.contains(&id) => self.default_outcome,
            None => EntityStatus::Created,
        })
    }

    fn register(&mut self, record: JobRecord) {
        if let Some(parent) = record.parent_id {
            let siblings = self.children.entry(parent).or_default();
            if !siblings.contains(&record.id) {
                siblings.push(record.id);
            }
        }
        self.records.insert(record.id, record);
    }

    fn item(&self, id: ItemId) -> Result<Item, FlowError> {
        let record = self.records.get(&id).ok_or_else(|| not_found(id))?;
        let mut item = Item::from_record(record)?;
        if record.item_type == ItemType::Simulation {
            let status = self.status_of(id)?;
            item.meta_mut().set_status(status);
        }
        Ok(item)
    }
}

impl Platform for MemoryPlatform {
    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    fn asset_exists(&self, checksum: &str) -> Result<bool, FlowError> {
        Ok(self.available("asset_exists")?.assets.contains_key(checksum))
    }

    fn upload_asset(&self, asset: &Asset) -> Result<String, FlowError> {
        let checksum = asset.checksum()?;
        let content = asset.content()?.into_owned();
        let mut state = self.available("upload_asset")?;
        *state.asset_writes.entry(checksum.clone()).or_insert(0) += 1;
        state.assets.insert(checksum.clone(), content);
        debug!(checksum = %checksum, "stored asset");
        Ok(checksum)
    }

    fn create_suite(&self, suite: &mut Suite) -> Result<ItemId, FlowError> {
        let mut state = self.available("create_suite")?;
        if !state.records.contains_key(&suite.uid()) {
            state.register(suite.record()?.stamped());
        }
        suite.meta.platform_id = Some(suite.uid().to_string());
        Ok(suite.uid())
    }

    fn create_experiment(&self, experiment: &mut Experiment) -> Result<ItemId, FlowError> {
        let mut state = self.available("create_experiment")?;
        if !state.records.contains_key(&experiment.uid()) {
            state.register(experiment.record()?.stamped());
        }
        experiment.meta.platform_id = Some(experiment.uid().to_string());
        Ok(experiment.uid())
    }

    fn create_simulations(&self, batch: &mut [Simulation]) -> Result<Vec<ItemId>, FlowError> {
        let mut state = self.available("create_simulations")?;
        for simulation in batch.iter() {
            let rejected = state
                .rejected_tags
                .iter()
                .find(|(key, value)| simulation.meta.tags.get(key) == Some(value));
            if let Some((key, value)) = rejected {
                return Err(FlowError::CreationFailure(
                    ErrorInfo::new("simulation_rejected", "platform rejected the batch")
                        .with_context("entity", simulation.uid().to_string())
                        .with_context("tag", format!("{key}={value}")),
                ));
            }
        }
        let mut ids = Vec::with_capacity(batch.len());
        for simulation in batch.iter_mut() {
            if !state.records.contains_key(&simulation.uid()) {
                state.register(simulation.record()?.stamped());
            }
            simulation.meta.platform_id = Some(simulation.uid().to_string());
            ids.push(simulation.uid());
        }
        Ok(ids)
    }

    fn run_simulations(&self, experiment: &Experiment) -> Result<(), FlowError> {
        let mut state = self.available("run_simulations")?;
        for simulation in experiment.simulations() {
            if state.records.contains_key(&simulation.uid()) {
                state.started.insert(simulation.uid());
            }
        }
        Ok(())
    }

    fn simulation_status(&self, id: ItemId) -> Result<EntityStatus, FlowError> {
        self.available("simulation_status")?.status_of(id)
    }

    fn get_item(&self, id: ItemId, item_type: ItemType, _force: bool) -> Result<Item, FlowError> {
        let item = self.available("get_item")?.item(id)?;
        if item.item_type() != item_type {
            return Err(not_found(id).with_context("item_type", item_type.as_str()));
        }
        Ok(item)
    }

    fn get_children(&self, item: &Item) -> Result<Vec<Item>, FlowError> {
        if child_type(item.item_type()).is_none() {
            return Ok(Vec::new());
        }
        let state = self.available("get_children")?;
        state
            .children
            .get(&item.uid())
            .map(|ids| ids.iter().map(|id| state.item(*id)).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn get_files(
        &self,
        simulation: &Simulation,
        filenames: &[String],
    ) -> Result<BTreeMap<String, Vec<u8>>, FlowError> {
        let mut state = self.available("get_files")?;
        state.get_files_calls += 1;
        let stored = state.files.get(&simulation.uid());
        let mut files = BTreeMap::new();
        let mut missing = Vec::new();
        for filename in filenames {
            match stored.and_then(|stored| stored.get(filename)) {
                Some(content) => {
                    files.insert(filename.clone(), content.clone());
                }
                None => missing.push(filename.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(files_not_found(simulation.uid(), &missing));
        }
        Ok(files)
    }

    fn persist_record(&self, item: &Item) -> Result<(), FlowError> {
        let mut record = item.record()?;
        let mut state = self.available("persist_record")?;
        record.created_at = state
            .records
            .get(&record.id)
            .and_then(|previous| previous.created_at.clone());
        state.register(record);
        Ok(())
    }
}

fn not_found(id: ItemId) -> FlowError {
    FlowError::NotFound(
        ErrorInfo::new("item_not_found", "unknown entity").with_context("entity", id.to_string()),
    )
}
