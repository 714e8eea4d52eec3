//! One concrete parameterization of a task.

use simflow_assets::AssetCollection;
use simflow_core::errors::FlowError;
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::status::EntityStatus;

use crate::entity::EntityMeta;
use crate::record::JobRecord;
use crate::task::Task;

/// Tag holding the task type label.
pub const TASK_TYPE_TAG: &str = "task_type";
/// Tag holding the entity type label.
pub const TYPE_TAG: &str = "type";

/// A single unit of execution.
#[derive(Debug, Clone)]
pub struct Simulation {
    /// Identity, tags and status.
    pub meta: EntityMeta,
    /// Parameterized task.
    pub task: Task,
    /// Transient assets owned by this simulation.
    pub assets: AssetCollection,
    /// Output files reported after the run.
    pub outputs: Vec<String>,
}

impl Simulation {
    /// Wraps a task in a new simulation.
    pub fn new(task: Task) -> Self {
        Self {
            meta: EntityMeta::new(ItemType::Simulation, ""),
            task,
            assets: AssetCollection::new(),
            outputs: Vec::new(),
        }
    }

    /// Id of the owning experiment.
    pub fn experiment_id(&self) -> Option<ItemId> {
        self.meta.parent_id
    }

    /// Entity id.
    pub fn uid(&self) -> ItemId {
        self.meta.uid
    }

    /// Current status.
    pub fn status(&self) -> EntityStatus {
        self.meta.status()
    }

    /// Deep copy with a fresh identity, used to realize sweep points.
    pub fn derive(&self) -> Simulation {
        let mut meta = EntityMeta::new(ItemType::Simulation, self.meta.name.clone());
        meta.parent_id = self.meta.parent_id;
        meta.tags = self.meta.tags.clone();
        Simulation {
            meta,
            task: self.task.clone(),
            assets: self.assets.copy(),
            outputs: Vec::new(),
        }
    }

    /// Merges task-declared transient assets, applies auto-tags and freezes the collection.
    pub fn pre_creation(&mut self) -> Result<(), FlowError> {
        if self.assets.is_frozen() {
            return Ok(());
        }
        let gathered = self.task.gather_transient_assets()?;
        for asset in gathered.iter() {
            self.assets.add_or_replace(asset.clone())?;
        }
        self.meta
            .merge_tags([(TASK_TYPE_TAG, self.task.task_type.clone())]);
        self.meta
            .tags
            .entry(TYPE_TAG.to_string())
            .or_insert_with(|| ItemType::Simulation.to_string());
        self.assets.freeze();
        Ok(())
    }

    /// Metadata view.
    pub fn record(&self) -> Result<JobRecord, FlowError> {
        let mut record = JobRecord::new(self.meta.uid, ItemType::Simulation);
        record.parent_id = self.meta.parent_id;
        record.name = self.meta.name.clone();
        record.status = self.meta.status();
        record.tags = self.meta.tags.clone();
        record.assets = self.assets.records()?;
        record.type_tag = self.task.task_type.clone();
        record.platform_id = self.meta.platform_id.clone();
        record.task = Some(self.task.record());
        Ok(record)
    }

    /// Rebuilds a simulation from its record. Asset content is not restored.
    pub fn from_record(record: &JobRecord) -> Simulation {
        let mut meta = EntityMeta::new(ItemType::Simulation, record.name.clone());
        meta.uid = record.id;
        meta.parent_id = record.parent_id;
        meta.tags = record.tags.clone();
        meta.platform_id = record.platform_id.clone();
        meta.set_status(record.status);
        let task = record.task.as_ref().map(Task::from_record).unwrap_or_default();
        Simulation {
            meta,
            task,
            assets: AssetCollection::new(),
            outputs: Vec::new(),
        }
    }
}
