use simflow_core::errors::FlowError;
use simflow_core::ids::{ItemId, ItemType};

use crate::entity::EntityMeta;
use crate::experiment::Experiment;
use crate::record::JobRecord;

/// Name given to the suite a filesystem backend creates for a suite-less experiment.
pub const IMPLICIT_SUITE_NAME: &str = "Suite";

/// Optional grouping of experiments, linked by id.
#[derive(Debug, Clone)]
pub struct Suite {
    /// Identity, tags and status.
    pub meta: EntityMeta,
    experiment_ids: Vec<ItemId>,
}

impl Suite {
    /// Creates an empty suite.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: EntityMeta::new(ItemType::Suite, name),
            experiment_ids: Vec::new(),
        }
    }

    /// Entity id.
    pub fn uid(&self) -> ItemId {
        self.meta.uid
    }

    /// Links an experiment to this suite and sets its parent id.
    pub fn add_experiment(&mut self, experiment: &mut Experiment) {
        experiment.meta.parent_id = Some(self.meta.uid);
        if !self.experiment_ids.contains(&experiment.uid()) {
            self.experiment_ids.push(experiment.uid());
        }
    }

    /// Ids of linked experiments, in insertion order.
    pub fn experiment_ids(&self) -> &[ItemId] {
        &self.experiment_ids
    }

    /// Metadata view.
    pub fn record(&self) -> Result<JobRecord, FlowError> {
        let mut record = JobRecord::new(self.meta.uid, ItemType::Suite);
        record.name = self.meta.name.clone();
        record.status = self.meta.status();
        record.tags = self.meta.tags.clone();
        record.type_tag = ItemType::Suite.to_string();
        record.platform_id = self.meta.platform_id.clone();
        record.experiments = Some(self.experiment_ids.clone());
        Ok(record)
    }

    /// Rebuilds a suite from its record.
    pub fn from_record(record: &JobRecord) -> Suite {
        let mut suite = Suite::new(record.name.clone());
        suite.meta.uid = record.id;
        suite.meta.tags = record.tags.clone();
        suite.meta.platform_id = record.platform_id.clone();
        suite.meta.set_status(record.status);
        suite.experiment_ids = record.experiments.clone().unwrap_or_default();
        suite
    }
}
