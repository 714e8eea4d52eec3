//! One sweep run: base task, common assets, builder and realized simulations.

use std::collections::BTreeMap;
use std::sync::Arc;

use simflow_assets::AssetCollection;
use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::status::EntityStatus;
use tracing::debug;

use crate::builder::SimulationBuilder;
use crate::entity::EntityMeta;
use crate::record::JobRecord;
use crate::simulation::{Simulation, TASK_TYPE_TAG, TYPE_TAG};
use crate::task::Task;

/// An experiment and the simulations realized from it.
#[derive(Debug, Clone)]
pub struct Experiment {
    /// Identity, tags and status.
    pub meta: EntityMeta,
    /// Task every simulation starts from.
    pub base_task: Task,
    /// Inputs shared by every simulation.
    pub common_assets: AssetCollection,
    /// Merge the base task's common assets at pre-creation.
    pub gather_common_assets_from_task: bool,
    simulations: Vec<Simulation>,
    builder: Option<Arc<dyn SimulationBuilder>>,
}

impl Experiment {
    /// Creates an experiment with no builder and no simulations.
    pub fn new(name: impl Into<String>, base_task: Task) -> Self {
        Self {
            meta: EntityMeta::new(ItemType::Experiment, name),
            base_task,
            common_assets: AssetCollection::new(),
            gather_common_assets_from_task: true,
            simulations: Vec::new(),
            builder: None,
        }
    }

    /// Creates an experiment whose simulations come from `builder`.
    pub fn from_builder(
        name: impl Into<String>,
        base_task: Task,
        builder: Arc<dyn SimulationBuilder>,
    ) -> Self {
        let mut experiment = Self::new(name, base_task);
        experiment.builder = Some(builder);
        experiment
    }

    /// Entity id.
    pub fn uid(&self) -> ItemId {
        self.meta.uid
    }

    /// Attaches a builder. Rejected once simulations were added by hand.
    pub fn set_builder(&mut self, builder: Arc<dyn SimulationBuilder>) -> Result<(), FlowError> {
        if !self.simulations.is_empty() {
            return Err(mixed_sources(self.meta.uid));
        }
        self.builder = Some(builder);
        Ok(())
    }

    /// The attached builder.
    pub fn builder(&self) -> Option<&Arc<dyn SimulationBuilder>> {
        self.builder.as_ref()
    }

    /// Adds a hand-built simulation. Rejected when a builder is attached.
    pub fn add_simulation(&mut self, mut simulation: Simulation) -> Result<(), FlowError> {
        if self.builder.is_some() {
            return Err(mixed_sources(self.meta.uid));
        }
        simulation.meta.parent_id = Some(self.meta.uid);
        self.simulations.push(simulation);
        Ok(())
    }

    /// Records simulations emitted by the builder.
    pub fn adopt_realized(&mut self, simulations: impl IntoIterator<Item = Simulation>) {
        for mut simulation in simulations {
            simulation.meta.parent_id = Some(self.meta.uid);
            self.simulations.push(simulation);
        }
    }

    /// Realized or hand-built simulations.
    pub fn simulations(&self) -> &[Simulation] {
        &self.simulations
    }

    /// Mutable access for status refreshes.
    pub fn simulations_mut(&mut self) -> &mut [Simulation] {
        &mut self.simulations
    }

    /// Number of simulations the experiment will hold once realized.
    pub fn expected_count(&self) -> usize {
        match &self.builder {
            Some(builder) => builder.count(),
            None => self.simulations.len(),
        }
    }

    /// Simulation every sweep point is derived from.
    pub fn base_simulation(&self) -> Simulation {
        let mut base = Simulation::new(self.base_task.clone());
        base.meta.parent_id = Some(self.meta.uid);
        base.meta.name = self.meta.name.clone();
        base
    }

    /// Gathers task assets, applies auto-tags and freezes the common collection.
    pub fn pre_creation(&mut self) -> Result<(), FlowError> {
        if self.gather_common_assets_from_task {
            let declared = self.base_task.common_assets.clone();
            self.common_assets.merge(&declared)?;
        }
        self.meta
            .tags
            .entry(TASK_TYPE_TAG.to_string())
            .or_insert_with(|| self.base_task.task_type.clone());
        self.meta
            .tags
            .entry(TYPE_TAG.to_string())
            .or_insert_with(|| ItemType::Experiment.to_string());
        self.common_assets.freeze();
        debug!(
            experiment = %self.meta.uid,
            common_assets = self.common_assets.len(),
            "experiment pre-creation complete"
        );
        Ok(())
    }

    /// Number of simulations per status.
    pub fn status_counts(&self) -> BTreeMap<EntityStatus, usize> {
        let mut counts = BTreeMap::new();
        for simulation in &self.simulations {
            *counts.entry(simulation.status()).or_insert(0) += 1;
        }
        counts
    }

    /// True when every simulation reached a terminal status.
    pub fn done(&self) -> bool {
        self.simulations.iter().all(|sim| sim.status().is_terminal())
    }

    /// True when every simulation succeeded.
    pub fn succeeded(&self) -> bool {
        self.simulations
            .iter()
            .all(|sim| sim.status() == EntityStatus::Succeeded)
    }

    /// Derives the experiment status from its simulations.
    ///
    /// Once every simulation is terminal, any success makes the experiment
    /// succeed and an all-failed group makes it fail.
    pub fn refresh_aggregate_status(&mut self) -> EntityStatus {
        match EntityStatus::aggregate(self.simulations.iter().map(Simulation::status)) {
            Some(observed) => self.meta.set_status(observed),
            None => self.meta.status(),
        }
    }

    /// Metadata view.
    pub fn record(&self) -> Result<JobRecord, FlowError> {
        let mut record = JobRecord::new(self.meta.uid, ItemType::Experiment);
        record.parent_id = self.meta.parent_id;
        record.name = self.meta.name.clone();
        record.status = self.meta.status();
        record.tags = self.meta.tags.clone();
        record.assets = self.common_assets.records()?;
        record.type_tag = self.base_task.task_type.clone();
        record.platform_id = self.meta.platform_id.clone();
        record.task = Some(self.base_task.record());
        record.simulations = Some(self.simulations.iter().map(Simulation::uid).collect());
        Ok(record)
    }

    /// Rebuilds an experiment shell from its record. Simulations are not attached.
    pub fn from_record(record: &JobRecord) -> Experiment {
        let task = record.task.as_ref().map(Task::from_record).unwrap_or_default();
        let mut experiment = Experiment::new(record.name.clone(), task);
        experiment.meta.uid = record.id;
        experiment.meta.parent_id = record.parent_id;
        experiment.meta.tags = record.tags.clone();
        experiment.meta.platform_id = record.platform_id.clone();
        experiment.meta.set_status(record.status);
        experiment
    }
}

fn mixed_sources(experiment: ItemId) -> FlowError {
    FlowError::Validation(
        ErrorInfo::new(
            "experiment_mixed_sources",
            "simulations must come either from a builder or be added by hand, not both",
        )
        .with_context("experiment", experiment.to_string()),
    )
}
