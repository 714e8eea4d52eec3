//! Type-erased handle over suites, experiments and simulations.

use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::status::EntityStatus;
use simflow_model::{EntityMeta, Experiment, JobRecord, Simulation, Suite};

/// Any entity a platform can hold.
#[derive(Debug, Clone)]
pub enum Item {
    /// A suite.
    Suite(Suite),
    /// An experiment.
    Experiment(Experiment),
    /// A simulation.
    Simulation(Simulation),
}

impl Item {
    /// Entity id.
    pub fn uid(&self) -> ItemId {
        self.meta().uid
    }

    /// Entity kind.
    pub fn item_type(&self) -> ItemType {
        match self {
            Item::Suite(_) => ItemType::Suite,
            Item::Experiment(_) => ItemType::Experiment,
            Item::Simulation(_) => ItemType::Simulation,
        }
    }

    /// Shared metadata.
    pub fn meta(&self) -> &EntityMeta {
        match self {
            Item::Suite(suite) => &suite.meta,
            Item::Experiment(experiment) => &experiment.meta,
            Item::Simulation(simulation) => &simulation.meta,
        }
    }

    /// Mutable shared metadata.
    pub fn meta_mut(&mut self) -> &mut EntityMeta {
        match self {
            Item::Suite(suite) => &mut suite.meta,
            Item::Experiment(experiment) => &mut experiment.meta,
            Item::Simulation(simulation) => &mut simulation.meta,
        }
    }

    /// Current status.
    pub fn status(&self) -> EntityStatus {
        self.meta().status()
    }

    /// Metadata record.
    pub fn record(&self) -> Result<JobRecord, FlowError> {
        match self {
            Item::Suite(suite) => suite.record(),
            Item::Experiment(experiment) => experiment.record(),
            Item::Simulation(simulation) => simulation.record(),
        }
    }

    /// Rebuilds an entity shell from its record.
    pub fn from_record(record: &JobRecord) -> Result<Item, FlowError> {
        match record.item_type {
            ItemType::Suite => Ok(Item::Suite(Suite::from_record(record))),
            ItemType::Experiment => Ok(Item::Experiment(Experiment::from_record(record))),
            ItemType::Simulation => Ok(Item::Simulation(Simulation::from_record(record))),
            other => Err(unsupported(other)),
        }
    }

    /// Unwraps a simulation.
    pub fn into_simulation(self) -> Result<Simulation, FlowError> {
        match self {
            Item::Simulation(simulation) => Ok(simulation),
            other => Err(type_mismatch(ItemType::Simulation, &other)),
        }
    }

    /// Unwraps an experiment.
    pub fn into_experiment(self) -> Result<Experiment, FlowError> {
        match self {
            Item::Experiment(experiment) => Ok(experiment),
            other => Err(type_mismatch(ItemType::Experiment, &other)),
        }
    }

    /// Unwraps a suite.
    pub fn into_suite(self) -> Result<Suite, FlowError> {
        match self {
            Item::Suite(suite) => Ok(suite),
            other => Err(type_mismatch(ItemType::Suite, &other)),
        }
    }
}

impl From<Suite> for Item {
    fn from(suite: Suite) -> Self {
        Item::Suite(suite)
    }
}

impl From<Experiment> for Item {
    fn from(experiment: Experiment) -> Self {
        Item::Experiment(experiment)
    }
}

impl From<Simulation> for Item {
    fn from(simulation: Simulation) -> Self {
        Item::Simulation(simulation)
    }
}

/// Kind of the entity owning `item_type`, if any.
pub fn parent_type(item_type: ItemType) -> Option<ItemType> {
    match item_type {
        ItemType::Simulation => Some(ItemType::Experiment),
        ItemType::Experiment => Some(ItemType::Suite),
        _ => None,
    }
}

/// Kind of the entities owned by `item_type`, if any.
pub fn child_type(item_type: ItemType) -> Option<ItemType> {
    match item_type {
        ItemType::Suite => Some(ItemType::Experiment),
        ItemType::Experiment => Some(ItemType::Simulation),
        _ => None,
    }
}

pub(crate) fn unsupported(item_type: ItemType) -> FlowError {
    FlowError::Validation(
        ErrorInfo::new("item_type_unsupported", "platforms hold suites, experiments and simulations only")
            .with_context("item_type", item_type.as_str()),
    )
}

fn type_mismatch(expected: ItemType, found: &Item) -> FlowError {
    FlowError::Validation(
        ErrorInfo::new("item_type_mismatch", "entity is not of the expected type")
            .with_context("expected", expected.as_str())
            .with_context("found", found.item_type().as_str())
            .with_context("entity", found.uid().to_string()),
    )
}
