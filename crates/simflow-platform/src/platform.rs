//! The contract every backend implements.

use std::collections::BTreeMap;
use std::fmt::Debug;

use simflow_assets::Asset;
use simflow_core::errors::FlowError;
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::status::EntityStatus;
use simflow_model::{Experiment, Simulation, Suite};

use crate::capabilities::{Capabilities, Violation};
use crate::item::{parent_type, Item};

/// A backend holding entities and running simulations.
///
/// Implementations must be safe for concurrent calls from every worker of a
/// run. Ids assigned at creation are durable, and `get_files` is read-only:
/// repeated calls for a terminal simulation return identical bytes.
pub trait Platform: Send + Sync + Debug {
    /// Declared constraints and features.
    fn capabilities(&self) -> Capabilities;

    /// Constraint violations of `item`. Empty when the entity is acceptable.
    fn validate(&self, item: &Item) -> Vec<Violation> {
        self.capabilities().check(item)
    }

    /// True when content with `checksum` is already stored.
    fn asset_exists(&self, checksum: &str) -> Result<bool, FlowError>;

    /// Stores an asset's content and returns its platform id.
    fn upload_asset(&self, asset: &Asset) -> Result<String, FlowError>;

    /// Creates a suite. Creating an already created suite returns its id unchanged.
    fn create_suite(&self, suite: &mut Suite) -> Result<ItemId, FlowError>;

    /// Creates an experiment with its common assets. Idempotent like [`Platform::create_suite`].
    fn create_experiment(&self, experiment: &mut Experiment) -> Result<ItemId, FlowError>;

    /// Creates a batch of simulations under their parent experiment. Idempotent per simulation.
    fn create_simulations(&self, batch: &mut [Simulation]) -> Result<Vec<ItemId>, FlowError>;

    /// Starts every created simulation of `experiment`.
    fn run_simulations(&self, experiment: &Experiment) -> Result<(), FlowError>;

    /// Latest status the backend observed for a simulation.
    fn simulation_status(&self, id: ItemId) -> Result<EntityStatus, FlowError>;

    /// Looks an entity up. `force` bypasses any local cache.
    fn get_item(&self, id: ItemId, item_type: ItemType, force: bool) -> Result<Item, FlowError>;

    /// Children of `item` with status and tags populated.
    fn get_children(&self, item: &Item) -> Result<Vec<Item>, FlowError>;

    /// Contents of the requested files of a simulation, keyed by file name.
    ///
    /// Fails with `FileNotFound` naming every missing file.
    fn get_files(
        &self,
        simulation: &Simulation,
        filenames: &[String],
    ) -> Result<BTreeMap<String, Vec<u8>>, FlowError>;

    /// Writes the durable record of `item`, for backends that keep one.
    fn persist_record(&self, _item: &Item) -> Result<(), FlowError> {
        Ok(())
    }

    /// Releases backend resources held for the run.
    fn cleanup(&self) -> Result<(), FlowError> {
        Ok(())
    }

    /// Creates any entity, dispatching on its kind.
    fn create(&self, item: &mut Item) -> Result<ItemId, FlowError> {
        match item {
            Item::Suite(suite) => self.create_suite(suite),
            Item::Experiment(experiment) => self.create_experiment(experiment),
            Item::Simulation(simulation) => {
                let ids = self.create_simulations(std::slice::from_mut(simulation))?;
                Ok(ids.into_iter().next().unwrap_or(simulation.meta.uid))
            }
        }
    }

    /// Updates `item` to the latest observed status. Terminal statuses never change.
    fn refresh_status(&self, item: &mut Item) -> Result<EntityStatus, FlowError> {
        match item {
            Item::Simulation(simulation) => {
                let observed = self.simulation_status(simulation.uid())?;
                Ok(simulation.meta.set_status(observed))
            }
            Item::Experiment(experiment) => {
                if experiment.simulations().is_empty() {
                    let children = self.get_children(&Item::Experiment(experiment.clone()))?;
                    let simulations = children
                        .into_iter()
                        .map(Item::into_simulation)
                        .collect::<Result<Vec<_>, _>>()?;
                    experiment.adopt_realized(simulations);
                }
                for simulation in experiment.simulations_mut() {
                    let observed = self.simulation_status(simulation.uid())?;
                    simulation.meta.set_status(observed);
                }
                Ok(experiment.refresh_aggregate_status())
            }
            Item::Suite(suite) => {
                let mut statuses = Vec::new();
                for mut child in self.get_children(&Item::Suite(suite.clone()))? {
                    statuses.push(self.refresh_status(&mut child)?);
                }
                Ok(match EntityStatus::aggregate(statuses) {
                    Some(observed) => suite.meta.set_status(observed),
                    None => suite.meta.status(),
                })
            }
        }
    }

    /// Owner of `item`, if it has one.
    fn get_parent(&self, item: &Item) -> Result<Option<Item>, FlowError> {
        match (item.meta().parent_id, parent_type(item.item_type())) {
            (Some(parent_id), Some(parent_type)) => {
                self.get_item(parent_id, parent_type, false).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Simulation leaves reachable from `item`.
    fn flatten_item(&self, item: &Item) -> Result<Vec<Simulation>, FlowError> {
        match item {
            Item::Simulation(simulation) => Ok(vec![simulation.clone()]),
            Item::Experiment(_) => self
                .get_children(item)?
                .into_iter()
                .map(Item::into_simulation)
                .collect(),
            Item::Suite(_) => {
                let mut leaves = Vec::new();
                for child in self.get_children(item)? {
                    leaves.extend(self.flatten_item(&child)?);
                }
                Ok(leaves)
            }
        }
    }
}
