//! Outcome of an experiment run.

use std::collections::BTreeMap;

use simflow_core::errors::FlowError;
use simflow_core::ids::ItemId;
use simflow_core::status::EntityStatus;

/// A creation batch the platform rejected.
#[derive(Debug, Clone)]
pub struct BatchFailure {
    /// Zero-based batch index.
    pub batch: usize,
    /// Simulations in the batch.
    pub simulations: Vec<ItemId>,
    /// Error the platform returned.
    pub error: FlowError,
}

/// Summary returned by [`crate::ExperimentManager::run`].
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    /// The experiment.
    pub experiment: ItemId,
    /// Simulations the builder announced.
    pub expected: usize,
    /// Simulations the platform accepted.
    pub created: usize,
    /// Unique asset checksums provisioned.
    pub unique_assets: usize,
    /// Batches that failed creation.
    pub failed_batches: Vec<BatchFailure>,
    /// Simulations per status at the last refresh.
    pub status_counts: BTreeMap<EntityStatus, usize>,
    /// Aggregate experiment status at the last refresh.
    pub status: EntityStatus,
}

impl ExperimentReport {
    pub(crate) fn new(experiment: ItemId) -> Self {
        Self {
            experiment,
            expected: 0,
            created: 0,
            unique_assets: 0,
            failed_batches: Vec::new(),
            status_counts: BTreeMap::new(),
            status: EntityStatus::Created,
        }
    }

    /// True when every batch was created and every simulation succeeded.
    pub fn success(&self) -> bool {
        self.failed_batches.is_empty()
            && self.status == EntityStatus::Succeeded
            && self
                .status_counts
                .iter()
                .all(|(status, count)| *status == EntityStatus::Succeeded || *count == 0)
    }

    /// `created=1,running=2` rendering of the status distribution.
    pub fn distribution(&self) -> String {
        render_distribution(&self.status_counts)
    }
}

pub(crate) fn render_distribution(counts: &BTreeMap<EntityStatus, usize>) -> String {
    counts
        .iter()
        .map(|(status, count)| format!("{}={count}", status.as_str()))
        .collect::<Vec<_>>()
        .join(",")
}
