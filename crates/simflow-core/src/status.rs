//! Entity lifecycle status.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, FlowError};

/// Lifecycle status shared by suites, experiments and simulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// Exists in memory only.
    #[default]
    Created,
    /// Submitted to the platform, not yet running.
    Commissioning,
    /// Executing on the platform.
    Running,
    /// Finished successfully. Terminal.
    Succeeded,
    /// Finished unsuccessfully. Terminal.
    Failed,
    /// Canceled before completion. Terminal.
    Canceled,
}

impl EntityStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [EntityStatus; 6] = [
        EntityStatus::Created,
        EntityStatus::Commissioning,
        EntityStatus::Running,
        EntityStatus::Succeeded,
        EntityStatus::Failed,
        EntityStatus::Canceled,
    ];

    /// Returns true for statuses that can never be left once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntityStatus::Succeeded | EntityStatus::Failed | EntityStatus::Canceled
        )
    }

    /// Resolves the status an entity holds after observing `observed`.
    ///
    /// Terminal statuses are sticky: once reached, later observations are ignored.
    pub fn transition(self, observed: EntityStatus) -> EntityStatus {
        if self.is_terminal() {
            self
        } else {
            observed
        }
    }

    /// Folds child statuses into the status of their parent.
    ///
    /// Once every child is terminal, any success yields `Succeeded`, an
    /// all-canceled group `Canceled` and anything else `Failed`. Returns `None`
    /// for an empty group.
    pub fn aggregate<I>(statuses: I) -> Option<EntityStatus>
    where
        I: IntoIterator<Item = EntityStatus>,
    {
        let statuses: Vec<EntityStatus> = statuses.into_iter().collect();
        if statuses.is_empty() {
            return None;
        }
        let has = |wanted: EntityStatus| statuses.iter().any(|status| *status == wanted);
        let aggregated = if statuses.iter().all(EntityStatus::is_terminal) {
            if has(EntityStatus::Succeeded) {
                EntityStatus::Succeeded
            } else if statuses.iter().all(|status| *status == EntityStatus::Canceled) {
                EntityStatus::Canceled
            } else {
                EntityStatus::Failed
            }
        } else if statuses
            .iter()
            .any(|status| !matches!(status, EntityStatus::Created | EntityStatus::Commissioning))
        {
            EntityStatus::Running
        } else if has(EntityStatus::Commissioning) {
            EntityStatus::Commissioning
        } else {
            EntityStatus::Created
        };
        Some(aggregated)
    }

    /// Returns the lowercase label used in metadata records.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Created => "created",
            EntityStatus::Commissioning => "commissioning",
            EntityStatus::Running => "running",
            EntityStatus::Succeeded => "succeeded",
            EntityStatus::Failed => "failed",
            EntityStatus::Canceled => "canceled",
        }
    }
}

impl Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityStatus {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                FlowError::Validation(
                    ErrorInfo::new("status_parse", "unknown entity status").with_context("value", s),
                )
            })
    }
}
