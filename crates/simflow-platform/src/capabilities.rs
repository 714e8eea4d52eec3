//! Backend constraints and the violations they report.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_core::ids::ItemId;

use crate::item::Item;

/// Constraints and features a backend declares to the managers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// Largest number of simulations accepted per creation call.
    #[serde(default)]
    pub max_batch_size: Option<usize>,
    /// Longest entity name accepted.
    #[serde(default)]
    pub max_name_length: Option<usize>,
    /// Files may be placed through symbolic links.
    #[serde(default)]
    pub supports_symlinks: bool,
    /// Entities live in a job directory on a filesystem.
    #[serde(default)]
    pub filesystem: bool,
}

impl Capabilities {
    /// Batch size honouring the backend ceiling. Never zero.
    pub fn effective_batch_size(&self, requested: usize) -> usize {
        let requested = requested.max(1);
        match self.max_batch_size {
            Some(limit) => requested.min(limit.max(1)),
            None => requested,
        }
    }

    /// Checks an entity against the declared constraints.
    pub fn check(&self, item: &Item) -> Vec<Violation> {
        let mut violations = Vec::new();
        let name = &item.meta().name;
        if let Some(limit) = self.max_name_length {
            let length = name.chars().count();
            if length > limit {
                violations.push(Violation {
                    entity: item.uid(),
                    rule: "max_name_length".to_string(),
                    message: format!("name has {length} characters, the platform accepts {limit}"),
                });
            }
        }
        violations
    }
}

/// One broken platform constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Offending entity.
    pub entity: ItemId,
    /// Constraint name.
    pub rule: String,
    /// Diagnostic.
    pub message: String,
}

impl Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} violates {}: {}", self.entity, self.rule, self.message)
    }
}

/// Folds violations into one `Validation` error.
pub fn violations_error(violations: &[Violation]) -> FlowError {
    let mut info = ErrorInfo::new(
        "platform_constraints",
        violations
            .iter()
            .map(Violation::to_string)
            .collect::<Vec<_>>()
            .join("; "),
    )
    .with_context("violations", violations.len().to_string());
    if let Some(first) = violations.first() {
        info = info
            .with_context("entity", first.entity.to_string())
            .with_context("rule", first.rule.clone());
    }
    FlowError::Validation(info)
}
