//! Entity identifiers and item type tags.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ErrorInfo, FlowError};

/// 16-byte unique identifier assigned to every entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Creates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identifier from its raw byte representation.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the raw byte representation of the identifier.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for ItemId {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(ItemId).map_err(|err| {
            FlowError::Validation(
                ErrorInfo::new("item_id_parse", "invalid item identifier")
                    .with_context("value", s)
                    .with_hint(err.to_string()),
            )
        })
    }
}

/// Kind of entity an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// Grouping of experiments.
    Suite,
    /// One sweep run.
    Experiment,
    /// One concrete parameterization.
    Simulation,
    /// A bundle of assets.
    AssetCollection,
}

impl ItemType {
    /// Returns the snake case label used in metadata records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Suite => "suite",
            ItemType::Experiment => "experiment",
            ItemType::Simulation => "simulation",
            ItemType::AssetCollection => "asset_collection",
        }
    }
}

impl Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "suite" => Ok(ItemType::Suite),
            "experiment" => Ok(ItemType::Experiment),
            "simulation" => Ok(ItemType::Simulation),
            "asset_collection" | "assetcollection" => Ok(ItemType::AssetCollection),
            other => Err(FlowError::Validation(
                ErrorInfo::new("item_type_parse", "unknown item type").with_context("value", other),
            )),
        }
    }
}
