//! Metadata-store view of an entity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use simflow_assets::AssetRecord;
use simflow_core::errors::FlowError;
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::status::EntityStatus;

use crate::task::TaskRecord;

/// Persistent JSON document describing one suite, experiment or simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Entity id.
    pub id: ItemId,
    /// Owning entity.
    #[serde(default)]
    pub parent_id: Option<ItemId>,
    /// Entity kind.
    pub item_type: ItemType,
    /// Entity name.
    #[serde(default)]
    pub name: String,
    /// Last observed status.
    #[serde(default)]
    pub status: EntityStatus,
    /// Entity tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Assets owned by the entity.
    #[serde(default)]
    pub assets: Vec<AssetRecord>,
    /// Directory holding the entity on filesystem backends.
    #[serde(default)]
    pub directory: Option<String>,
    /// Task or entity type label.
    #[serde(default)]
    pub type_tag: String,
    /// Backend-side reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_id: Option<String>,
    /// Task definition, for simulations and experiments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskRecord>,
    /// Child simulations, for experiments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulations: Option<Vec<ItemId>>,
    /// Child experiments, for suites.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiments: Option<Vec<ItemId>>,
    /// RFC 3339 creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Fields added by backends or users.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl JobRecord {
    /// Empty record for an entity.
    pub fn new(id: ItemId, item_type: ItemType) -> Self {
        Self {
            id,
            parent_id: None,
            item_type,
            name: String::new(),
            status: EntityStatus::Created,
            tags: BTreeMap::new(),
            assets: Vec::new(),
            directory: None,
            type_tag: String::new(),
            platform_id: None,
            task: None,
            simulations: None,
            experiments: None,
            created_at: None,
            extra: BTreeMap::new(),
        }
    }

    /// Stamps the record with the current time.
    pub fn stamped(mut self) -> Self {
        self.created_at = Some(chrono::Utc::now().to_rfc3339());
        self
    }

    /// JSON object form used by property and tag filters.
    pub fn to_value(&self) -> Result<Value, FlowError> {
        serde_json::to_value(self).map_err(|err| FlowError::serde("record_to_value", err))
    }

    /// Parses a record from its JSON object form.
    pub fn from_value(value: Value) -> Result<Self, FlowError> {
        serde_json::from_value(value).map_err(|err| FlowError::serde("record_from_value", err))
    }
}
