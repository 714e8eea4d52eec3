//! Identity, tags and status shared by suites, experiments and simulations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use simflow_core::ids::{ItemId, ItemType};
use simflow_core::status::EntityStatus;

/// Fields common to every entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMeta {
    /// Locally assigned unique id.
    pub uid: ItemId,
    /// Human readable name.
    pub name: String,
    /// Free-form string tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    status: EntityStatus,
    /// Id of the owning entity.
    #[serde(default)]
    pub parent_id: Option<ItemId>,
    /// Backend-side reference, once created on a platform.
    #[serde(default)]
    pub platform_id: Option<String>,
    /// Entity kind.
    pub item_type: ItemType,
}

impl EntityMeta {
    /// Creates metadata for a new in-memory entity in state `created`.
    pub fn new(item_type: ItemType, name: impl Into<String>) -> Self {
        Self {
            uid: ItemId::new(),
            name: name.into(),
            tags: BTreeMap::new(),
            status: EntityStatus::Created,
            parent_id: None,
            platform_id: None,
            item_type,
        }
    }

    /// Current status.
    pub fn status(&self) -> EntityStatus {
        self.status
    }

    /// Applies an observed status. Terminal statuses never change afterwards.
    pub fn set_status(&mut self, observed: EntityStatus) -> EntityStatus {
        self.status = self.status.transition(observed);
        self.status
    }

    /// Merges tags, last write wins.
    pub fn merge_tags<I, K, V>(&mut self, tags: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in tags {
            self.tags.insert(key.into(), value.into());
        }
    }

    /// `true` once the entity reached a terminal status.
    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }
}
