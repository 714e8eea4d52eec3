#![deny(missing_docs)]
#![doc = "Shared types for the simflow orchestrator: errors, identifiers, statuses, canonical serialization and run configuration."]

pub mod config;
pub mod errors;
pub mod hash;
pub mod ids;
pub mod serde;
pub mod status;

pub use config::FlowConfig;
pub use errors::{ErrorInfo, FlowError, Phase};
pub use hash::{content_checksum, stable_hash_string};
pub use ids::{ItemId, ItemType};
pub use crate::serde::{
    from_json_slice, from_yaml_slice, to_canonical_json_bytes, to_canonical_json_pretty,
    value_to_tag,
};
pub use status::EntityStatus;
