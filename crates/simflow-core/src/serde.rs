//! Canonical JSON and YAML helpers.

use std::collections::BTreeMap;
use std::iter::FromIterator;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::errors::FlowError;

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => {
            let canonical_values = values.into_iter().map(canonicalize).collect();
            Value::Array(canonical_values)
        }
        other => other,
    }
}

/// Serializes a value into canonical JSON bytes with deterministic ordering.
pub fn to_canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, FlowError> {
    let value = serde_json::to_value(value).map_err(|err| FlowError::serde("json_serialize", err))?;
    let canonical = canonicalize(value);
    let mut bytes = Vec::new();
    serde_json::to_writer(&mut bytes, &canonical)
        .map_err(|err| FlowError::serde("json_write", err))?;
    Ok(bytes)
}

/// Serializes a value into indented canonical JSON, for documents humans read.
pub fn to_canonical_json_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>, FlowError> {
    let value = serde_json::to_value(value).map_err(|err| FlowError::serde("json_serialize", err))?;
    serde_json::to_vec_pretty(&canonicalize(value)).map_err(|err| FlowError::serde("json_write", err))
}

/// Deserializes a value from JSON bytes.
pub fn from_json_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, FlowError> {
    serde_json::from_slice(data).map_err(|err| FlowError::serde("json_deserialize", err))
}

/// Deserializes a YAML payload into the requested type.
pub fn from_yaml_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, FlowError> {
    serde_yaml::from_slice(data).map_err(|err| FlowError::serde("yaml_deserialize", err))
}

/// Renders a JSON value as a tag string: strings verbatim, everything else as compact JSON.
pub fn value_to_tag(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
