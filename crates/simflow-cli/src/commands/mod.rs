pub mod analyze;
pub mod run;
pub mod status;
pub mod sweep;

use serde_json::{Map, Value};

/// Splits `key=value` arguments.
pub fn parse_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

/// Filter map from pairs. Values are read as JSON when they parse, as strings otherwise.
pub fn json_filter(pairs: &[(String, String)], typed: bool) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, raw)| {
            let value = if typed {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            } else {
                Value::String(raw.clone())
            };
            (key.clone(), value)
        })
        .collect()
}
