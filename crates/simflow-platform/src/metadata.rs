//! `metadata.json` records inside a job directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_core::ids::ItemType;
use simflow_core::serde::{from_json_slice, to_canonical_json_pretty};
use simflow_model::JobRecord;
use tracing::debug;
use walkdir::WalkDir;

/// File name of an entity record.
pub const METADATA_FILENAME: &str = "metadata.json";

/// Record fields owned by the store, kept across `update(replace = true)`.
pub const SYSTEM_FIELDS: [&str; 5] = ["id", "item_type", "parent_id", "directory", "created_at"];

/// Reads and writes one JSON record per entity directory.
#[derive(Debug, Clone)]
pub struct JsonMetadataOperations {
    job_directory: PathBuf,
    metadata_filename: String,
    max_path_length: Option<usize>,
}

impl JsonMetadataOperations {
    /// Store rooted at `job_directory`. Paths longer than `max_path_length` are rejected before any I/O.
    pub fn new(job_directory: impl Into<PathBuf>, max_path_length: Option<usize>) -> Self {
        Self {
            job_directory: job_directory.into(),
            metadata_filename: METADATA_FILENAME.to_string(),
            max_path_length,
        }
    }

    /// Uses another record file name.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.metadata_filename = filename.into();
        self
    }

    /// Root of the job directory.
    pub fn job_directory(&self) -> &Path {
        &self.job_directory
    }

    /// Record file of the entity living in `dir`.
    pub fn metadata_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.metadata_filename)
    }

    /// Fails with `PathTooLong` when `path` exceeds the configured ceiling.
    pub fn check_path(&self, path: &Path) -> Result<(), FlowError> {
        let Some(limit) = self.max_path_length else {
            return Ok(());
        };
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|err| FlowError::io("current_dir", err))?
                .join(path)
        };
        let length = absolute.as_os_str().len();
        if length > limit {
            return Err(FlowError::PathTooLong(
                ErrorInfo::new("path_too_long", "path exceeds the platform path-length ceiling")
                    .with_context("path", absolute.display().to_string())
                    .with_context("length", length.to_string())
                    .with_context("limit", limit.to_string())
                    .with_hint("enable long paths, shorten names or disable name directories"),
            ));
        }
        Ok(())
    }

    /// Writes the record of the entity living in `dir`.
    pub fn dump(&self, dir: &Path, record: &JobRecord) -> Result<(), FlowError> {
        let mut record = record.clone();
        if record.directory.is_none() {
            record.directory = Some(dir.display().to_string());
        }
        self.write_value(dir, &record.to_value()?)
    }

    /// Reads the record of the entity living in `dir`.
    pub fn load(&self, dir: &Path) -> Result<JobRecord, FlowError> {
        JobRecord::from_value(self.load_value(dir)?)
            .map_err(|err| err.with_context("path", self.metadata_path(dir).display().to_string()))
    }

    /// Reads the raw JSON document of the entity living in `dir`.
    pub fn load_value(&self, dir: &Path) -> Result<Value, FlowError> {
        load_from_file(&self.metadata_path(dir))
    }

    /// Merges `metadata` into the record, or replaces it when `replace` is set.
    ///
    /// Replacing keeps the store-owned fields of the existing record.
    pub fn update(&self, dir: &Path, metadata: Map<String, Value>, replace: bool) -> Result<(), FlowError> {
        let path = self.metadata_path(dir);
        self.check_path(&path)?;
        let existing = if path.exists() {
            match load_from_file(&path)? {
                Value::Object(map) => map,
                _ => Map::new(),
            }
        } else {
            Map::new()
        };
        let merged = if replace {
            let mut merged = metadata;
            for field in SYSTEM_FIELDS {
                if let Some(value) = existing.get(field) {
                    merged.insert(field.to_string(), value.clone());
                }
            }
            merged
        } else {
            let mut merged = existing;
            merged.extend(metadata);
            merged
        };
        self.write_value(dir, &Value::Object(merged))
    }

    /// Drops every user field, keeping the store-owned ones.
    pub fn clear(&self, dir: &Path) -> Result<(), FlowError> {
        self.update(dir, Map::new(), true)
    }

    /// Every record of `item_type` under the job directory, in path order.
    pub fn get_all(&self, item_type: ItemType) -> Result<Vec<Value>, FlowError> {
        let depth = match item_type {
            ItemType::Suite => 2,
            ItemType::Experiment => 3,
            ItemType::Simulation => 4,
            other => {
                return Err(FlowError::Validation(
                    ErrorInfo::new("metadata_item_type", "records exist for suites, experiments and simulations only")
                        .with_context("item_type", other.as_str()),
                ))
            }
        };
        self.collect_records(&self.job_directory, depth, item_type)
    }

    /// Records of the direct children of the entity living in `dir`.
    pub fn get_children(&self, dir: &Path, child_type: ItemType) -> Result<Vec<Value>, FlowError> {
        self.collect_records(dir, 2, child_type)
    }

    /// Records of `item_type` matching both filters.
    ///
    /// Scans the whole job directory unless `items` is given. A null filter
    /// value means "key must exist" with `ignore_none`, and "value must be
    /// null" without it.
    pub fn filter(
        &self,
        item_type: ItemType,
        property_filter: &Map<String, Value>,
        tag_filter: &Map<String, Value>,
        items: Option<Vec<Value>>,
        ignore_none: bool,
    ) -> Result<Vec<Value>, FlowError> {
        let items = match items {
            Some(items) => items,
            None => self.get_all(item_type)?,
        };
        let empty = Map::new();
        Ok(items
            .into_iter()
            .filter(|item| {
                let Value::Object(document) = item else {
                    return false;
                };
                let tags = match document.get("tags") {
                    Some(Value::Object(tags)) => tags,
                    _ => &empty,
                };
                matches_filter(document, property_filter, ignore_none)
                    && matches_filter(tags, tag_filter, ignore_none)
            })
            .collect())
    }

    fn write_value(&self, dir: &Path, value: &Value) -> Result<(), FlowError> {
        let path = self.metadata_path(dir);
        self.check_path(&path)?;
        fs::create_dir_all(dir).map_err(|err| {
            FlowError::io("metadata_dir", err).with_context("path", dir.display().to_string())
        })?;
        let bytes = to_canonical_json_pretty(value)?;
        fs::write(&path, bytes).map_err(|err| {
            FlowError::io("metadata_write", err).with_context("path", path.display().to_string())
        })?;
        debug!(path = %path.display(), "wrote metadata");
        Ok(())
    }

    fn collect_records(&self, root: &Path, depth: usize, item_type: ItemType) -> Result<Vec<Value>, FlowError> {
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        let walker = WalkDir::new(root)
            .min_depth(depth)
            .max_depth(depth)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|err| FlowError::io("metadata_scan", err))?;
            if !entry.file_type().is_file() || entry.file_name() != self.metadata_filename.as_str() {
                continue;
            }
            let document = load_from_file(entry.path())?;
            let kind = document.get("item_type").and_then(Value::as_str);
            if kind == Some(item_type.as_str()) {
                records.push(document);
            }
        }
        Ok(records)
    }
}

/// Reads one metadata document.
pub fn load_from_file(path: &Path) -> Result<Value, FlowError> {
    let bytes = fs::read(path).map_err(|err| {
        FlowError::io("metadata_read", err).with_context("path", path.display().to_string())
    })?;
    from_json_slice(&bytes).map_err(|err| err.with_context("path", path.display().to_string()))
}

/// True when `document` satisfies every constraint of `filter`.
pub fn matches_filter(document: &Map<String, Value>, filter: &Map<String, Value>, ignore_none: bool) -> bool {
    filter.iter().all(|(key, expected)| match (document.get(key), expected) {
        (None, _) => false,
        (Some(_), Value::Null) if ignore_none => true,
        (Some(actual), expected) => actual == expected,
    })
}
