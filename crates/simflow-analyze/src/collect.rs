//! Built-in analyzer gathering files into one JSON document.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use simflow_core::errors::FlowError;
use simflow_model::Simulation;

use crate::analyzer::{Analyzer, FileData, Mapped};

/// Collects each simulation's parsed files and tags.
///
/// `reduce` returns an object keyed by simulation id whose values hold
/// `tags` and `files`, one JSON rendering per requested file.
#[derive(Debug, Clone)]
pub struct CollectingAnalyzer {
    uid: String,
    filenames: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl CollectingAnalyzer {
    /// Collector for `filenames`.
    pub fn new(filenames: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            uid: "collect".to_string(),
            filenames: filenames.into_iter().map(Into::into).collect(),
            working_dir: None,
        }
    }
}

impl Analyzer for CollectingAnalyzer {
    fn uid(&self) -> String {
        self.uid.clone()
    }

    fn set_uid(&mut self, uid: String) {
        self.uid = uid;
    }

    fn filenames(&self) -> Vec<String> {
        self.filenames.clone()
    }

    fn map(&self, data: &FileData, simulation: &Simulation) -> Result<Value, FlowError> {
        let files: Map<String, Value> = data
            .iter()
            .map(|(name, parsed)| (name.clone(), parsed.to_json()))
            .collect();
        let tags: Map<String, Value> = simulation
            .meta
            .tags
            .iter()
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();
        let mut entry = Map::new();
        entry.insert("tags".to_string(), Value::Object(tags));
        entry.insert("files".to_string(), Value::Object(files));
        Ok(Value::Object(entry))
    }

    fn reduce(&self, mapped: &Mapped) -> Result<Value, FlowError> {
        Ok(Value::Object(
            mapped
                .iter()
                .map(|(simulation, result)| (simulation.uid().to_string(), result.clone()))
                .collect(),
        ))
    }

    fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    fn set_working_dir(&mut self, dir: PathBuf) {
        self.working_dir = Some(dir);
    }
}
