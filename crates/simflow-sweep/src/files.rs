//! CSV and YAML sweep files.

use std::fs;
use std::io::Read;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_model::{Simulation, SimulationBuilder, SimulationStream};
use tracing::debug;

use crate::builder::{ArmBuilder, ArmType, SweepArm};
use crate::definition::SweepDefinition;
use crate::rows::{RowBuilder, SweepFileOptions};

const MODE_KEY: &str = "mode";

fn invalid(code: &str, message: impl Into<String>) -> FlowError {
    FlowError::InvalidSweepSpec(ErrorInfo::new(code, message))
}

fn read_file(path: &Path) -> Result<Vec<u8>, FlowError> {
    fs::read(path).map_err(|err| {
        FlowError::io("sweep_file_read", err).with_context("path", path.display().to_string())
    })
}

/// CSV-driven sweep: header row names the columns, each further row is one simulation.
pub struct CsvBuilder;

impl CsvBuilder {
    /// Reads a CSV sweep file.
    pub fn from_path(path: &Path, options: &SweepFileOptions) -> Result<RowBuilder, FlowError> {
        let bytes = read_file(path)?;
        Self::from_reader(bytes.as_slice(), options)
            .map_err(|err| err.with_context("path", path.display().to_string()))
    }

    /// Reads CSV sweep rows from any reader. Empty cells are omitted from their row.
    pub fn from_reader<R: Read>(reader: R, options: &SweepFileOptions) -> Result<RowBuilder, FlowError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::Headers)
            .flexible(true)
            .from_reader(reader);
        let headers: Vec<String> = reader
            .headers()
            .map_err(|err| invalid("csv_header", err.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|err| {
                invalid("csv_record", err.to_string()).with_context("row", line.to_string())
            })?;
            if record.len() != headers.len() {
                let column = headers.get(record.len()).cloned().unwrap_or_else(|| format!("#{}", headers.len()));
                return Err(invalid(
                    "csv_row_width",
                    format!("row {line} has {} fields, the header has {}", record.len(), headers.len()),
                )
                .with_context("row", line.to_string())
                .with_context("column", column)
                .with_context("fields", record.len().to_string())
                .with_context("columns", headers.len().to_string()));
            }
            let mut row = IndexMap::new();
            for (column, cell) in headers.iter().zip(record.iter()) {
                if cell.trim().is_empty() {
                    continue;
                }
                let value_type = options.types.get(column).copied().unwrap_or_default();
                let value = value_type.cast(cell).map_err(|message| {
                    invalid("csv_cast", message)
                        .with_context("row", line.to_string())
                        .with_context("column", column.clone())
                        .with_context("type", value_type.to_string())
                })?;
                row.insert(column.clone(), value);
            }
            rows.push(row);
        }
        debug!(rows = rows.len(), columns = headers.len(), "loaded csv sweep");
        Ok(RowBuilder::new(rows, options))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum YamlDocument {
    Rows(Vec<IndexMap<String, Value>>),
    Table(IndexMap<String, Value>),
}

/// YAML-driven sweep.
///
/// A sequence of mappings is row-style: one simulation per mapping. A single
/// mapping is table-style: parameter name to value list, combined according to
/// its `mode` key (`cross` by default, or `pair`).
#[derive(Debug, Clone)]
pub enum YamlBuilder {
    /// One simulation per mapping.
    Rows(RowBuilder),
    /// A single cross or pair arm.
    Table(ArmBuilder),
}

impl YamlBuilder {
    /// Reads a YAML sweep file.
    pub fn from_path(path: &Path, options: &SweepFileOptions) -> Result<Self, FlowError> {
        let bytes = read_file(path)?;
        Self::from_slice(&bytes, options)
            .map_err(|err| err.with_context("path", path.display().to_string()))
    }

    /// Parses a YAML sweep document.
    pub fn from_slice(bytes: &[u8], options: &SweepFileOptions) -> Result<Self, FlowError> {
        let document: YamlDocument = serde_yaml::from_slice(bytes)
            .map_err(|err| invalid("yaml_sweep", err.to_string()))?;
        match document {
            YamlDocument::Rows(rows) => Ok(YamlBuilder::Rows(RowBuilder::new(rows, options))),
            YamlDocument::Table(mut table) => {
                let arm_type = match table.shift_remove(MODE_KEY) {
                    None => ArmType::Cross,
                    Some(Value::String(mode)) => match mode.to_ascii_lowercase().as_str() {
                        "cross" => ArmType::Cross,
                        "pair" => ArmType::Pair,
                        other => {
                            return Err(invalid("yaml_mode", "mode must be cross or pair")
                                .with_context("mode", other))
                        }
                    },
                    Some(other) => {
                        return Err(invalid("yaml_mode", "mode must be a string")
                            .with_context("mode", other.to_string()))
                    }
                };
                let mut arm = SweepArm::new(arm_type);
                for (name, values) in table {
                    let values = match values {
                        Value::Array(values) => values,
                        scalar => vec![scalar],
                    };
                    arm = arm.with_definition(SweepDefinition::new(options.mutator_for(&name), values));
                }
                let mut builder = ArmBuilder::new();
                builder.add_arm(arm)?;
                Ok(YamlBuilder::Table(builder))
            }
        }
    }
}

impl SimulationBuilder for YamlBuilder {
    fn count(&self) -> usize {
        match self {
            YamlBuilder::Rows(rows) => rows.count(),
            YamlBuilder::Table(arms) => arms.count(),
        }
    }

    fn simulations<'a>(&'a self, base: &'a Simulation) -> SimulationStream<'a> {
        match self {
            YamlBuilder::Rows(rows) => rows.simulations(base),
            YamlBuilder::Table(arms) => arms.simulations(base),
        }
    }
}

/// Loads a CSV or YAML sweep file, chosen by extension.
pub fn load_sweep_file(
    path: &Path,
    options: &SweepFileOptions,
) -> Result<Box<dyn SimulationBuilder>, FlowError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "csv" => Ok(Box::new(CsvBuilder::from_path(path, options)?)),
        "yaml" | "yml" => Ok(Box::new(YamlBuilder::from_path(path, options)?)),
        other => Err(invalid("sweep_file_type", "sweep files must be .csv, .yaml or .yml")
            .with_context("extension", other)),
    }
}
