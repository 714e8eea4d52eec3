//! Explicit row tables: one simulation per row.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use simflow_core::errors::{ErrorInfo, FlowError, Phase};
use simflow_core::serde::value_to_tag;
use simflow_model::{Simulation, SimulationBuilder, SimulationStream};

use crate::definition::Mutator;

/// Target type of a column in a file-driven sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Integer, then float, then boolean, falling back to string.
    #[default]
    Auto,
    /// Signed 64-bit integer.
    Int,
    /// 64-bit float.
    Float,
    /// Verbatim string.
    Str,
    /// `true`/`false`, case-insensitive, or `1`/`0`.
    Bool,
}

impl ValueType {
    /// Casts a raw cell into a JSON value.
    pub fn cast(&self, raw: &str) -> Result<Value, String> {
        let trimmed = raw.trim();
        match self {
            ValueType::Auto => Ok(auto_cast(trimmed)),
            ValueType::Int => trimmed
                .parse::<i64>()
                .map(Value::from)
                .map_err(|err| format!("'{trimmed}' is not an integer: {err}")),
            ValueType::Float => trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("'{trimmed}' is not a finite float")),
            ValueType::Str => Ok(Value::String(raw.to_string())),
            ValueType::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("'{trimmed}' is not a boolean")),
            },
        }
    }
}

fn auto_cast(trimmed: &str) -> Value {
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Some(number) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(number);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(trimmed.to_string()),
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ValueType::Auto => "auto",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Str => "str",
            ValueType::Bool => "bool",
        };
        f.write_str(label)
    }
}

impl FromStr for ValueType {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ValueType::Auto),
            "int" | "integer" => Ok(ValueType::Int),
            "float" | "double" => Ok(ValueType::Float),
            "str" | "string" => Ok(ValueType::Str),
            "bool" | "boolean" => Ok(ValueType::Bool),
            other => Err(FlowError::InvalidSweepSpec(
                ErrorInfo::new("value_type", "unknown column type").with_context("type", other),
            )),
        }
    }
}

/// Column types and mutators for file-driven sweeps.
///
/// Columns without a mutator set the task parameter of the same name.
#[derive(Debug, Clone, Default)]
pub struct SweepFileOptions {
    /// Per-column target type. Missing columns use [`ValueType::Auto`].
    pub types: BTreeMap<String, ValueType>,
    /// Per-column mutator.
    pub mutators: BTreeMap<String, Mutator>,
}

impl SweepFileOptions {
    /// Sets the type of a column.
    pub fn with_type(mut self, column: impl Into<String>, value_type: ValueType) -> Self {
        self.types.insert(column.into(), value_type);
        self
    }

    /// Sets the mutator of a column.
    pub fn with_mutator(mut self, column: impl Into<String>, mutator: Mutator) -> Self {
        self.mutators.insert(column.into(), mutator);
        self
    }

    /// Mutator applied for `column`.
    pub fn mutator_for(&self, column: &str) -> Mutator {
        self.mutators
            .get(column)
            .cloned()
            .unwrap_or_else(|| Mutator::SetParameter(column.to_string()))
    }
}

/// One simulation per row. Cells absent from a row are not assigned.
#[derive(Debug, Clone, Default)]
pub struct RowBuilder {
    rows: Vec<IndexMap<String, Value>>,
    mutators: BTreeMap<String, Mutator>,
}

impl RowBuilder {
    /// Builds from typed rows, resolving each column's mutator from `options`.
    pub fn new(rows: Vec<IndexMap<String, Value>>, options: &SweepFileOptions) -> Self {
        let mut mutators = BTreeMap::new();
        for row in &rows {
            for column in row.keys() {
                if !mutators.contains_key(column) {
                    mutators.insert(column.clone(), options.mutator_for(column));
                }
            }
        }
        Self { rows, mutators }
    }

    /// Rows in file order.
    pub fn rows(&self) -> &[IndexMap<String, Value>] {
        &self.rows
    }

    fn realize(&self, index: usize, base: &Simulation) -> Result<Simulation, FlowError> {
        let mut simulation = base.derive();
        for (column, value) in &self.rows[index] {
            let mutator = self
                .mutators
                .get(column)
                .cloned()
                .unwrap_or_else(|| Mutator::SetParameter(column.clone()));
            let tags = mutator.apply(&mut simulation, value).map_err(|message| {
                FlowError::SweepMutator(
                    ErrorInfo::new("mutator_failed", message)
                        .with_context("row", index.to_string())
                        .with_context("column", column.clone())
                        .with_context("value", value_to_tag(value))
                        .with_context("mutator", mutator.name()),
                )
                .with_phase(Phase::Realization)
            })?;
            simulation.meta.merge_tags(tags);
        }
        Ok(simulation)
    }
}

impl SimulationBuilder for RowBuilder {
    fn count(&self) -> usize {
        self.rows.len()
    }

    fn simulations<'a>(&'a self, base: &'a Simulation) -> SimulationStream<'a> {
        let mut failed = false;
        Box::new((0..self.rows.len()).map_while(move |index| {
            if failed {
                return None;
            }
            let result = self.realize(index, base);
            failed = result.is_err();
            Some(result)
        }))
    }
}
