//! The user-facing analyzer contract.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use simflow_core::errors::FlowError;
use simflow_model::Simulation;

use crate::parser::ParsedFile;

/// Files handed to [`Analyzer::map`], keyed by requested file name.
pub type FileData = BTreeMap<String, ParsedFile>;

/// Per-simulation map results handed to [`Analyzer::reduce`], in analysis order.
pub type Mapped = Vec<(Simulation, Value)>;

/// A map/reduce pair run by the analyze manager.
///
/// `filter`, `map` and `reduce` are called concurrently from pool workers and
/// take `&self`. The lifecycle hooks run on the driving thread.
pub trait Analyzer: Send + Sync {
    /// Identifier, unique among the analyzers of a run.
    fn uid(&self) -> String;

    /// Replaces the identifier. Called when several analyzers share a uid.
    fn set_uid(&mut self, uid: String);

    /// Files needed from each simulation.
    fn filenames(&self) -> Vec<String>;

    /// Parse files by extension before `map`. Raw bytes otherwise.
    fn parse(&self) -> bool {
        true
    }

    /// Whether `simulation` is mapped by this analyzer.
    fn filter(&self, _simulation: &Simulation) -> Result<bool, FlowError> {
        Ok(true)
    }

    /// Per-simulation result.
    fn map(&self, data: &FileData, simulation: &Simulation) -> Result<Value, FlowError>;

    /// Aggregate over every mapped simulation.
    fn reduce(&self, mapped: &Mapped) -> Result<Value, FlowError>;

    /// Called once before any `map`.
    fn initialize(&mut self) -> Result<(), FlowError> {
        Ok(())
    }

    /// Called once with every admitted simulation, before mapping starts.
    fn per_group(&mut self, _simulations: &[Simulation]) -> Result<(), FlowError> {
        Ok(())
    }

    /// Called once after the run, whatever its outcome.
    fn destroy(&mut self) -> Result<(), FlowError> {
        Ok(())
    }

    /// Directory the analyzer writes into, when it has its own.
    fn working_dir(&self) -> Option<&Path> {
        None
    }

    /// Sets the directory the analyzer writes into.
    fn set_working_dir(&mut self, _dir: PathBuf) {}
}
