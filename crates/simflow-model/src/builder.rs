use std::fmt::Debug;

use simflow_core::errors::FlowError;

use crate::simulation::Simulation;

/// Lazy sequence of realized simulations.
pub type SimulationStream<'a> = Box<dyn Iterator<Item = Result<Simulation, FlowError>> + 'a>;

/// Expands a base simulation into a deterministic sequence of variants.
pub trait SimulationBuilder: Send + Sync + Debug {
    /// Number of simulations the builder emits, computed without enumerating.
    fn count(&self) -> usize;

    /// Emits the variants of `base` lazily, in a stable order.
    fn simulations<'a>(&'a self, base: &'a Simulation) -> SimulationStream<'a>;
}
