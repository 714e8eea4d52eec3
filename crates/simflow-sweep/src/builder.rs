//! Cartesian and arm-composed builders.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use simflow_core::errors::{ErrorInfo, FlowError};
use simflow_model::{Simulation, SimulationBuilder, SimulationStream};

use crate::definition::{mixed_radix, Mutator, SweepDefinition};

/// How the definitions of an arm combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmType {
    /// Cartesian product, last definition varying fastest.
    #[default]
    Cross,
    /// Zipped: point `i` of every definition together.
    Pair,
}

/// Lazy realization of a set of definitions under one [`ArmType`].
pub struct Sweep<'a> {
    base: &'a Simulation,
    definitions: &'a [SweepDefinition],
    arm_type: ArmType,
    next: usize,
    total: usize,
}

impl<'a> Sweep<'a> {
    /// Starts a sweep over `definitions` derived from `base`.
    pub fn new(base: &'a Simulation, definitions: &'a [SweepDefinition], arm_type: ArmType) -> Self {
        Self {
            base,
            definitions,
            arm_type,
            next: 0,
            total: cardinality(definitions, arm_type),
        }
    }

    fn realize(&self, index: usize) -> Result<Simulation, FlowError> {
        let mut simulation = self.base.derive();
        match self.arm_type {
            ArmType::Cross => {
                let digits = mixed_radix(index, self.definitions.iter().map(SweepDefinition::len));
                for (position, (definition, digit)) in self.definitions.iter().zip(digits).enumerate() {
                    definition.apply_point(position, digit, &mut simulation)?;
                }
            }
            ArmType::Pair => {
                for (position, definition) in self.definitions.iter().enumerate() {
                    definition.apply_point(position, index, &mut simulation)?;
                }
            }
        }
        Ok(simulation)
    }
}

impl Iterator for Sweep<'_> {
    type Item = Result<Simulation, FlowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let result = self.realize(self.next);
        // A failed point ends the sweep.
        self.next = if result.is_ok() { self.next + 1 } else { self.total };
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total - self.next;
        (0, Some(remaining))
    }
}

/// Number of points `definitions` produce under `arm_type`. No definitions means no points.
pub fn cardinality(definitions: &[SweepDefinition], arm_type: ArmType) -> usize {
    if definitions.is_empty() {
        return 0;
    }
    match arm_type {
        ArmType::Cross => definitions
            .iter()
            .fold(1usize, |acc, definition| acc.saturating_mul(definition.len())),
        ArmType::Pair => definitions.iter().map(SweepDefinition::len).min().unwrap_or(0),
    }
}

/// Cartesian product over every definition.
#[derive(Debug, Clone, Default)]
pub struct SimpleBuilder {
    definitions: Vec<SweepDefinition>,
}

impl SimpleBuilder {
    /// Builder with no definitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a definition.
    pub fn add_definition(&mut self, definition: SweepDefinition) -> &mut Self {
        self.definitions.push(definition);
        self
    }

    /// Appends a single-parameter sweep.
    pub fn add_parameter(
        &mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = Value>,
    ) -> &mut Self {
        self.add_definition(SweepDefinition::parameter(name, values))
    }

    /// Appends a sweep driven by an arbitrary mutator.
    pub fn add_mutator(&mut self, mutator: Mutator, values: impl IntoIterator<Item = Value>) -> &mut Self {
        self.add_definition(SweepDefinition::new(mutator, values))
    }

    /// Definitions in insertion order.
    pub fn definitions(&self) -> &[SweepDefinition] {
        &self.definitions
    }
}

impl SimulationBuilder for SimpleBuilder {
    fn count(&self) -> usize {
        cardinality(&self.definitions, ArmType::Cross)
    }

    fn simulations<'a>(&'a self, base: &'a Simulation) -> SimulationStream<'a> {
        Box::new(Sweep::new(base, &self.definitions, ArmType::Cross))
    }
}

/// One branch of an [`ArmBuilder`].
#[derive(Debug, Clone, Default)]
pub struct SweepArm {
    /// How the definitions combine.
    pub arm_type: ArmType,
    /// Definitions in insertion order.
    pub definitions: Vec<SweepDefinition>,
}

impl SweepArm {
    /// Empty arm.
    pub fn new(arm_type: ArmType) -> Self {
        Self {
            arm_type,
            definitions: Vec::new(),
        }
    }

    /// Appends a definition.
    pub fn with_definition(mut self, definition: SweepDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    /// Appends a single-parameter sweep.
    pub fn with_parameter(self, name: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        self.with_definition(SweepDefinition::parameter(name, values))
    }

    /// Number of simulations the arm yields.
    pub fn count(&self) -> usize {
        cardinality(&self.definitions, self.arm_type)
    }

    /// Rejects pair arms whose value lists differ in length.
    pub fn validate(&self) -> Result<(), FlowError> {
        if self.arm_type != ArmType::Pair {
            return Ok(());
        }
        let lengths: Vec<usize> = self.definitions.iter().map(SweepDefinition::len).collect();
        match lengths.split_first() {
            Some((first, rest)) if rest.iter().any(|len| len != first) => {
                Err(FlowError::InvalidSweepSpec(
                    ErrorInfo::new("pair_length_mismatch", "pair arm value lists differ in length")
                        .with_context(
                            "lengths",
                            lengths
                                .iter()
                                .map(usize::to_string)
                                .collect::<Vec<_>>()
                                .join(","),
                        ),
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Disjoint union of arms, each expanded by its own [`ArmType`].
#[derive(Debug, Clone, Default)]
pub struct ArmBuilder {
    arms: Vec<SweepArm>,
}

impl ArmBuilder {
    /// Builder with no arms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an arm after validating it.
    pub fn add_arm(&mut self, arm: SweepArm) -> Result<&mut Self, FlowError> {
        arm.validate()
            .map_err(|err| err.with_context("arm", self.arms.len().to_string()))?;
        self.arms.push(arm);
        Ok(self)
    }

    /// Arms in insertion order.
    pub fn arms(&self) -> &[SweepArm] {
        &self.arms
    }
}

impl SimulationBuilder for ArmBuilder {
    fn count(&self) -> usize {
        self.arms
            .iter()
            .fold(0usize, |acc, arm| acc.saturating_add(arm.count()))
    }

    fn simulations<'a>(&'a self, base: &'a Simulation) -> SimulationStream<'a> {
        Box::new(self.arms.iter().enumerate().flat_map(move |(arm_index, arm)| {
            Sweep::new(base, &arm.definitions, arm.arm_type)
                .map(move |result| result.map_err(|err| err.with_context("arm", arm_index.to_string())))
        }))
    }
}

/// Concatenation of several builders, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ChainBuilder {
    builders: Vec<Arc<dyn SimulationBuilder>>,
}

impl ChainBuilder {
    /// Builder with nothing chained.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a builder.
    pub fn push(&mut self, builder: Arc<dyn SimulationBuilder>) -> &mut Self {
        self.builders.push(builder);
        self
    }
}

impl SimulationBuilder for ChainBuilder {
    fn count(&self) -> usize {
        self.builders
            .iter()
            .fold(0usize, |acc, builder| acc.saturating_add(builder.count()))
    }

    fn simulations<'a>(&'a self, base: &'a Simulation) -> SimulationStream<'a> {
        Box::new(self.builders.iter().flat_map(move |builder| builder.simulations(base)))
    }
}
