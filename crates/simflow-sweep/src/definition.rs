//! Sweep definitions: a mutator plus the values it is applied with.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use simflow_core::errors::{ErrorInfo, FlowError, Phase};
use simflow_core::serde::value_to_tag;
use simflow_model::Simulation;

/// Tag delta returned by a mutator.
pub type Tags = BTreeMap<String, String>;

/// User supplied mutation closure.
pub type MutatorFn = Arc<dyn Fn(&mut Simulation, &Value) -> Result<Tags, String> + Send + Sync>;

/// How a sweep value is applied to a simulation.
#[derive(Clone)]
pub enum Mutator {
    /// Sets one task parameter and tags the simulation with it.
    SetParameter(String),
    /// Sets several task parameters from an array value, in order.
    SetParameters(Vec<String>),
    /// Arbitrary mutation.
    Custom {
        /// Label used in logs and errors.
        name: String,
        /// The mutation itself.
        apply: MutatorFn,
    },
}

impl Mutator {
    /// Wraps a closure as a named custom mutator.
    pub fn custom<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&mut Simulation, &Value) -> Result<Tags, String> + Send + Sync + 'static,
    {
        Mutator::Custom {
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    /// Label used in logs and errors.
    pub fn name(&self) -> String {
        match self {
            Mutator::SetParameter(name) => name.clone(),
            Mutator::SetParameters(names) => names.join(","),
            Mutator::Custom { name, .. } => name.clone(),
        }
    }

    /// Applies the mutation and returns the tags it produced.
    pub fn apply(&self, simulation: &mut Simulation, value: &Value) -> Result<Tags, String> {
        match self {
            Mutator::SetParameter(name) => {
                simulation.task.set_parameter(name.clone(), value.clone());
                Ok(Tags::from([(name.clone(), value_to_tag(value))]))
            }
            Mutator::SetParameters(names) => {
                let values = value
                    .as_array()
                    .filter(|values| values.len() == names.len())
                    .ok_or_else(|| {
                        format!("expected an array of {} values for {}", names.len(), names.join(","))
                    })?;
                let mut tags = Tags::new();
                for (name, value) in names.iter().zip(values) {
                    simulation.task.set_parameter(name.clone(), value.clone());
                    tags.insert(name.clone(), value_to_tag(value));
                }
                Ok(tags)
            }
            Mutator::Custom { apply, .. } => apply(simulation, value),
        }
    }
}

impl fmt::Debug for Mutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutator::SetParameter(name) => f.debug_tuple("SetParameter").field(name).finish(),
            Mutator::SetParameters(names) => f.debug_tuple("SetParameters").field(names).finish(),
            Mutator::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

#[derive(Debug, Clone)]
enum Points {
    Fixed,
    List(Vec<Value>),
    Product(Vec<Vec<Value>>),
}

/// A mutator and the finite set of points it is applied at.
#[derive(Debug, Clone)]
pub struct SweepDefinition {
    mutator: Mutator,
    points: Points,
}

impl SweepDefinition {
    /// Applies `mutator` once per value.
    pub fn new(mutator: Mutator, values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            mutator,
            points: Points::List(values.into_iter().collect()),
        }
    }

    /// Sweeps one task parameter over `values`.
    pub fn parameter(name: impl Into<String>, values: impl IntoIterator<Item = Value>) -> Self {
        Self::new(Mutator::SetParameter(name.into()), values)
    }

    /// Sweeps several parameters at once over the cross product of their value lists.
    ///
    /// The mutator receives each point as an array in `names` order.
    pub fn multi(names: Vec<String>, values: Vec<Vec<Value>>) -> Result<Self, FlowError> {
        if names.len() != values.len() {
            return Err(FlowError::InvalidSweepSpec(
                ErrorInfo::new(
                    "multi_arity",
                    "multi-parameter definitions need one value list per parameter",
                )
                .with_context("parameters", names.len().to_string())
                .with_context("value_lists", values.len().to_string()),
            ));
        }
        Ok(Self {
            mutator: Mutator::SetParameters(names),
            points: Points::Product(values),
        })
    }

    /// Multi-parameter definition with a custom mutator receiving array points.
    pub fn multi_with(mutator: Mutator, values: Vec<Vec<Value>>) -> Self {
        Self {
            mutator,
            points: Points::Product(values),
        }
    }

    /// Applies `mutator` exactly once, with a `null` value.
    pub fn fixed(mutator: Mutator) -> Self {
        Self {
            mutator,
            points: Points::Fixed,
        }
    }

    /// The mutator.
    pub fn mutator(&self) -> &Mutator {
        &self.mutator
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        match &self.points {
            Points::Fixed => 1,
            Points::List(values) => values.len(),
            Points::Product(lists) => lists
                .iter()
                .fold(1usize, |acc, list| acc.saturating_mul(list.len())),
        }
    }

    /// True when the definition has no points.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point at `index`, with the last list varying fastest for products.
    pub fn value_at(&self, index: usize) -> Option<Value> {
        match &self.points {
            Points::Fixed => (index == 0).then_some(Value::Null),
            Points::List(values) => values.get(index).cloned(),
            Points::Product(lists) => {
                if index >= self.len() {
                    return None;
                }
                let digits = mixed_radix(index, lists.iter().map(Vec::len));
                Some(Value::Array(
                    lists
                        .iter()
                        .zip(digits)
                        .map(|(list, digit)| list[digit].clone())
                        .collect(),
                ))
            }
        }
    }

    /// Applies the point at `index` to `simulation`, merging the resulting tags.
    pub(crate) fn apply_point(
        &self,
        definition_index: usize,
        index: usize,
        simulation: &mut Simulation,
    ) -> Result<(), FlowError> {
        let value = self.value_at(index).ok_or_else(|| {
            FlowError::InvalidSweepSpec(
                ErrorInfo::new("point_out_of_range", "sweep point index out of range")
                    .with_context("definition_index", definition_index.to_string())
                    .with_context("index", index.to_string()),
            )
        })?;
        let tags = self.mutator.apply(simulation, &value).map_err(|message| {
            FlowError::SweepMutator(
                ErrorInfo::new("mutator_failed", message)
                    .with_context("definition_index", definition_index.to_string())
                    .with_context("value", value_to_tag(&value))
                    .with_context("mutator", self.mutator.name()),
            )
            .with_phase(Phase::Realization)
        })?;
        simulation.meta.merge_tags(tags);
        Ok(())
    }
}

/// Splits `index` into per-radix digits, most significant first.
pub(crate) fn mixed_radix(mut index: usize, radices: impl DoubleEndedIterator<Item = usize>) -> Vec<usize> {
    let mut digits: Vec<usize> = radices
        .rev()
        .map(|radix| {
            let digit = index % radix;
            index /= radix;
            digit
        })
        .collect();
    digits.reverse();
    digits
}
