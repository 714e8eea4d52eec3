#![deny(missing_docs)]
#![doc = "Sweep builders turning a base simulation and a compact sweep spec into a lazy, deterministic sequence of simulations."]

pub mod builder;
pub mod definition;
pub mod files;
pub mod rows;

pub use builder::{cardinality, ArmBuilder, ArmType, ChainBuilder, SimpleBuilder, Sweep, SweepArm};
pub use definition::{Mutator, MutatorFn, SweepDefinition, Tags};
pub use files::{load_sweep_file, CsvBuilder, YamlBuilder};
pub use rows::{RowBuilder, SweepFileOptions, ValueType};
