#![deny(missing_docs)]
#![doc = "Entity graph for simflow: suites, experiments, simulations, tasks and their job records."]

/// The seam sweep builders implement.
pub mod builder;
pub mod entity;
pub mod experiment;
/// Directory-safe entity names.
pub mod names;
pub mod record;
pub mod simulation;
/// Id-linked grouping of experiments.
pub mod suite;
pub mod task;

pub use builder::{SimulationBuilder, SimulationStream};
pub use entity::EntityMeta;
pub use experiment::Experiment;
pub use names::clean_name;
pub use record::JobRecord;
pub use simulation::{Simulation, TASK_TYPE_TAG, TYPE_TAG};
pub use suite::{Suite, IMPLICIT_SUITE_NAME};
pub use task::{CommandLine, Task, TaskRecord, COMMAND_TASK};
