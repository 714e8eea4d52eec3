#![deny(missing_docs)]
#![doc = "Experiment manager: pre-creation, asset provisioning, batched realization and submission, polling and finalization."]

pub mod ledger;
pub mod manager;
pub mod options;
pub mod report;

pub use ledger::AssetLedger;
pub use manager::ExperimentManager;
pub use options::{ManagerOptions, PollPolicy};
pub use report::{BatchFailure, ExperimentReport};
