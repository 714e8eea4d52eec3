#![deny(missing_docs)]
#![doc = "Backends for simflow: the platform interface, a filesystem job-directory platform, an in-memory platform and the JSON metadata store."]

pub mod capabilities;
pub mod file;
pub mod item;
pub mod memory;
pub mod metadata;
pub mod platform;
pub mod retry;
pub mod runner;

pub use capabilities::{violations_error, Capabilities, Violation};
pub use file::{FilePlatform, FilePlatformOptions, COMMON_ASSETS_DIR};
pub use item::Item;
pub use memory::MemoryPlatform;
pub use metadata::{matches_filter, JsonMetadataOperations, METADATA_FILENAME};
pub use platform::Platform;
pub use retry::{with_retries, RetryPolicy};
pub use runner::{parse_job_status, LocalRunner, RunnerJob, JOB_STATUS_FILE};
