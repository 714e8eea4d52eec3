#![deny(missing_docs)]
#![doc = "Analyze manager: bounded parallel map/reduce over simulation output files, with a sharded run cache and first-failure cancellation."]

pub mod analyzer;
pub mod cache;
pub mod collect;
pub mod manager;
pub mod parser;

pub use analyzer::{Analyzer, FileData, Mapped};
pub use cache::{CacheView, ShardedCache, EXCEPTION_KEY};
pub use collect::CollectingAnalyzer;
pub use manager::{AnalyzeManager, AnalyzeOptions, AnalyzeOutcome, Progress, ProgressCallback};
pub use parser::{CsvTable, FileParser, ParsedFile, ParserRegistry};
