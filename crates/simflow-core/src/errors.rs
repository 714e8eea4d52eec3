//! Structured error types shared across simflow crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Context key recording the orchestration phase that raised an error.
pub const PHASE_KEY: &str = "phase";
/// Context key recording the entity identifier that triggered an error.
pub const ENTITY_KEY: &str = "entity";
/// Context key recording the analyzer uid that triggered an error.
pub const ANALYZER_KEY: &str = "analyzer";

/// Structured payload attached to every [`FlowError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (identifiers, phases, sizes, etc.).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

/// Orchestration phase in which an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Analyzer admission predicate.
    Filter,
    /// Retrieval of output files from the platform.
    Fetch,
    /// Format-aware parsing of fetched files.
    Parse,
    /// Per-simulation analyzer map call.
    Map,
    /// Per-analyzer reduce call.
    Reduce,
    /// Sweep realization into concrete simulations.
    Realization,
    /// Persisting asset content on the platform.
    Provisioning,
    /// Entity creation on the platform.
    Creation,
    /// Status polling until completion.
    Polling,
    /// Metadata persistence.
    Metadata,
}

impl Phase {
    /// Returns the lowercase label used in error context and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Filter => "filter",
            Phase::Fetch => "fetch",
            Phase::Parse => "parse",
            Phase::Map => "map",
            Phase::Reduce => "reduce",
            Phase::Realization => "realization",
            Phase::Provisioning => "provisioning",
            Phase::Creation => "creation",
            Phase::Polling => "polling",
            Phase::Metadata => "metadata",
        }
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical error type for the simflow orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum FlowError {
    /// An asset with the same path already exists in the collection.
    #[error("duplicated asset: {0}")]
    DuplicatedAsset(ErrorInfo),
    /// Mutation of persisted assets or provisioned collections.
    #[error("frozen: {0}")]
    Frozen(ErrorInfo),
    /// A sweep specification cannot be expanded.
    #[error("invalid sweep spec: {0}")]
    InvalidSweepSpec(ErrorInfo),
    /// A sweep mutator raised while realizing a simulation.
    #[error("sweep mutator error: {0}")]
    SweepMutator(ErrorInfo),
    /// The backend could not be reached; retryable.
    #[error("platform unavailable: {0}")]
    PlatformUnavailable(ErrorInfo),
    /// Entity creation failed on the platform.
    #[error("creation failure: {0}")]
    CreationFailure(ErrorInfo),
    /// One or more requested output files are missing.
    #[error("file not found: {0}")]
    FileNotFound(ErrorInfo),
    /// A fetched file could not be parsed.
    #[error("parse error: {0}")]
    Parse(ErrorInfo),
    /// Simulations are not ready and partial analysis is disabled.
    #[error("items not ready: {0}")]
    ItemsNotReady(ErrorInfo),
    /// Analysis exceeded its wall-clock ceiling.
    #[error("analyze timeout: {0}")]
    AnalyzeTimeout(ErrorInfo),
    /// Status polling exceeded its deadline.
    #[error("poll timeout: {0}")]
    PollTimeout(ErrorInfo),
    /// A filesystem path exceeds the platform ceiling.
    #[error("path too long: {0}")]
    PathTooLong(ErrorInfo),
    /// An analyzer callback raised.
    #[error("analyzer error: {0}")]
    Analyzer(ErrorInfo),
    /// Invalid options, platform constraint violations or empty inputs.
    #[error("validation error: {0}")]
    Validation(ErrorInfo),
    /// Unknown entity identifier.
    #[error("not found: {0}")]
    NotFound(ErrorInfo),
    /// Filesystem or process failures.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl FlowError {
    /// Builds an [`FlowError::Io`] from any displayable cause.
    pub fn io(code: &str, err: impl ToString) -> Self {
        FlowError::Io(ErrorInfo::new(code, err.to_string()))
    }

    /// Builds a [`FlowError::Serde`] from any displayable cause.
    pub fn serde(code: &str, err: impl ToString) -> Self {
        FlowError::Serde(ErrorInfo::new(code, err.to_string()))
    }

    /// Builds a [`FlowError::Validation`] with the provided code and message.
    pub fn validation(code: &str, message: impl Into<String>) -> Self {
        FlowError::Validation(ErrorInfo::new(code, message))
    }

    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            FlowError::DuplicatedAsset(info)
            | FlowError::Frozen(info)
            | FlowError::InvalidSweepSpec(info)
            | FlowError::SweepMutator(info)
            | FlowError::PlatformUnavailable(info)
            | FlowError::CreationFailure(info)
            | FlowError::FileNotFound(info)
            | FlowError::Parse(info)
            | FlowError::ItemsNotReady(info)
            | FlowError::AnalyzeTimeout(info)
            | FlowError::PollTimeout(info)
            | FlowError::PathTooLong(info)
            | FlowError::Analyzer(info)
            | FlowError::Validation(info)
            | FlowError::NotFound(info)
            | FlowError::Io(info)
            | FlowError::Serde(info) => info,
        }
    }

    fn info_mut(&mut self) -> &mut ErrorInfo {
        match self {
            FlowError::DuplicatedAsset(info)
            | FlowError::Frozen(info)
            | FlowError::InvalidSweepSpec(info)
            | FlowError::SweepMutator(info)
            | FlowError::PlatformUnavailable(info)
            | FlowError::CreationFailure(info)
            | FlowError::FileNotFound(info)
            | FlowError::Parse(info)
            | FlowError::ItemsNotReady(info)
            | FlowError::AnalyzeTimeout(info)
            | FlowError::PollTimeout(info)
            | FlowError::PathTooLong(info)
            | FlowError::Analyzer(info)
            | FlowError::Validation(info)
            | FlowError::NotFound(info)
            | FlowError::Io(info)
            | FlowError::Serde(info) => info,
        }
    }

    /// Returns the stable family name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::DuplicatedAsset(_) => "DuplicatedAsset",
            FlowError::Frozen(_) => "Frozen",
            FlowError::InvalidSweepSpec(_) => "InvalidSweepSpec",
            FlowError::SweepMutator(_) => "SweepMutatorError",
            FlowError::PlatformUnavailable(_) => "PlatformUnavailable",
            FlowError::CreationFailure(_) => "CreationFailure",
            FlowError::FileNotFound(_) => "FileNotFound",
            FlowError::Parse(_) => "ParseError",
            FlowError::ItemsNotReady(_) => "ItemsNotReady",
            FlowError::AnalyzeTimeout(_) => "AnalyzeTimeout",
            FlowError::PollTimeout(_) => "PollTimeout",
            FlowError::PathTooLong(_) => "PathTooLong",
            FlowError::Analyzer(_) => "AnalyzerError",
            FlowError::Validation(_) => "Validation",
            FlowError::NotFound(_) => "NotFound",
            FlowError::Io(_) => "Io",
            FlowError::Serde(_) => "Serde",
        }
    }

    /// Adds a context entry to the payload, keeping the first value written for a key.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info_mut()
            .context
            .entry(key.into())
            .or_insert_with(|| value.into());
        self
    }

    /// Records the phase in which the error was raised.
    pub fn with_phase(self, phase: Phase) -> Self {
        self.with_context(PHASE_KEY, phase.as_str())
    }

    /// Records the entity that triggered the error.
    pub fn with_entity(self, entity: impl ToString) -> Self {
        self.with_context(ENTITY_KEY, entity.to_string())
    }

    /// Records the analyzer that triggered the error.
    pub fn with_analyzer(self, analyzer: impl Into<String>) -> Self {
        self.with_context(ANALYZER_KEY, analyzer)
    }

    /// Returns the recorded phase label, if any.
    pub fn phase(&self) -> Option<&str> {
        self.info().context.get(PHASE_KEY).map(String::as_str)
    }

    /// Returns the recorded entity identifier, if any.
    pub fn entity(&self) -> Option<&str> {
        self.info().context.get(ENTITY_KEY).map(String::as_str)
    }

    /// Returns the recorded analyzer uid, if any.
    pub fn analyzer(&self) -> Option<&str> {
        self.info().context.get(ANALYZER_KEY).map(String::as_str)
    }

    /// Returns true when the operation may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FlowError::PlatformUnavailable(_))
    }
}
