//! Command lines and the parameterized unit of work a sweep mutates.

use std::fmt::{self, Display};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use simflow_assets::{Asset, AssetCollection};
use simflow_core::errors::FlowError;
use simflow_core::serde::value_to_tag;

/// Default task type label.
pub const COMMAND_TASK: &str = "command";

/// Executable plus arguments. Arguments may hold `{name}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    /// Program to run.
    pub executable: String,
    /// Arguments, in order.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandLine {
    /// Command with no arguments.
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            args: Vec::new(),
        }
    }

    /// Splits a command string on whitespace.
    pub fn from_string(command: &str) -> Self {
        let mut parts = command.split_whitespace().map(str::to_string);
        Self {
            executable: parts.next().unwrap_or_default(),
            args: parts.collect(),
        }
    }

    /// Appends an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends an option followed by its value.
    pub fn option(mut self, option: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push(option.into());
        self.args.push(value.into());
        self
    }

    /// Substitutes `{name}` placeholders with parameter values.
    /// Placeholders without a matching parameter are left untouched.
    pub fn render(&self, parameters: &IndexMap<String, Value>) -> Vec<String> {
        let mut rendered = Vec::with_capacity(self.args.len() + 1);
        rendered.push(self.executable.clone());
        for arg in &self.args {
            let mut text = arg.clone();
            for (name, value) in parameters {
                let placeholder = format!("{{{name}}}");
                if text.contains(&placeholder) {
                    text = text.replace(&placeholder, &value_to_tag(value));
                }
            }
            rendered.push(text);
        }
        rendered
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.executable)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Command, declared assets and parameter dictionary for one unit of work.
#[derive(Debug, Clone, Default)]
pub struct Task {
    /// Command template.
    pub command: CommandLine,
    /// Type label recorded in the `task_type` tag.
    pub task_type: String,
    parameters: IndexMap<String, Value>,
    /// Assets shared by every simulation of an experiment.
    pub common_assets: AssetCollection,
    /// Per-simulation assets.
    pub transient_assets: AssetCollection,
    /// When set, the parameter dictionary is written to this file as a transient asset.
    pub config_filename: Option<String>,
}

impl Task {
    /// Creates a command task.
    pub fn new(command: CommandLine) -> Self {
        Self {
            command,
            task_type: COMMAND_TASK.to_string(),
            ..Self::default()
        }
    }

    /// Sets the type label.
    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }

    /// Emits the parameter dictionary as a JSON file named `filename`.
    pub fn with_config_file(mut self, filename: impl Into<String>) -> Self {
        self.config_filename = Some(filename.into());
        self
    }

    /// Sets a parameter, keeping its original position when it already exists.
    /// Returns the previous value.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.parameters.insert(name.into(), value)
    }

    /// Removes a parameter entirely.
    pub fn remove_parameter(&mut self, name: &str) -> Option<Value> {
        self.parameters.shift_remove(name)
    }

    /// Looks up a parameter.
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// Parameters in insertion order.
    pub fn parameters(&self) -> &IndexMap<String, Value> {
        &self.parameters
    }

    /// Command with placeholders rendered from the parameters.
    pub fn rendered_command(&self) -> Vec<String> {
        self.command.render(&self.parameters)
    }

    /// Transient assets plus, when configured, the JSON parameter file.
    pub fn gather_transient_assets(&self) -> Result<AssetCollection, FlowError> {
        let mut gathered = self.transient_assets.clone();
        if let Some(filename) = &self.config_filename {
            let document = Value::Object(
                self.parameters
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            );
            gathered.add_or_replace(Asset::from_json(filename.clone(), &document)?)?;
        }
        Ok(gathered)
    }

    /// Serializable view used in job records.
    pub fn record(&self) -> TaskRecord {
        TaskRecord {
            command: self.command.clone(),
            task_type: self.task_type.clone(),
            parameters: self.parameters.clone(),
            config_filename: self.config_filename.clone(),
        }
    }

    /// Rebuilds a task from its record. Assets are not restored.
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            command: record.command.clone(),
            task_type: record.task_type.clone(),
            parameters: record.parameters.clone(),
            config_filename: record.config_filename.clone(),
            ..Self::default()
        }
    }
}

/// Serializable view of a [`Task`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Command template.
    pub command: CommandLine,
    /// Type label.
    pub task_type: String,
    /// Parameters in insertion order.
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,
    /// JSON parameter file name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_filename: Option<String>,
}
