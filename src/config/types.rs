//! Configuration type definitions.
//!
//! This module contains the serde structures for workflow files
//! (`workflow.tasks`) and for the runner's own configuration file.

use serde::{Deserialize, Deserializer, Serialize};

use crate::execution::FanOutPolicy;

/// Top-level workflow document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub workflow: WorkflowSection,
}

/// The `workflow:` mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSection {
    /// Task definitions, in execution order.
    pub tasks: Vec<TaskConfig>,
}

/// Task configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// `bash`, `cli`, `python` or `map`. Absent means `bash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    /// Command, or command template for `map`.
    #[serde(default)]
    pub command: String,
    /// Items for `map`. Scalars of any type are read as strings.
    #[serde(
        default,
        deserialize_with = "scalar_strings",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub input: Vec<String>,
    /// Not interpreted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<String>,
    /// Fallback command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch: Option<CommandConfig>,
    /// Reduce command for `map`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce: Option<CommandConfig>,
    /// Not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,
    /// Not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesConfig>,
    /// Not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Per-command timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// A `{ command: ... }` mapping, used by `catch` and `reduce`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default)]
    pub command: String,
}

/// Declared resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcesConfig {
    pub cpu: Option<u32>,
    pub mem: Option<String>,
}

/// Runner configuration (ergo.yaml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Maximum map items in flight at once.
    pub max_parallel: usize,
    /// Timeout applied to commands of tasks that declare none.
    pub default_timeout_secs: Option<u64>,
    /// Whether excluded map items fail the map task.
    pub map_failure_policy: FanOutPolicy,
    /// Shell interpreter. Defaults to `bash` (`cmd` on Windows).
    pub shell: Option<String>,
    /// Interpreter for the `python` operator. Defaults to `python`.
    pub python: Option<String>,
    /// Echo command stdout while it runs.
    pub stream_output: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel: 1,
            default_timeout_secs: None,
            map_failure_policy: FanOutPolicy::default(),
            shell: None,
            python: None,
            stream_output: true,
        }
    }
}

fn scalar_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_yaml::Value;

    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    values
        .into_iter()
        .map(|value| match value {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(D::Error::custom(format!(
                "input items must be scalars, found {:?}",
                other
            ))),
        })
        .collect()
}
