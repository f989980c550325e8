//! YAML configuration parsing.
//!
//! Parses workflow files into a [`Workflow`] and the runner's own
//! configuration into a [`RunnerConfig`].

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::task::{Operator, Resources, Task, TaskMetadata};
use crate::core::workflow::Workflow;

use super::error::ConfigError;
use super::types::{CommandConfig, RunnerConfig, TaskConfig, WorkflowDocument};

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load a workflow from a file.
    pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow, ConfigError> {
        let path = path.as_ref();
        let document = Self::read_document(path)?;
        debug!(path = %path.display(), tasks = document.workflow.tasks.len(), "loaded workflow file");
        Self::build_workflow(document)
    }

    /// Parse a workflow from a YAML string.
    pub fn parse_workflow(yaml: &str) -> Result<Workflow, ConfigError> {
        Self::build_workflow(Self::parse_document(yaml)?)
    }

    /// Parse the raw workflow document without validating it.
    pub fn parse_document(yaml: &str) -> Result<WorkflowDocument, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read the raw workflow document from a file without validating it.
    pub fn read_document(path: impl AsRef<Path>) -> Result<WorkflowDocument, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load runner configuration from a file.
    pub fn load_runner_config(path: impl AsRef<Path>) -> Result<RunnerConfig, ConfigError> {
        let path = path.as_ref();
        let content = read_file(path)?;
        let config: RunnerConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate_runner_config(&config)?;
        Ok(config)
    }

    /// Parse runner configuration from a YAML string.
    pub fn parse_runner_config(yaml: &str) -> Result<RunnerConfig, ConfigError> {
        let config: RunnerConfig = serde_yaml::from_str(yaml)?;
        Self::validate_runner_config(&config)?;
        Ok(config)
    }

    /// Validate runner configuration values.
    pub fn validate_runner_config(config: &RunnerConfig) -> Result<(), ConfigError> {
        // A zero-sized pool could never dispatch a map item
        if config.max_parallel == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_parallel cannot be zero".into(),
            ));
        }
        if config.default_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "default_timeout_secs cannot be zero".into(),
            ));
        }
        Ok(())
    }

    /// Validate a document and convert it into a workflow.
    fn build_workflow(document: WorkflowDocument) -> Result<Workflow, ConfigError> {
        let mut seen = HashSet::new();
        let mut tasks = Vec::with_capacity(document.workflow.tasks.len());

        for (index, config) in document.workflow.tasks.into_iter().enumerate() {
            let task = Self::build_task(index, config)?;
            if !seen.insert(task.name().clone()) {
                // Names are for display only; duplicates still run.
                warn!(task = %task.name(), "duplicate task name");
            }
            tasks.push(task);
        }

        Ok(Workflow::new(tasks))
    }

    fn build_task(index: usize, config: TaskConfig) -> Result<Task, ConfigError> {
        if config.name.trim().is_empty() {
            return Err(ConfigError::MissingField(format!("tasks[{}].name", index)));
        }
        if config.command.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "tasks[{}].command (task '{}')",
                index, config.name
            )));
        }
        if config.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(format!(
                "task '{}': timeout_secs cannot be zero",
                config.name
            )));
        }

        let raw_operator = config.operator.as_deref().unwrap_or("");
        let operator = Operator::from_name(raw_operator).unwrap_or_else(|| {
            warn!(
                task = %config.name,
                operator = raw_operator,
                "unrecognized operator, running as bash"
            );
            Operator::Shell
        });

        if !operator.is_fan_out() {
            if !config.input.is_empty() {
                warn!(task = %config.name, "'input' is only used by the map operator");
            }
            if config.reduce.is_some() {
                warn!(task = %config.name, "'reduce' is only used by the map operator");
            }
        }

        let mut builder = Task::builder(config.name, config.command)
            .operator(operator)
            .input(config.input)
            .metadata(TaskMetadata {
                output: config.output,
                depends_on: config.depends_on,
                resources: config.resources.map(|r| Resources {
                    cpu: r.cpu,
                    mem: r.mem,
                }),
                container: config.container,
            });

        if let Some(command) = non_empty(config.catch) {
            builder = builder.catch(command);
        }
        if let Some(command) = non_empty(config.reduce) {
            builder = builder.reduce(command);
        }
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(builder.build())
    }
}

/// A `catch`/`reduce` block with an empty command counts as absent.
fn non_empty(config: Option<CommandConfig>) -> Option<String> {
    config
        .map(|c| c.command)
        .filter(|command| !command.trim().is_empty())
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
        path: path.to_path_buf(),
        source,
    })
}
