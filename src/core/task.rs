//! Task definitions and error types.
//!
//! A [`Task`] is one entry of a workflow: a name, an [`Operator`] choosing how
//! the command runs, the command itself, and the optional `catch` and
//! `reduce` commands. Fields the engine never interprets (`output`,
//! `depends_on`, `resources`, `container`) travel along in [`TaskMetadata`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::state::{InvalidTransition, TaskEvent, TaskState};
use super::types::TaskName;

/// Token replaced by the current input item in map and per-item catch commands.
pub const ITEM_PLACEHOLDER: &str = "{item}";

/// Token replaced by the comma-joined successful items in a reduce command.
pub const RESULTS_PLACEHOLDER: &str = "{results}";

/// Errors produced by running a single command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The interpreter could not be launched (e.g. binary not found).
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited with a non-zero code.
    #[error("command exited with code {code}")]
    Exited { code: i32, stderr: String },

    /// The command was terminated without an exit code (killed by a signal).
    #[error("command terminated without an exit code")]
    Terminated { stderr: String },

    /// The command exceeded its timeout and was killed.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// Reading the child's output or waiting on it failed.
    #[error("failed to collect command output: {0}")]
    Io(#[source] std::io::Error),
}

impl CommandError {
    /// Captured standard error, when the command got far enough to produce any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CommandError::Exited { stderr, .. } | CommandError::Terminated { stderr } => {
                Some(stderr)
            }
            _ => None,
        }
    }

    /// Exit code, when the command exited normally.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            CommandError::Exited { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Errors that end a task run without success.
///
/// Every variant halts the workflow.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The executor drove the state machine along an edge that does not exist.
    #[error("task '{task}': {source}")]
    InvalidTransition {
        task: TaskName,
        #[source]
        source: InvalidTransition<TaskState, TaskEvent>,
    },

    /// The primary command failed and no fallback rescued it.
    #[error("task '{task}' failed{}: {source}", recovery_note(.recovery_attempted))]
    Unrecovered {
        task: TaskName,
        recovery_attempted: bool,
        #[source]
        source: CommandError,
    },

    /// A map task under the strict policy left items unprocessed.
    #[error(
        "task '{task}': {excluded} of {total} map item(s) failed{}",
        reduce_note(.reduce_failed)
    )]
    FanOutIncomplete {
        task: TaskName,
        excluded: usize,
        total: usize,
        reduce_failed: bool,
    },

    /// A fan-out worker panicked before reporting its item.
    #[error("task '{task}': fan-out worker for item {index} panicked: {message}")]
    WorkerPanicked {
        task: TaskName,
        index: usize,
        message: String,
    },
}

fn recovery_note(attempted: &bool) -> &'static str {
    if *attempted {
        " (fallback also failed)"
    } else {
        ""
    }
}

fn reduce_note(failed: &bool) -> &'static str {
    if *failed { " and reduce failed" } else { "" }
}

impl TaskError {
    /// Name of the task the error belongs to.
    pub fn task(&self) -> &TaskName {
        match self {
            TaskError::InvalidTransition { task, .. }
            | TaskError::Unrecovered { task, .. }
            | TaskError::FanOutIncomplete { task, .. }
            | TaskError::WorkerPanicked { task, .. } => task,
        }
    }
}

/// Execution style of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// `bash`, and the fallback for empty or unrecognized operators.
    #[default]
    #[serde(rename = "bash")]
    Shell,
    /// `cli`: explicit shell invocation.
    #[serde(rename = "cli")]
    ExplicitShell,
    /// `python`: command passed to the interpreter as an inline program.
    #[serde(rename = "python")]
    Interpreted,
    /// `map`: fan the command out over `input`.
    #[serde(rename = "map")]
    FanOut,
}

impl Operator {
    /// Resolve an operator name from a workflow file.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    /// Returns `None` for names that are not recognized; an empty name is
    /// the default shell operator.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "bash" => Some(Operator::Shell),
            "cli" => Some(Operator::ExplicitShell),
            "python" => Some(Operator::Interpreted),
            "map" => Some(Operator::FanOut),
            _ => None,
        }
    }

    /// Name as written in workflow files.
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Shell => "bash",
            Operator::ExplicitShell => "cli",
            Operator::Interpreted => "python",
            Operator::FanOut => "map",
        }
    }

    pub fn is_fan_out(&self) -> bool {
        matches!(self, Operator::FanOut)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Command run after the primary command fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallback {
    pub command: String,
}

impl Fallback {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// The fallback command with `{item}` replaced by `item`.
    pub fn for_item(&self, item: &str) -> String {
        self.command.replace(ITEM_PLACEHOLDER, item)
    }
}

/// Command run once after a fan-out completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub command: String,
}

impl Fold {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    /// The reduce command with `{results}` replaced by the comma-joined items.
    pub fn with_results<S: AsRef<str>>(&self, results: &[S]) -> String {
        let joined = results
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        self.command.replace(RESULTS_PLACEHOLDER, &joined)
    }
}

/// Declared resource requirements. Carried, never enforced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: Option<u32>,
    pub mem: Option<String>,
}

/// Fields preserved from the workflow file that the engine never reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub output: Vec<String>,
    pub depends_on: Option<String>,
    pub resources: Option<Resources>,
    pub container: Option<String>,
}

/// One task of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    name: TaskName,
    operator: Operator,
    command: String,
    input: Vec<String>,
    catch: Option<Fallback>,
    reduce: Option<Fold>,
    timeout: Option<Duration>,
    metadata: TaskMetadata,
}

impl Task {
    /// Create a new builder for a task.
    pub fn builder(name: impl Into<String>, command: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name, command)
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// The primary command (a template for map tasks).
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Map inputs, in declaration order.
    pub fn input(&self) -> &[String] {
        &self.input
    }

    pub fn catch(&self) -> Option<&Fallback> {
        self.catch.as_ref()
    }

    pub fn reduce(&self) -> Option<&Fold> {
        self.reduce.as_ref()
    }

    /// Per-command timeout declared on the task.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn metadata(&self) -> &TaskMetadata {
        &self.metadata
    }

    /// The command with `{item}` replaced by `item`.
    pub fn command_for_item(&self, item: &str) -> String {
        self.command.replace(ITEM_PLACEHOLDER, item)
    }
}

/// Builder for creating `Task` instances.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    name: String,
    operator: Operator,
    command: String,
    input: Vec<String>,
    catch: Option<Fallback>,
    reduce: Option<Fold>,
    timeout: Option<Duration>,
    metadata: TaskMetadata,
}

impl TaskBuilder {
    /// Create a new builder for a shell task.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operator: Operator::default(),
            command: command.into(),
            input: Vec::new(),
            catch: None,
            reduce: None,
            timeout: None,
            metadata: TaskMetadata::default(),
        }
    }

    pub fn operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    /// Add map inputs.
    pub fn input<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input.extend(items.into_iter().map(Into::into));
        self
    }

    /// Set the fallback command.
    pub fn catch(mut self, command: impl Into<String>) -> Self {
        self.catch = Some(Fallback::new(command));
        self
    }

    /// Set the reduce command.
    pub fn reduce(mut self, command: impl Into<String>) -> Self {
        self.reduce = Some(Fold::new(command));
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn build(self) -> Task {
        Task {
            name: TaskName::new(self.name),
            operator: self.operator,
            command: self.command,
            input: self.input,
            catch: self.catch,
            reduce: self.reduce,
            timeout: self.timeout,
            metadata: self.metadata,
        }
    }
}
