//! Task execution engine.
//!
//! This module provides the execution infrastructure for running workflows:
//! command dispatch, single-task execution with fallback, fan-out for `map`
//! tasks and the sequential workflow runner.

mod command;
mod executor;
mod fanout;
mod workflow;

pub use crate::core::task::CommandError;
pub use command::{
    CommandOutput, CommandRequest, Dispatcher, ExecStyle, Invocation, OutputSink, ShellDispatcher,
};
pub use executor::{RunOutcome, TaskExecutor, TaskRun};
pub use fanout::{FanOutPolicy, FanOutRunner, FanOutSummary, ItemOutcome, ItemResult, ReduceResult};
pub use workflow::{Halt, TaskRecord, WorkflowReport, WorkflowRunner};
