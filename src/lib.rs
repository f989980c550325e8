//! ergo - a declarative task runner.
//!
//! A workflow file lists named tasks, each with an operator and a command.
//! Tasks run one after another in document order. Each run walks an explicit
//! lifecycle state machine (`ready → running → succeeded | failed`, with
//! `failed → recovering` when a `catch` fallback exists), and the first task
//! that ends in `failed` halts the workflow.
//!
//! The `map` operator fans a command template out over a list of inputs,
//! each item independently recoverable, and optionally folds the successful
//! items into one `reduce` command.
//!
//! ```
//! use ergo::{StateMachine, TaskEvent, TaskState};
//!
//! let mut machine = StateMachine::task_lifecycle();
//! assert!(machine.transition(TaskEvent::Succeed).is_err());
//! machine.transition(TaskEvent::Start).unwrap();
//! machine.transition(TaskEvent::Fail).unwrap();
//! machine.transition(TaskEvent::Recover).unwrap();
//! assert_eq!(machine.current_state(), TaskState::Recovering);
//! ```

pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod presentation;
pub mod testing;

pub use config::{ConfigError, RunnerConfig, YamlLoader};
pub use core::state::{
    InvalidTransition, StateMachine, TaskEvent, TaskState, Transition, TransitionTable,
};
pub use core::task::{
    CommandError, Fallback, Fold, ITEM_PLACEHOLDER, Operator, RESULTS_PLACEHOLDER, Resources,
    Task, TaskBuilder, TaskError, TaskMetadata,
};
pub use core::types::{TaskName, WorkflowRunId};
pub use core::workflow::Workflow;
pub use events::{CommandPhase, Event, EventBus, EventHandler};
pub use execution::{
    CommandOutput, CommandRequest, Dispatcher, ExecStyle, FanOutPolicy, FanOutRunner,
    FanOutSummary, Halt, ItemOutcome, ItemResult, OutputSink, ReduceResult, RunOutcome,
    ShellDispatcher, TaskExecutor, TaskRecord, TaskRun, WorkflowReport, WorkflowRunner,
};
pub use presentation::{ConsoleReporter, render_table};
