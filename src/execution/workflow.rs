//! Workflow execution.
//!
//! The `WorkflowRunner` runs the tasks of a [`Workflow`] one at a time, in
//! document order, with a fresh [`TaskRun`] per task. Map tasks go to the
//! [`FanOutRunner`], everything else to the [`TaskExecutor`]. The first task
//! that ends in `failed` halts the run; tasks after it are never started and
//! are reported in `ready` with zero duration.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, info, info_span, warn};

use crate::config::RunnerConfig;
use crate::core::state::{TaskEvent, TaskState, Transition};
use crate::core::task::{Operator, TaskError};
use crate::core::types::{TaskName, WorkflowRunId};
use crate::core::workflow::Workflow;
use crate::events::{Event, EventBus};

use super::command::Dispatcher;
use super::executor::{RunOutcome, TaskExecutor, TaskRun};
use super::fanout::{FanOutRunner, FanOutSummary};

/// Final record of one task of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub name: TaskName,
    pub operator: Operator,
    /// Final state. `ready` for tasks that never ran.
    pub state: TaskState,
    #[serde(rename = "duration_secs", serialize_with = "as_secs")]
    pub duration: Duration,
    /// `None` for tasks that never ran.
    pub outcome: Option<RunOutcome>,
    pub transitions: Vec<Transition<TaskState, TaskEvent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_out: Option<FanOutSummary>,
}

impl TaskRecord {
    fn from_run(run: &TaskRun<'_>, outcome: Option<RunOutcome>) -> Self {
        Self {
            name: run.task().name().clone(),
            operator: run.task().operator(),
            state: run.state(),
            duration: run.duration(),
            outcome,
            transitions: run.transitions().to_vec(),
            fan_out: run.fan_out().cloned(),
        }
    }

    /// Every state the task went through, starting with `ready`.
    pub fn states(&self) -> Vec<TaskState> {
        let initial = self
            .transitions
            .first()
            .map_or(self.state, |transition| transition.from);
        std::iter::once(initial)
            .chain(self.transitions.iter().map(|transition| transition.to))
            .collect()
    }

    pub fn was_run(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Why a workflow run stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Halt {
    pub task: TaskName,
    /// Position of the task in the workflow.
    pub index: usize,
    /// True when the task's fallback ran and also failed.
    pub recovery_attempted: bool,
    pub error: String,
}

impl Halt {
    fn new(index: usize, err: &TaskError) -> Self {
        Self {
            task: err.task().clone(),
            index,
            recovery_attempted: matches!(
                err,
                TaskError::Unrecovered {
                    recovery_attempted: true,
                    ..
                }
            ),
            error: err.to_string(),
        }
    }
}

/// Result of running a workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowReport {
    pub run_id: WorkflowRunId,
    pub started_at: DateTime<Utc>,
    #[serde(rename = "duration_secs", serialize_with = "as_secs")]
    pub duration: Duration,
    pub success: bool,
    /// One record per task, in document order.
    pub tasks: Vec<TaskRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt: Option<Halt>,
}

impl WorkflowReport {
    /// True if every task ran and ended in `succeeded`.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Name of the task that halted the run.
    pub fn halted_at(&self) -> Option<&TaskName> {
        self.halt.as_ref().map(|halt| &halt.task)
    }

    /// First record with the given name.
    pub fn task(&self, name: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|record| record.name == name)
    }

    /// Names of tasks rescued by their fallback.
    pub fn recovered(&self) -> Vec<&TaskName> {
        self.tasks
            .iter()
            .filter(|record| record.outcome == Some(RunOutcome::Recovered))
            .map(|record| &record.name)
            .collect()
    }
}

fn as_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Sequential, fail-fast workflow runner.
pub struct WorkflowRunner {
    executor: TaskExecutor,
    fan_out: FanOutRunner,
    bus: Arc<EventBus>,
}

impl WorkflowRunner {
    /// Create a runner with default settings.
    pub fn new(dispatcher: Arc<dyn Dispatcher>, bus: Arc<EventBus>) -> Self {
        Self::with_config(dispatcher, bus, &RunnerConfig::default())
    }

    /// Create a runner from runner configuration.
    pub fn with_config(
        dispatcher: Arc<dyn Dispatcher>,
        bus: Arc<EventBus>,
        config: &RunnerConfig,
    ) -> Self {
        let default_timeout = config.default_timeout_secs.map(Duration::from_secs);
        let executor = TaskExecutor::new(Arc::clone(&dispatcher), Arc::clone(&bus))
            .with_default_timeout(default_timeout);
        let fan_out = FanOutRunner::new(dispatcher, Arc::clone(&bus))
            .with_max_parallel(config.max_parallel)
            .with_policy(config.map_failure_policy)
            .with_default_timeout(default_timeout);

        Self {
            executor,
            fan_out,
            bus,
        }
    }

    /// Run every task of `workflow` in order, stopping at the first failure.
    pub async fn run(&self, workflow: &Workflow) -> WorkflowReport {
        let run_id = WorkflowRunId::new();
        let span = info_span!("workflow", run = %run_id, tasks = workflow.len());
        self.run_with_id(run_id, workflow).instrument(span).await
    }

    async fn run_with_id(&self, run_id: WorkflowRunId, workflow: &Workflow) -> WorkflowReport {
        let started_at = Utc::now();
        let started = Instant::now();
        self.bus
            .emit(Event::workflow_started(run_id, workflow.len()))
            .await;

        let mut runs: Vec<TaskRun<'_>> = workflow.tasks().iter().map(TaskRun::new).collect();
        let mut outcomes: Vec<Option<RunOutcome>> = vec![None; runs.len()];
        let mut halt = None;

        for (index, run) in runs.iter_mut().enumerate() {
            let result = if run.task().operator().is_fan_out() {
                self.fan_out.run(run).await
            } else {
                self.executor.run(run).await
            };

            match result {
                Ok(outcome) => outcomes[index] = Some(outcome),
                Err(err) => {
                    outcomes[index] = Some(RunOutcome::from(&err));
                    warn!(task = %err.task(), index, error = %err, "halting workflow");
                    halt = Some(Halt::new(index, &err));
                    break;
                }
            }
        }

        let tasks: Vec<TaskRecord> = runs
            .iter()
            .zip(outcomes)
            .map(|(run, outcome)| TaskRecord::from_run(run, outcome))
            .collect();
        let duration = started.elapsed();
        let halted_at = halt.as_ref().map(|halt: &Halt| halt.task.clone());

        info!(
            run = %run_id,
            success = halt.is_none(),
            duration_ms = duration.as_millis() as u64,
            "workflow finished"
        );
        self.bus
            .emit(Event::workflow_completed(run_id, halted_at, duration))
            .await;

        WorkflowReport {
            run_id,
            started_at,
            duration,
            success: halt.is_none(),
            tasks,
            halt,
        }
    }
}
