//! Task execution engine.
//!
//! The `TaskExecutor` drives one task's lifecycle machine through dispatcher
//! calls:
//! - `ready → running`, then the primary command
//! - on failure, `running → failed`, then the `catch` command if there is one
//!   (`failed → recovering → succeeded | failed`)
//! - every transition is emitted as an event as it happens
//!
//! A [`TaskRun`] is the mutable record of one execution. It is created fresh
//! for every run and never reused.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::state::{StateMachine, TaskEvent, TaskState, Transition};
use crate::core::task::{CommandError, Task, TaskError};
use crate::core::types::TaskName;
use crate::events::{CommandPhase, Event, EventBus};

use super::command::{CommandOutput, CommandRequest, Dispatcher, ExecStyle};
use super::fanout::FanOutSummary;

/// How a task run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The primary command succeeded.
    Succeeded,
    /// The primary command failed and the fallback succeeded.
    Recovered,
    /// The task ended in `failed`.
    Failed {
        /// True when a fallback ran and also failed.
        recovery_attempted: bool,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RunOutcome::Failed { .. })
    }

    /// Terminal state a run with this outcome ends in.
    pub fn final_state(&self) -> TaskState {
        match self {
            RunOutcome::Succeeded | RunOutcome::Recovered => TaskState::Succeeded,
            RunOutcome::Failed { .. } => TaskState::Failed,
        }
    }
}

impl From<&TaskError> for RunOutcome {
    fn from(err: &TaskError) -> Self {
        match err {
            TaskError::Unrecovered {
                recovery_attempted, ..
            } => RunOutcome::Failed {
                recovery_attempted: *recovery_attempted,
            },
            _ => RunOutcome::Failed {
                recovery_attempted: false,
            },
        }
    }
}

/// One execution of one task.
///
/// The run's state is always read from its state machine.
#[derive(Debug)]
pub struct TaskRun<'a> {
    task: &'a Task,
    machine: StateMachine<TaskState, TaskEvent>,
    transitions: Vec<Transition<TaskState, TaskEvent>>,
    duration: Duration,
    recovery_attempted: bool,
    fan_out: Option<FanOutSummary>,
}

impl<'a> TaskRun<'a> {
    /// Create a run in `ready` with its own lifecycle machine.
    pub fn new(task: &'a Task) -> Self {
        Self {
            task,
            machine: StateMachine::task_lifecycle(),
            transitions: Vec::new(),
            duration: Duration::ZERO,
            recovery_attempted: false,
            fan_out: None,
        }
    }

    pub fn task(&self) -> &'a Task {
        self.task
    }

    pub fn state(&self) -> TaskState {
        self.machine.current_state()
    }

    /// Transitions taken so far, in order.
    pub fn transitions(&self) -> &[Transition<TaskState, TaskEvent>] {
        &self.transitions
    }

    /// Every state the run has been in, starting with the initial one.
    pub fn state_sequence(&self) -> Vec<TaskState> {
        let initial = self
            .transitions
            .first()
            .map_or(self.state(), |transition| transition.from);
        std::iter::once(initial)
            .chain(self.transitions.iter().map(|transition| transition.to))
            .collect()
    }

    /// Wall time of the last execution.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// True once a fallback has been dispatched for this run.
    pub fn recovery_attempted(&self) -> bool {
        self.recovery_attempted
    }

    /// Fan-out results, for map tasks that got as far as running items.
    pub fn fan_out(&self) -> Option<&FanOutSummary> {
        self.fan_out.as_ref()
    }

    pub(crate) fn set_fan_out(&mut self, summary: FanOutSummary) {
        self.fan_out = Some(summary);
    }

    pub(crate) fn mark_recovery_attempted(&mut self) {
        self.recovery_attempted = true;
    }

    /// Apply `event` and report the transition.
    pub(crate) async fn advance(
        &mut self,
        event: TaskEvent,
        bus: &EventBus,
    ) -> Result<Transition<TaskState, TaskEvent>, TaskError> {
        let transition =
            self.machine
                .transition(event)
                .map_err(|source| TaskError::InvalidTransition {
                    task: self.task.name().clone(),
                    source,
                })?;
        debug!(
            task = %self.task.name(),
            from = %transition.from,
            to = %transition.to,
            "state changed"
        );
        self.transitions.push(transition);
        bus.emit(Event::state_changed(self.task.name().clone(), transition))
            .await;
        Ok(transition)
    }

    /// Record the run's duration and report its outcome.
    pub(crate) async fn finish(
        &mut self,
        started: Instant,
        result: &Result<RunOutcome, TaskError>,
        bus: &EventBus,
    ) {
        self.duration = started.elapsed();
        let outcome = match result {
            Ok(outcome) => *outcome,
            Err(err) => RunOutcome::from(err),
        };
        match result {
            Ok(_) => info!(
                task = %self.task.name(),
                outcome = ?outcome,
                duration_ms = self.duration.as_millis() as u64,
                "task finished"
            ),
            Err(err) => warn!(task = %self.task.name(), error = %err, "task failed"),
        }
        bus.emit(Event::task_finished(
            self.task.name().clone(),
            outcome,
            self.duration,
        ))
        .await;
    }
}

/// Dispatch a command, reporting the dispatch and any failure.
pub(crate) async fn dispatch_reported(
    dispatcher: &dyn Dispatcher,
    bus: &EventBus,
    task: &TaskName,
    phase: CommandPhase,
    request: &CommandRequest,
) -> Result<CommandOutput, CommandError> {
    bus.emit(Event::command_dispatched(
        task.clone(),
        phase,
        request.command.clone(),
    ))
    .await;

    let result = dispatcher.dispatch(request).await;
    if let Err(err) = &result {
        debug!(task = %task, phase = %phase, error = %err, "command failed");
        bus.emit(Event::command_failed(task.clone(), phase, err)).await;
    }
    result
}

/// Executor for running single, non-map tasks.
#[derive(Clone)]
pub struct TaskExecutor {
    dispatcher: Arc<dyn Dispatcher>,
    bus: Arc<EventBus>,
    default_timeout: Option<Duration>,
}

impl TaskExecutor {
    /// Create a new executor.
    pub fn new(dispatcher: Arc<dyn Dispatcher>, bus: Arc<EventBus>) -> Self {
        Self {
            dispatcher,
            bus,
            default_timeout: None,
        }
    }

    /// Timeout for commands of tasks that declare none.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Run a task to a terminal state.
    ///
    /// Returns [`RunOutcome::Succeeded`] or [`RunOutcome::Recovered`]; a task
    /// ending in `failed` is returned as [`TaskError::Unrecovered`]. A run
    /// that is not in `ready` fails with [`TaskError::InvalidTransition`]
    /// before anything is dispatched.
    pub async fn run(&self, run: &mut TaskRun<'_>) -> Result<RunOutcome, TaskError> {
        let task = run.task();
        let span = info_span!(
            "task",
            task = %task.name(),
            operator = %task.operator(),
        );

        let started = Instant::now();
        let result = self.drive(run).instrument(span).await;
        run.finish(started, &result, &self.bus).await;
        result
    }

    async fn drive(&self, run: &mut TaskRun<'_>) -> Result<RunOutcome, TaskError> {
        let task = run.task();
        let style = ExecStyle::from(task.operator());

        run.advance(TaskEvent::Start, &self.bus).await?;

        let request = self.request(task, task.command(), style);
        let primary_err = match self.dispatch(task, CommandPhase::Primary, &request).await {
            Ok(_) => {
                run.advance(TaskEvent::Succeed, &self.bus).await?;
                return Ok(RunOutcome::Succeeded);
            }
            Err(err) => err,
        };

        run.advance(TaskEvent::Fail, &self.bus).await?;

        let Some(fallback) = task.catch() else {
            return Err(TaskError::Unrecovered {
                task: task.name().clone(),
                recovery_attempted: false,
                source: primary_err,
            });
        };

        run.mark_recovery_attempted();
        run.advance(TaskEvent::Recover, &self.bus).await?;

        let request = self.request(task, &fallback.command, style);
        match self.dispatch(task, CommandPhase::Fallback, &request).await {
            Ok(_) => {
                run.advance(TaskEvent::Succeed, &self.bus).await?;
                Ok(RunOutcome::Recovered)
            }
            Err(err) => {
                run.advance(TaskEvent::Fail, &self.bus).await?;
                Err(TaskError::Unrecovered {
                    task: task.name().clone(),
                    recovery_attempted: true,
                    source: err,
                })
            }
        }
    }

    fn request(&self, task: &Task, command: &str, style: ExecStyle) -> CommandRequest {
        CommandRequest::new(command, style)
            .with_timeout(task.timeout().or(self.default_timeout))
            .with_label(task.name().as_str())
    }

    async fn dispatch(
        &self,
        task: &Task,
        phase: CommandPhase,
        request: &CommandRequest,
    ) -> Result<CommandOutput, CommandError> {
        dispatch_reported(
            self.dispatcher.as_ref(),
            &self.bus,
            task.name(),
            phase,
            request,
        )
        .await
    }
}
