//! Lifecycle events and event handling.
//!
//! This module provides event emission for workflow, task and command
//! lifecycle events. Every state transition is reported as a
//! [`Event::StateChanged`] as it happens; presentation is left to handlers.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::state::{TaskEvent, TaskState, Transition};
use crate::core::task::CommandError;
use crate::core::types::{TaskName, WorkflowRunId};
use crate::execution::{ItemOutcome, RunOutcome};

/// Which command of a task was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandPhase {
    /// The task's own command.
    Primary,
    /// The task's `catch` command.
    Fallback,
    /// A map template applied to one item.
    MapItem,
    /// The `catch` command applied to one failed map item.
    MapFallback,
    /// The `reduce` command of a map task.
    Reduce,
}

impl CommandPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandPhase::Primary => "command",
            CommandPhase::Fallback => "catch",
            CommandPhase::MapItem => "item",
            CommandPhase::MapFallback => "item catch",
            CommandPhase::Reduce => "reduce",
        }
    }
}

impl fmt::Display for CommandPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A workflow run has started.
    WorkflowStarted {
        run_id: WorkflowRunId,
        task_count: usize,
        timestamp: Instant,
    },

    /// A task's state machine moved along an edge.
    StateChanged {
        task: TaskName,
        from: TaskState,
        to: TaskState,
        event: TaskEvent,
        timestamp: Instant,
    },

    /// A command is about to run.
    CommandDispatched {
        task: TaskName,
        phase: CommandPhase,
        command: String,
        timestamp: Instant,
    },

    /// A command failed to launch, exited non-zero or timed out.
    CommandFailed {
        task: TaskName,
        phase: CommandPhase,
        error: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
        timestamp: Instant,
    },

    /// One map item reached its final result.
    ItemCompleted {
        task: TaskName,
        index: usize,
        item: String,
        outcome: ItemOutcome,
        timestamp: Instant,
    },

    /// The reduce command of a map task finished.
    ReduceCompleted {
        task: TaskName,
        command: String,
        success: bool,
        timestamp: Instant,
    },

    /// A task reached a terminal state.
    TaskFinished {
        task: TaskName,
        outcome: RunOutcome,
        duration: Duration,
        timestamp: Instant,
    },

    /// A workflow run finished, either completed or halted.
    WorkflowCompleted {
        run_id: WorkflowRunId,
        success: bool,
        halted_at: Option<TaskName>,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::WorkflowStarted { timestamp, .. } => *timestamp,
            Event::StateChanged { timestamp, .. } => *timestamp,
            Event::CommandDispatched { timestamp, .. } => *timestamp,
            Event::CommandFailed { timestamp, .. } => *timestamp,
            Event::ItemCompleted { timestamp, .. } => *timestamp,
            Event::ReduceCompleted { timestamp, .. } => *timestamp,
            Event::TaskFinished { timestamp, .. } => *timestamp,
            Event::WorkflowCompleted { timestamp, .. } => *timestamp,
        }
    }

    /// Name of the task the event belongs to, if any.
    pub fn task(&self) -> Option<&TaskName> {
        match self {
            Event::StateChanged { task, .. }
            | Event::CommandDispatched { task, .. }
            | Event::CommandFailed { task, .. }
            | Event::ItemCompleted { task, .. }
            | Event::ReduceCompleted { task, .. }
            | Event::TaskFinished { task, .. } => Some(task),
            Event::WorkflowStarted { .. } | Event::WorkflowCompleted { .. } => None,
        }
    }

    /// Create a WorkflowStarted event.
    pub fn workflow_started(run_id: WorkflowRunId, task_count: usize) -> Self {
        Event::WorkflowStarted {
            run_id,
            task_count,
            timestamp: Instant::now(),
        }
    }

    /// Create a StateChanged event from a completed transition.
    pub fn state_changed(task: TaskName, transition: Transition<TaskState, TaskEvent>) -> Self {
        Event::StateChanged {
            task,
            from: transition.from,
            to: transition.to,
            event: transition.event,
            timestamp: Instant::now(),
        }
    }

    /// Create a CommandDispatched event.
    pub fn command_dispatched(
        task: TaskName,
        phase: CommandPhase,
        command: impl Into<String>,
    ) -> Self {
        Event::CommandDispatched {
            task,
            phase,
            command: command.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a CommandFailed event carrying the error's stderr and exit code.
    pub fn command_failed(task: TaskName, phase: CommandPhase, error: &CommandError) -> Self {
        Event::CommandFailed {
            task,
            phase,
            error: error.to_string(),
            stderr: error
                .stderr()
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string),
            exit_code: error.exit_code(),
            timestamp: Instant::now(),
        }
    }

    /// Create an ItemCompleted event.
    pub fn item_completed(
        task: TaskName,
        index: usize,
        item: impl Into<String>,
        outcome: ItemOutcome,
    ) -> Self {
        Event::ItemCompleted {
            task,
            index,
            item: item.into(),
            outcome,
            timestamp: Instant::now(),
        }
    }

    /// Create a ReduceCompleted event.
    pub fn reduce_completed(task: TaskName, command: impl Into<String>, success: bool) -> Self {
        Event::ReduceCompleted {
            task,
            command: command.into(),
            success,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFinished event.
    pub fn task_finished(task: TaskName, outcome: RunOutcome, duration: Duration) -> Self {
        Event::TaskFinished {
            task,
            outcome,
            duration,
            timestamp: Instant::now(),
        }
    }

    /// Create a WorkflowCompleted event.
    pub fn workflow_completed(
        run_id: WorkflowRunId,
        halted_at: Option<TaskName>,
        duration: Duration,
    ) -> Self {
        Event::WorkflowCompleted {
            run_id,
            success: halted_at.is_none(),
            halted_at,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers, in registration order.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
