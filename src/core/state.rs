//! Finite state machine and the task lifecycle.
//!
//! [`StateMachine`] is generic over its state and event types. It owns a
//! current state and a read-only [`TransitionTable`]; it performs no I/O and
//! fires no callbacks. A successful [`StateMachine::transition`] returns the
//! [`Transition`] that was taken so the caller can report it.
//!
//! The task lifecycle is expressed with [`TaskState`], [`TaskEvent`] and
//! [`TransitionTable::task_lifecycle`]:
//!
//! ```text
//! ready      --start-->   running
//! running    --succeed--> succeeded
//! running    --fail-->    failed
//! failed     --recover--> recovering
//! recovering --succeed--> succeeded
//! recovering --fail-->    failed
//! ```
//!
//! ```rust
//! use ergo::{StateMachine, TaskEvent, TaskState};
//!
//! let mut machine = StateMachine::task_lifecycle();
//! assert!(machine.can_transition(TaskEvent::Start));
//! assert!(machine.transition(TaskEvent::Succeed).is_err());
//! assert_eq!(machine.current_state(), TaskState::Ready);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use thiserror::Error;

/// Lifecycle state of a task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Created, not started.
    Ready,
    /// Primary command in flight.
    Running,
    /// Finished successfully, either directly or through the fallback.
    Succeeded,
    /// Primary command failed; the fallback may still run.
    Failed,
    /// Fallback command in flight.
    Recovering,
}

impl TaskState {
    /// Lowercase name used in events and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Recovering => "recovering",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskEvent {
    Start,
    Succeed,
    Fail,
    Recover,
}

impl TaskEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEvent::Start => "start",
            TaskEvent::Succeed => "succeed",
            TaskEvent::Fail => "fail",
            TaskEvent::Recover => "recover",
        }
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested event has no edge from the machine's current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: no edge for event '{event}' from state '{state}'")]
pub struct InvalidTransition<S, E> {
    /// State the machine was in (and is still in).
    pub state: S,
    /// Event that was rejected.
    pub event: E,
}

/// An edge that was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition<S, E> {
    pub from: S,
    pub event: E,
    pub to: S,
}

/// Immutable mapping from `(state, event)` to destination state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable<S, E>
where
    S: Eq + Hash,
    E: Eq + Hash,
{
    edges: HashMap<(S, E), S>,
}

impl<S, E> TransitionTable<S, E>
where
    S: Copy + Eq + Hash,
    E: Copy + Eq + Hash,
{
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            edges: HashMap::new(),
        }
    }

    /// Add an edge. A later edge for the same `(from, event)` replaces the
    /// earlier one.
    pub fn with_edge(mut self, from: S, event: E, to: S) -> Self {
        self.edges.insert((from, event), to);
        self
    }

    /// Destination for `event` from `from`, if an edge exists.
    pub fn destination(&self, from: S, event: E) -> Option<S> {
        self.edges.get(&(from, event)).copied()
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// True if the table has no edges.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl<S, E> Default for TransitionTable<S, E>
where
    S: Copy + Eq + Hash,
    E: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionTable<TaskState, TaskEvent> {
    /// The canonical task lifecycle table.
    pub fn task_lifecycle() -> Self {
        use TaskEvent::*;
        use TaskState::*;

        Self::new()
            .with_edge(Ready, Start, Running)
            .with_edge(Running, Succeed, Succeeded)
            .with_edge(Running, Fail, Failed)
            .with_edge(Failed, Recover, Recovering)
            .with_edge(Recovering, Succeed, Succeeded)
            .with_edge(Recovering, Fail, Failed)
    }
}

/// A finite state machine over a fixed transition table.
#[derive(Debug, Clone)]
pub struct StateMachine<S, E>
where
    S: Eq + Hash,
    E: Eq + Hash,
{
    current: S,
    table: Arc<TransitionTable<S, E>>,
}

impl<S, E> StateMachine<S, E>
where
    S: Copy + Eq + Hash,
    E: Copy + Eq + Hash,
{
    /// Create a machine in `initial` state.
    ///
    /// The table is shared read-only; several machines may hold the same one.
    pub fn new(initial: S, table: Arc<TransitionTable<S, E>>) -> Self {
        Self {
            current: initial,
            table,
        }
    }

    /// True iff the current state has an edge for `event`.
    pub fn can_transition(&self, event: E) -> bool {
        self.table.destination(self.current, event).is_some()
    }

    /// Apply `event`.
    ///
    /// On success the current state becomes the edge's destination. On
    /// failure the state is left unchanged.
    pub fn transition(&mut self, event: E) -> Result<Transition<S, E>, InvalidTransition<S, E>> {
        match self.table.destination(self.current, event) {
            Some(to) => {
                let from = std::mem::replace(&mut self.current, to);
                Ok(Transition { from, event, to })
            }
            None => Err(InvalidTransition {
                state: self.current,
                event,
            }),
        }
    }

    /// The current state.
    pub fn current_state(&self) -> S {
        self.current
    }
}

impl StateMachine<TaskState, TaskEvent> {
    /// A fresh machine in `ready` over its own copy of the lifecycle table.
    pub fn task_lifecycle() -> Self {
        Self::new(
            TaskState::Ready,
            Arc::new(TransitionTable::task_lifecycle()),
        )
    }
}
