//! Core domain types: the lifecycle state machine, tasks and workflows.

pub mod state;
pub mod task;
pub mod types;
pub mod workflow;
