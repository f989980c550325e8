//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use ergo::testing::RecordingHandler;
use ergo::{
    Event, EventBus, RunnerConfig, ShellDispatcher, TaskState, WorkflowReport, WorkflowRunner,
    YamlLoader,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Write a workflow document to a temporary `.yaml` file.
pub fn workflow_file(yaml: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".yaml")
        .tempfile()
        .unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Dispatcher running commands through `sh`.
pub fn sh() -> Arc<ShellDispatcher> {
    Arc::new(ShellDispatcher::new().with_shell("sh"))
}

/// Load a workflow from a file and run it with `sh`, recording every event.
pub async fn run_file(yaml: &str, config: &RunnerConfig) -> (WorkflowReport, Arc<RecordingHandler>) {
    let file = workflow_file(yaml);
    let workflow = YamlLoader::load_workflow(file.path()).unwrap();

    let bus = Arc::new(EventBus::new());
    let handler = Arc::new(RecordingHandler::new());
    bus.register(handler.clone()).await;

    let report = WorkflowRunner::with_config(sh(), bus, config)
        .run(&workflow)
        .await;
    (report, handler)
}

/// Run with the default runner configuration.
pub async fn run_default(yaml: &str) -> WorkflowReport {
    run_file(yaml, &RunnerConfig::default()).await.0
}

/// State sequence of the named task.
pub fn states(report: &WorkflowReport, task: &str) -> Vec<TaskState> {
    report
        .task(task)
        .unwrap_or_else(|| panic!("no task named '{}' in report", task))
        .states()
}

/// `(task, from, to)` for every state change, in emission order.
pub fn state_changes(events: &[Event]) -> Vec<(String, TaskState, TaskState)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::StateChanged { task, from, to, .. } => {
                Some((task.to_string(), *from, *to))
            }
            _ => None,
        })
        .collect()
}
