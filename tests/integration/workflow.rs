//! Complete workflow integration tests.
//!
//! Tests that verify the full pipeline from workflow file to execution with
//! real shell processes.

#![cfg(unix)]

use ergo::TaskState::*;
use ergo::{Event, Operator, RunnerConfig, YamlLoader};
use std::time::Duration;

use crate::common::{run_default, run_file, state_changes, states};

#[tokio::test]
async fn test_zero_exit_command_succeeds() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: hello
      command: echo hello
"#,
    )
    .await;

    assert!(report.is_success());
    assert_eq!(states(&report, "hello"), vec![Ready, Running, Succeeded]);
    assert!(report.task("hello").unwrap().duration >= Duration::ZERO);
}

#[tokio::test]
async fn test_tasks_run_in_document_order() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("order.log");
    let yaml = format!(
        r#"
workflow:
  tasks:
    - name: third-alphabetically
      command: echo c >> {log}
    - name: first-alphabetically
      command: echo a >> {log}
    - name: second-alphabetically
      command: echo b >> {log}
"#,
        log = log.display()
    );

    let report = run_default(&yaml).await;

    assert!(report.is_success());
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "c\na\nb\n");
}

#[tokio::test]
async fn test_failure_halts_and_later_tasks_stay_ready() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("should-not-exist");
    let yaml = format!(
        r#"
workflow:
  tasks:
    - name: ok
      command: "true"
    - name: broken
      command: exit 3
    - name: skipped
      command: touch {marker}
"#,
        marker = marker.display()
    );

    let report = run_default(&yaml).await;

    assert!(!report.is_success());
    assert_eq!(report.halted_at().unwrap(), "broken");
    assert_eq!(states(&report, "ok"), vec![Ready, Running, Succeeded]);
    assert_eq!(states(&report, "broken"), vec![Ready, Running, Failed]);

    let skipped = report.task("skipped").unwrap();
    assert_eq!(skipped.state, Ready);
    assert_eq!(skipped.duration, Duration::ZERO);
    assert!(skipped.outcome.is_none());
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_halt_message_names_exit_code() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: broken
      command: exit 7
"#,
    )
    .await;

    let halt = report.halt.as_ref().unwrap();
    assert!(halt.error.contains("task 'broken' failed"));
    assert!(halt.error.contains("code 7"));
}

#[tokio::test]
async fn test_unknown_operator_runs_as_shell() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: odd
      operator: docker
      command: echo still runs
"#,
    )
    .await;

    assert!(report.is_success());
    assert_eq!(report.task("odd").unwrap().operator, Operator::Shell);
}

#[tokio::test]
async fn test_cli_operator_runs_through_shell() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: piped
      operator: cli
      command: echo 'a b c' | wc -w | grep -q 3
"#,
    )
    .await;

    assert!(report.is_success());
}

#[tokio::test]
async fn test_missing_interpreter_is_a_command_failure() {
    let yaml = r#"
workflow:
  tasks:
    - name: py
      operator: python
      command: print('hi')
      catch:
        command: print('fallback')
"#;
    let config = RunnerConfig {
        python: Some("/nonexistent/ergo-python".to_string()),
        ..RunnerConfig::default()
    };

    let (report, _) = run_file(yaml, &config).await;

    // The fallback runs through the same missing interpreter.
    let halt = report.halt.as_ref().unwrap();
    assert!(halt.recovery_attempted);
    assert!(halt.error.contains("failed to launch"));
    assert_eq!(
        states(&report, "py"),
        vec![Ready, Running, Failed, Recovering, Failed]
    );
}

#[tokio::test]
async fn test_timeout_fails_the_command() {
    let yaml = r#"
workflow:
  tasks:
    - name: slow
      command: sleep 5
      timeout_secs: 1
"#;
    let started = std::time::Instant::now();
    let report = run_default(yaml).await;

    assert!(!report.is_success());
    assert!(report.halt.as_ref().unwrap().error.contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_events_report_every_transition_in_order() {
    let yaml = r#"
workflow:
  tasks:
    - name: a
      command: "true"
    - name: b
      command: "false"
      catch:
        command: "true"
"#;
    let (_, handler) = run_file(yaml, &RunnerConfig::default()).await;
    let events = handler.events().await;

    assert_eq!(
        state_changes(&events),
        vec![
            ("a".to_string(), Ready, Running),
            ("a".to_string(), Running, Succeeded),
            ("b".to_string(), Ready, Running),
            ("b".to_string(), Running, Failed),
            ("b".to_string(), Failed, Recovering),
            ("b".to_string(), Recovering, Succeeded),
        ]
    );
    assert!(matches!(events.first(), Some(Event::WorkflowStarted { .. })));
    assert!(matches!(
        events.last(),
        Some(Event::WorkflowCompleted { success: true, .. })
    ));
}

#[tokio::test]
async fn test_same_workflow_twice_is_identical() {
    let yaml = r#"
workflow:
  tasks:
    - name: first
      command: "true"
    - name: recovers
      command: "false"
      catch:
        command: "true"
    - name: each
      operator: map
      input: [a, b, c]
      command: test {item} != b
      reduce:
        command: test "{results}" = "a,c"
"#;

    let first = run_default(yaml).await;
    let second = run_default(yaml).await;

    assert_ne!(first.run_id, second.run_id);
    for (a, b) in first.tasks.iter().zip(&second.tasks) {
        assert_eq!(a.name, b.name);
        assert_eq!(a.states(), b.states());
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(
            a.fan_out.as_ref().map(|s| s.results()),
            b.fan_out.as_ref().map(|s| s.results())
        );
    }
    assert!(!first.task("each").unwrap().fan_out.as_ref().unwrap().reduce_failed());
}

#[tokio::test]
async fn test_loaded_workflow_keeps_inert_metadata() {
    let file = crate::common::workflow_file(
        r#"
workflow:
  tasks:
    - name: build
      command: "true"
      output: [dist/app]
      depends_on: fetch
      resources:
        cpu: 2
        mem: 1Gi
      container: rust:1.85
"#,
    );
    let workflow = YamlLoader::load_workflow(file.path()).unwrap();
    let metadata = workflow.tasks()[0].metadata();

    assert_eq!(metadata.output, vec!["dist/app"]);
    assert_eq!(metadata.depends_on.as_deref(), Some("fetch"));
    assert_eq!(metadata.container.as_deref(), Some("rust:1.85"));
}
