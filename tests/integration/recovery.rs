//! Fallback recovery integration tests.

#![cfg(unix)]

use ergo::TaskState::*;
use ergo::{CommandPhase, Event, RunOutcome, RunnerConfig};

use crate::common::{run_default, run_file, states};

#[tokio::test]
async fn test_catch_recovers_failed_task() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: flaky
      command: exit 2
      catch:
        command: echo recovered
    - name: after
      command: "true"
"#,
    )
    .await;

    assert!(report.is_success());
    assert_eq!(
        states(&report, "flaky"),
        vec![Ready, Running, Failed, Recovering, Succeeded]
    );
    assert_eq!(
        report.task("flaky").unwrap().outcome,
        Some(RunOutcome::Recovered)
    );
    assert_eq!(report.recovered(), vec!["flaky"]);
    assert_eq!(states(&report, "after"), vec![Ready, Running, Succeeded]);
}

#[tokio::test]
async fn test_failed_catch_halts_with_recovery_attempted() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: doomed
      command: exit 2
      catch:
        command: exit 5
    - name: after
      command: "true"
"#,
    )
    .await;

    assert!(!report.is_success());
    assert_eq!(
        states(&report, "doomed"),
        vec![Ready, Running, Failed, Recovering, Failed]
    );
    assert_eq!(
        report.task("doomed").unwrap().outcome,
        Some(RunOutcome::Failed {
            recovery_attempted: true
        })
    );

    let halt = report.halt.as_ref().unwrap();
    assert!(halt.recovery_attempted);
    assert!(halt.error.contains("fallback also failed"));
    assert!(halt.error.contains("code 5"));
    assert_eq!(report.task("after").unwrap().state, Ready);
}

#[tokio::test]
async fn test_failure_without_catch_never_recovers() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: plain
      command: exit 1
"#,
    )
    .await;

    let halt = report.halt.as_ref().unwrap();
    assert!(!halt.recovery_attempted);
    assert!(!halt.error.contains("fallback"));
    assert!(!states(&report, "plain").contains(&Recovering));
}

#[tokio::test]
async fn test_successful_task_never_runs_catch() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("catch-ran");
    let yaml = format!(
        r#"
workflow:
  tasks:
    - name: fine
      command: "true"
      catch:
        command: touch {marker}
"#,
        marker = marker.display()
    );

    let report = run_default(&yaml).await;

    assert!(report.is_success());
    assert_eq!(
        report.task("fine").unwrap().outcome,
        Some(RunOutcome::Succeeded)
    );
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_fallback_dispatch_follows_reported_failure() {
    let yaml = r#"
workflow:
  tasks:
    - name: flaky
      command: echo oops >&2; exit 3
      catch:
        command: "true"
"#;
    let (_, handler) = run_file(yaml, &RunnerConfig::default()).await;
    let events = handler.events().await;

    let phases: Vec<(&str, CommandPhase)> = events
        .iter()
        .filter_map(|event| match event {
            Event::CommandDispatched { phase, .. } => Some(("dispatched", *phase)),
            Event::CommandFailed { phase, .. } => Some(("failed", *phase)),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            ("dispatched", CommandPhase::Primary),
            ("failed", CommandPhase::Primary),
            ("dispatched", CommandPhase::Fallback),
        ]
    );

    let failure = events
        .iter()
        .find_map(|event| match event {
            Event::CommandFailed {
                stderr, exit_code, ..
            } => Some((stderr.clone(), *exit_code)),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure.0.as_deref().map(str::trim), Some("oops"));
    assert_eq!(failure.1, Some(3));
}

#[tokio::test]
async fn test_halt_records_position_of_failed_task() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: one
      command: "true"
    - name: two
      command: "false"
      catch:
        command: "true"
    - name: three
      command: "false"
"#,
    )
    .await;

    let halt = report.halt.as_ref().unwrap();
    assert_eq!(halt.task.as_str(), "three");
    assert_eq!(halt.index, 2);
    assert_eq!(report.recovered(), vec!["two"]);
}
