//! Fan-out integration tests.
//!
//! `map` tasks run against real shell processes: per-item recovery, result
//! ordering under parallelism, reduce, and the strict policy.

#![cfg(unix)]

use ergo::TaskState::*;
use ergo::{Event, FanOutPolicy, ItemOutcome, RunOutcome, RunnerConfig};

use crate::common::{run_default, run_file, states};

#[tokio::test]
async fn test_failed_item_is_excluded_from_reduce() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: each
      operator: map
      input: [a, b, c]
      command: test {item} != b
      reduce:
        command: echo tally {results}
"#,
    )
    .await;

    assert!(report.is_success());
    let record = report.task("each").unwrap();
    assert_eq!(record.states(), vec![Ready, Running, Succeeded]);

    let summary = record.fan_out.as_ref().unwrap();
    assert_eq!(summary.results(), vec!["a", "c"]);
    assert_eq!(summary.items[1].outcome, ItemOutcome::Failed);
    assert!(summary.items[1].error.as_ref().unwrap().contains("code 1"));

    let reduce = summary.reduce.as_ref().unwrap();
    assert_eq!(reduce.command, "echo tally a,c");
    assert!(reduce.success);
    assert_eq!(reduce.stdout.trim(), "tally a,c");
}

#[tokio::test]
async fn test_catch_recovers_individual_items() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: each
      operator: map
      input: [a, b, c]
      command: test {item} = a
      catch:
        command: test {item} = b
      reduce:
        command: echo {results}
"#,
    )
    .await;

    assert!(report.is_success());
    let summary = report.task("each").unwrap().fan_out.as_ref().unwrap();
    let outcomes: Vec<ItemOutcome> = summary.items.iter().map(|item| item.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            ItemOutcome::Succeeded,
            ItemOutcome::Recovered,
            ItemOutcome::Failed
        ]
    );
    assert_eq!(summary.reduce.as_ref().unwrap().stdout.trim(), "a,b");
}

#[tokio::test]
async fn test_empty_input_still_runs_reduce() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: nothing
      operator: map
      input: []
      command: echo {item}
      reduce:
        command: test -z "{results}"
"#,
    )
    .await;

    assert!(report.is_success());
    let summary = report.task("nothing").unwrap().fan_out.as_ref().unwrap();
    assert_eq!(summary.total(), 0);
    assert_eq!(summary.reduce.as_ref().unwrap().command, "test -z \"\"");
    assert!(!summary.reduce_failed());
}

#[tokio::test]
async fn test_numeric_inputs_are_items() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: numbers
      operator: map
      input: [1, 2, 3]
      command: test {item} -gt 0
      reduce:
        command: echo {results}
"#,
    )
    .await;

    let summary = report.task("numbers").unwrap().fan_out.as_ref().unwrap();
    assert_eq!(summary.results(), vec!["1", "2", "3"]);
    assert_eq!(summary.reduce.as_ref().unwrap().stdout.trim(), "1,2,3");
}

#[tokio::test]
async fn test_parallel_items_keep_input_order() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("finished.log");
    let yaml = format!(
        r#"
workflow:
  tasks:
    - name: sleepy
      operator: map
      input: [5, 1, 3]
      command: sleep 0.{{item}} && echo {{item}} >> {log}
      reduce:
        command: echo {{results}}
"#,
        log = log.display()
    );
    let config = RunnerConfig {
        max_parallel: 3,
        ..RunnerConfig::default()
    };

    let (report, _) = run_file(&yaml, &config).await;

    assert!(report.is_success());
    // Completion order follows the sleeps, results follow the input.
    assert_eq!(std::fs::read_to_string(&log).unwrap(), "1\n3\n5\n");
    let summary = report.task("sleepy").unwrap().fan_out.as_ref().unwrap();
    assert_eq!(summary.results(), vec!["5", "1", "3"]);
    assert_eq!(summary.reduce.as_ref().unwrap().stdout.trim(), "5,1,3");
}

#[tokio::test]
async fn test_every_item_reports_completion() {
    let yaml = r#"
workflow:
  tasks:
    - name: each
      operator: map
      input: [x, y]
      command: test {item} = x
"#;
    let (_, handler) = run_file(yaml, &RunnerConfig::default()).await;

    let mut completed: Vec<(usize, String, ItemOutcome)> = handler
        .events()
        .await
        .into_iter()
        .filter_map(|event| match event {
            Event::ItemCompleted {
                index,
                item,
                outcome,
                ..
            } => Some((index, item, outcome)),
            _ => None,
        })
        .collect();
    completed.sort_by_key(|(index, _, _)| *index);

    assert_eq!(
        completed,
        vec![
            (0, "x".to_string(), ItemOutcome::Succeeded),
            (1, "y".to_string(), ItemOutcome::Failed),
        ]
    );
}

#[tokio::test]
async fn test_failed_reduce_is_reported_under_lenient_policy() {
    let report = run_default(
        r#"
workflow:
  tasks:
    - name: each
      operator: map
      input: [a]
      command: "true"
      reduce:
        command: exit 4
    - name: after
      command: "true"
"#,
    )
    .await;

    assert!(report.is_success());
    let summary = report.task("each").unwrap().fan_out.as_ref().unwrap();
    assert!(summary.reduce_failed());
    assert!(summary.reduce.as_ref().unwrap().error.as_ref().unwrap().contains("code 4"));
    assert_eq!(states(&report, "after"), vec![Ready, Running, Succeeded]);
}

#[tokio::test]
async fn test_strict_policy_halts_on_excluded_item() {
    let yaml = r#"
workflow:
  tasks:
    - name: each
      operator: map
      input: [a, b, c]
      command: test {item} != b
    - name: after
      command: "true"
"#;
    let config = RunnerConfig {
        map_failure_policy: FanOutPolicy::Strict,
        ..RunnerConfig::default()
    };

    let (report, _) = run_file(yaml, &config).await;

    assert!(!report.is_success());
    let halt = report.halt.as_ref().unwrap();
    assert_eq!(halt.task.as_str(), "each");
    assert!(halt.error.contains("1 of 3 map item(s) failed"));

    let record = report.task("each").unwrap();
    assert_eq!(record.states(), vec![Ready, Running, Failed]);
    assert!(matches!(record.outcome, Some(RunOutcome::Failed { .. })));
    assert_eq!(record.fan_out.as_ref().unwrap().results(), vec!["a", "c"]);
    assert_eq!(report.task("after").unwrap().state, Ready);
}
