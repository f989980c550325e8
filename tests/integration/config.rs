//! Workflow and runner configuration loading from disk.

use ergo::{ConfigError, FanOutPolicy, Operator, YamlLoader};
use std::io::Write;
use std::time::Duration;

use crate::common::workflow_file;

#[test]
fn test_load_runner_config_from_file() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        "max_parallel: 4\ndefault_timeout_secs: 30\nmap_failure_policy: strict\nshell: sh"
    )
    .unwrap();

    let config = YamlLoader::load_runner_config(file.path()).unwrap();

    assert_eq!(config.max_parallel, 4);
    assert_eq!(config.default_timeout_secs, Some(30));
    assert_eq!(config.map_failure_policy, FanOutPolicy::Strict);
    assert_eq!(config.shell.as_deref(), Some("sh"));
    assert!(config.python.is_none());
    assert!(config.stream_output);
}

#[test]
fn test_runner_config_rejects_zero_parallelism() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(file, "max_parallel: 0").unwrap();

    match YamlLoader::load_runner_config(file.path()) {
        Err(ConfigError::InvalidConfig(msg)) => assert!(msg.contains("max_parallel")),
        other => panic!("Expected InvalidConfig, got {:?}", other),
    }
}

#[test]
fn test_missing_workflow_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");

    match YamlLoader::load_workflow(&path) {
        Err(ConfigError::FileReadError { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("Expected FileReadError, got {:?}", other),
    }
}

#[test]
fn test_malformed_workflow_file() {
    let file = workflow_file("workflow:\n  tasks: [unclosed\n");

    match YamlLoader::load_workflow(file.path()) {
        Err(err @ ConfigError::YamlFileError { .. }) => {
            assert!(err.to_string().contains(&file.path().display().to_string()));
        }
        other => panic!("Expected YamlFileError, got {:?}", other),
    }
}

#[test]
fn test_task_without_command_is_rejected() {
    let file = workflow_file(
        r#"
workflow:
  tasks:
    - name: ok
      command: "true"
    - name: empty
"#,
    );

    match YamlLoader::load_workflow(file.path()) {
        Err(ConfigError::MissingField(field)) => {
            assert!(field.contains("tasks[1].command"));
            assert!(field.contains("empty"));
        }
        other => panic!("Expected MissingField, got {:?}", other),
    }
}

#[test]
fn test_task_without_name_is_rejected() {
    let file = workflow_file(
        r#"
workflow:
  tasks:
    - command: echo anonymous
"#,
    );

    let err = YamlLoader::load_workflow(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::MissingField(ref field) if field == "tasks[0].name"));
}

#[test]
fn test_full_workflow_file() {
    let file = workflow_file(
        r#"
workflow:
  tasks:
    - name: fetch
      operator: cli
      command: curl -s https://example.com
      timeout_secs: 20
    - name: each
      operator: map
      input: [a, b]
      command: echo {item}
      catch:
        command: echo skip {item}
      reduce:
        command: echo {results}
    - name: report
      operator: python
      command: report.py
"#,
    );

    let workflow = YamlLoader::load_workflow(file.path()).unwrap();
    let tasks = workflow.tasks();

    assert_eq!(workflow.len(), 3);
    assert_eq!(tasks[0].operator(), Operator::ExplicitShell);
    assert_eq!(tasks[0].timeout(), Some(Duration::from_secs(20)));
    assert_eq!(tasks[1].operator(), Operator::FanOut);
    assert_eq!(tasks[1].input(), ["a", "b"]);
    assert_eq!(tasks[1].catch().unwrap().command, "echo skip {item}");
    assert_eq!(tasks[1].reduce().unwrap().command, "echo {results}");
    assert_eq!(tasks[2].operator(), Operator::Interpreted);
    assert!(tasks[2].catch().is_none());
}
