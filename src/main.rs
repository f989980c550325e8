//! ergo - a declarative task runner.
//!
//! Usage:
//!   ergo --run <FILE>              Run a workflow file
//!   ergo --run <FILE> --validate   Parse and print the workflow without running it

use clap::Parser;
use colored::Colorize;
use ergo::{
    ConsoleReporter, EventBus, RunnerConfig, ShellDispatcher, Workflow, WorkflowRunner,
    YamlLoader, render_table,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// ergo - run the tasks of a workflow file in order
#[derive(Parser)]
#[command(name = "ergo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Workflow file to run
    #[arg(long, value_name = "FILE")]
    run: PathBuf,

    /// Runner configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum map items in flight at once (default: 1)
    #[arg(short = 'j', long, value_name = "N")]
    max_parallel: Option<usize>,

    /// Timeout in seconds for commands of tasks that declare none
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Fail a map task when any of its items fails
    #[arg(long)]
    strict_map: bool,

    /// Do not show the progress spinner
    #[arg(long)]
    no_spinner: bool,

    /// Print the final report as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Parse and print the workflow, then exit without running it
    #[arg(long)]
    validate: bool,
}

impl Cli {
    /// Runner configuration from the config file, with flags applied on top.
    fn runner_config(&self) -> Result<RunnerConfig, ergo::ConfigError> {
        let mut config = match &self.config {
            Some(path) => YamlLoader::load_runner_config(path)?,
            None => RunnerConfig::default(),
        };

        if let Some(max_parallel) = self.max_parallel {
            config.max_parallel = max_parallel;
        }
        if let Some(secs) = self.timeout {
            config.default_timeout_secs = Some(secs);
        }
        if self.strict_map {
            config.map_failure_policy = ergo::FanOutPolicy::Strict;
        }
        if self.json {
            config.stream_output = false;
        }

        YamlLoader::validate_runner_config(&config)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Logs go to stderr and stay quiet unless RUST_LOG asks for more
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = cli.runner_config()?;
    debug!(?config, "runner configuration");

    let workflow = YamlLoader::load_workflow(&cli.run)?;
    info!(
        "Loaded {} task(s) from {}",
        workflow.len(),
        cli.run.display()
    );

    if cli.validate {
        print_workflow(&workflow);
        return Ok(ExitCode::SUCCESS);
    }

    let bus = Arc::new(EventBus::new());
    let mut dispatcher = ShellDispatcher::new();
    if let Some(shell) = &config.shell {
        dispatcher = dispatcher.with_shell(shell);
    }
    if let Some(python) = &config.python {
        dispatcher = dispatcher.with_python(python);
    }

    if !cli.json {
        let mut reporter = ConsoleReporter::new();
        if cli.no_spinner {
            reporter = reporter.without_spinner();
        }
        let reporter = Arc::new(reporter);
        bus.register(reporter.clone()).await;
        if config.stream_output {
            dispatcher = dispatcher.with_sink(reporter);
        }
    }

    let runner = WorkflowRunner::with_config(Arc::new(dispatcher), bus, &config);
    let report = runner.run(&workflow).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_table(&report));
    }

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Print the parsed workflow.
fn print_workflow(workflow: &Workflow) {
    println!("{} ({} task(s))", "Parsed workflow".cyan(), workflow.len());
    println!();

    for task in workflow.tasks() {
        println!("{} [{}]", task.name(), task.operator());
        println!("  command: {}", task.command());
        if !task.input().is_empty() {
            println!("  input: {}", task.input().join(", "));
        }
        if let Some(fallback) = task.catch() {
            println!("  catch: {}", fallback.command);
        }
        if let Some(fold) = task.reduce() {
            println!("  reduce: {}", fold.command);
        }
        if let Some(timeout) = task.timeout() {
            println!("  timeout: {}s", timeout.as_secs());
        }

        let metadata = task.metadata();
        if let Some(depends_on) = &metadata.depends_on {
            println!("  {}", format!("depends_on: {} (not enforced)", depends_on).dimmed());
        }
        if let Some(container) = &metadata.container {
            println!("  {}", format!("container: {} (not used)", container).dimmed());
        }
        println!();
    }
}
