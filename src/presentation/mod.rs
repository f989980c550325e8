//! Console presentation.
//!
//! [`ConsoleReporter`] turns the event stream into colored progress lines and
//! keeps a spinner ticking while a task is in flight. It also implements
//! [`OutputSink`], so streamed command output is printed without tearing the
//! spinner. [`render_table`] formats the final per-task summary.

use async_trait::async_trait;
use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::core::state::TaskState;
use crate::events::{Event, EventHandler};
use crate::execution::{ItemOutcome, OutputSink, RunOutcome, TaskRecord, WorkflowReport};

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Event handler printing progress to the terminal.
pub struct ConsoleReporter {
    spinner_enabled: bool,
    spinner: Mutex<Option<ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            spinner_enabled: true,
            spinner: Mutex::new(None),
        }
    }

    /// Disable the spinner (for non-interactive output).
    pub fn without_spinner(mut self) -> Self {
        self.spinner_enabled = false;
        self
    }

    fn print(&self, line: String) {
        let spinner = self.spinner.lock().unwrap_or_else(PoisonError::into_inner);
        match spinner.as_ref() {
            Some(bar) => bar.suspend(|| println!("{}", line)),
            None => println!("{}", line),
        }
    }

    fn start_spinner(&self, task: &str) {
        if !self.spinner_enabled {
            return;
        }
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} {msg} {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(SPINNER_TICKS),
        );
        bar.set_message(task.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));

        let mut spinner = self.spinner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = spinner.replace(bar) {
            previous.finish_and_clear();
        }
    }

    fn stop_spinner(&self) {
        let mut spinner = self.spinner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = spinner.take() {
            bar.finish_and_clear();
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for ConsoleReporter {
    async fn handle(&self, event: &Event) {
        match event {
            Event::WorkflowStarted { task_count, .. } => {
                self.print(format!(
                    "{} running {} task(s)",
                    "▶".cyan(),
                    task_count
                ));
            }
            Event::StateChanged { task, from, to, .. } => {
                if *to == TaskState::Running {
                    self.print(format!(
                        "  {} {} {}",
                        "[⟳]".yellow(),
                        task,
                        "running...".dimmed()
                    ));
                    self.start_spinner(task.as_str());
                } else {
                    self.print(format!(
                        "  {} {} {} → {}",
                        "·".dimmed(),
                        task,
                        from.as_str().dimmed(),
                        paint_state(*to)
                    ));
                }
            }
            Event::CommandFailed {
                task,
                phase,
                error,
                stderr,
                ..
            } => {
                self.print(format!(
                    "      {} {} {}: {}",
                    "Error:".red(),
                    task,
                    phase,
                    error
                ));
                if let Some(stderr) = stderr {
                    for line in stderr.trim_end().lines() {
                        self.print(format!("      {}", line.dimmed()));
                    }
                }
            }
            Event::ItemCompleted {
                index,
                item,
                outcome,
                ..
            } => {
                let symbol = match outcome {
                    ItemOutcome::Succeeded => "✓".green(),
                    ItemOutcome::Recovered => "↺".yellow(),
                    ItemOutcome::Failed => "✗".red(),
                };
                self.print(format!(
                    "    {} {} {}",
                    symbol,
                    format!("[{}]", index).dimmed(),
                    item
                ));
            }
            Event::ReduceCompleted {
                command, success, ..
            } => {
                let symbol = if *success { "✓".green() } else { "✗".red() };
                self.print(format!("    {} reduce: {}", symbol, command.dimmed()));
            }
            Event::TaskFinished {
                task,
                outcome,
                duration,
                ..
            } => {
                self.stop_spinner();
                let (symbol, label) = match outcome {
                    RunOutcome::Succeeded => ("✓".green(), "succeeded".green()),
                    RunOutcome::Recovered => ("↺".yellow(), "recovered via fallback".yellow()),
                    RunOutcome::Failed { .. } => ("✗".red(), "failed".red()),
                };
                self.print(format!(
                    "  {} {} {} {}",
                    symbol,
                    task,
                    label,
                    format!("({:.1}s)", duration.as_secs_f32()).dimmed()
                ));
            }
            Event::WorkflowCompleted {
                success,
                halted_at,
                duration,
                ..
            } => {
                self.stop_spinner();
                let elapsed = format!("({:.1}s)", duration.as_secs_f32()).dimmed();
                match (success, halted_at) {
                    (true, _) => self.print(format!("\n{} Done! {}\n", "✓".green(), elapsed)),
                    (false, Some(task)) => self.print(format!(
                        "\n{} Halted: unrecovered failure in task '{}' {}\n",
                        "✗".red(),
                        task,
                        elapsed
                    )),
                    (false, None) => self.print(format!("\n{} Halted {}\n", "✗".red(), elapsed)),
                }
            }
            Event::CommandDispatched { .. } => {}
        }
    }
}

impl OutputSink for ConsoleReporter {
    fn line(&self, label: &str, line: &str) {
        self.print(format!("    {} {}", format!("{} │", label).dimmed(), line));
    }
}

fn paint_state(state: TaskState) -> ColoredString {
    paint_as_state(state, state.as_str())
}

fn paint_as_state(state: TaskState, text: &str) -> ColoredString {
    match state {
        TaskState::Ready => text.normal(),
        TaskState::Running => text.cyan(),
        TaskState::Succeeded => text.green(),
        TaskState::Failed => text.red(),
        TaskState::Recovering => text.yellow(),
    }
}

fn outcome_label(record: &TaskRecord) -> String {
    let mut label = match record.outcome {
        None => "not run".to_string(),
        Some(RunOutcome::Succeeded) => "succeeded".to_string(),
        Some(RunOutcome::Recovered) => "recovered".to_string(),
        Some(RunOutcome::Failed {
            recovery_attempted: false,
        }) => "failed".to_string(),
        Some(RunOutcome::Failed {
            recovery_attempted: true,
        }) => "failed (fallback also failed)".to_string(),
    };
    if let Some(summary) = &record.fan_out {
        label.push_str(&format!(
            ", {}/{} items",
            summary.total() - summary.excluded(),
            summary.total()
        ));
        if summary.reduce_failed() {
            label.push_str(", reduce failed");
        }
    }
    label
}

/// Format the final per-task summary as a table.
///
/// Every task of the workflow gets a row, including tasks that never ran.
pub fn render_table(report: &WorkflowReport) -> String {
    let headers = ["TASK", "OPERATOR", "STATE", "DURATION", "OUTCOME"];
    let rows: Vec<[String; 5]> = report
        .tasks
        .iter()
        .map(|record| {
            [
                record.name.to_string(),
                record.operator.to_string(),
                record.state.to_string(),
                format!("{:.2}s", record.duration.as_secs_f64()),
                outcome_label(record),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = headers
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = width))
        .collect();
    out.push_str(header.join("  ").trim_end());
    out.push('\n');

    for (row, record) in rows.iter().zip(&report.tasks) {
        let cells: Vec<String> = row
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(column, (cell, width))| {
                let padded = format!("{:<width$}", cell, width = width);
                // Pad before coloring so escape codes don't skew alignment.
                if column == 2 {
                    paint_as_state(record.state, &padded).to_string()
                } else {
                    padded
                }
            })
            .collect();
        out.push_str(cells.join("  ").trim_end());
        out.push('\n');
    }

    out.push('\n');
    match &report.halt {
        None => {
            let recovered = report.recovered();
            if recovered.is_empty() {
                out.push_str(&"Workflow completed successfully".green().to_string());
            } else {
                let names: Vec<&str> = recovered.iter().map(|name| name.as_str()).collect();
                out.push_str(
                    &format!(
                        "Workflow completed; recovered via fallback: {}",
                        names.join(", ")
                    )
                    .yellow()
                    .to_string(),
                );
            }
        }
        Some(halt) => {
            out.push_str(
                &format!(
                    "Workflow halted due to unrecovered failure in task '{}'",
                    halt.task
                )
                .red()
                .to_string(),
            );
            out.push('\n');
            out.push_str(&halt.error);
        }
    }
    out.push_str(&format!(
        " {}\n",
        format!("({:.2}s)", report.duration.as_secs_f64()).dimmed()
    ));
    out
}
