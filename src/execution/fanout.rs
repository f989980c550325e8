//! Fan-out/fan-in execution for `map` tasks.
//!
//! The command template is applied to every input item (`{item}`), each item
//! independently recoverable through the task's `catch` command. Item
//! failures never stop the other items. Results keep input order whatever
//! the completion order, and the optional `reduce` command runs once with
//! `{results}` replaced by the comma-joined successful items.
//!
//! Items run on a pool bounded by a semaphore (`max_parallel`, default 1).
//! An item's fallback runs inside the same permit as its primary attempt.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info_span, warn};

use crate::core::state::TaskEvent;
use crate::core::task::{Fallback, Fold, ITEM_PLACEHOLDER, Task, TaskError};
use crate::core::types::TaskName;
use crate::events::{CommandPhase, Event, EventBus};

use super::command::{CommandRequest, Dispatcher, ExecStyle};
use super::executor::{RunOutcome, TaskRun, dispatch_reported};

/// What an excluded map item does to its task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanOutPolicy {
    /// Excluded items and a failed reduce are reported; the task succeeds.
    #[default]
    Lenient,
    /// Any excluded item or a failed reduce fails the task.
    Strict,
}

/// Final result of one map item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Succeeded,
    /// The item command failed and the fallback succeeded.
    Recovered,
    /// Excluded from the results.
    Failed,
}

impl ItemOutcome {
    /// True if the item counts towards `{results}`.
    pub fn is_included(&self) -> bool {
        !matches!(self, ItemOutcome::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemResult {
    /// Position in the task's `input`.
    pub index: usize,
    pub item: String,
    pub outcome: ItemOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of the reduce command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceResult {
    /// The command as dispatched, after substitution.
    pub command: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything a map task produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanOutSummary {
    /// One entry per input item, in input order.
    pub items: Vec<ItemResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce: Option<ReduceResult>,
}

impl FanOutSummary {
    /// Successful (including recovered) items, in input order.
    pub fn results(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter(|result| result.outcome.is_included())
            .map(|result| result.item.as_str())
            .collect()
    }

    /// Number of items left out of the results.
    pub fn excluded(&self) -> usize {
        self.items
            .iter()
            .filter(|result| !result.outcome.is_included())
            .count()
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn reduce_failed(&self) -> bool {
        self.reduce.as_ref().is_some_and(|reduce| !reduce.success)
    }
}

/// Runner for `map` tasks.
#[derive(Clone)]
pub struct FanOutRunner {
    dispatcher: Arc<dyn Dispatcher>,
    bus: Arc<EventBus>,
    max_parallel: usize,
    policy: FanOutPolicy,
    default_timeout: Option<Duration>,
}

impl FanOutRunner {
    /// Create a runner that processes one item at a time.
    pub fn new(dispatcher: Arc<dyn Dispatcher>, bus: Arc<EventBus>) -> Self {
        Self {
            dispatcher,
            bus,
            max_parallel: 1,
            policy: FanOutPolicy::default(),
            default_timeout: None,
        }
    }

    /// Set the maximum number of items in flight. Zero is treated as one.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_policy(mut self, policy: FanOutPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Timeout for commands of tasks that declare none.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn policy(&self) -> FanOutPolicy {
        self.policy
    }

    /// Run a map task to a terminal state.
    ///
    /// Under [`FanOutPolicy::Lenient`] the task succeeds whatever happened to
    /// its items. Under [`FanOutPolicy::Strict`] an excluded item or a failed
    /// reduce ends it with [`TaskError::FanOutIncomplete`]. Either way the
    /// per-item results are left on the run.
    pub async fn run(&self, run: &mut TaskRun<'_>) -> Result<RunOutcome, TaskError> {
        let task = run.task();
        let span = info_span!(
            "map_task",
            task = %task.name(),
            items = task.input().len(),
            max_parallel = self.max_parallel,
        );

        let started = Instant::now();
        let result = self.drive(run).instrument(span).await;
        run.finish(started, &result, &self.bus).await;
        result
    }

    async fn drive(&self, run: &mut TaskRun<'_>) -> Result<RunOutcome, TaskError> {
        let task = run.task();
        run.advance(TaskEvent::Start, &self.bus).await?;

        let items = match self.run_items(task).await {
            Ok(items) => items,
            Err(err) => {
                run.advance(TaskEvent::Fail, &self.bus).await?;
                return Err(err);
            }
        };

        let mut summary = FanOutSummary { items, reduce: None };
        if let Some(fold) = task.reduce() {
            let reduce = self.run_reduce(task, fold, &summary.results()).await;
            summary.reduce = Some(reduce);
        }

        let excluded = summary.excluded();
        let total = summary.total();
        let reduce_failed = summary.reduce_failed();
        debug!(
            task = %task.name(),
            excluded,
            total,
            reduce_failed,
            "fan-out complete"
        );
        run.set_fan_out(summary);

        if self.policy == FanOutPolicy::Strict && (excluded > 0 || reduce_failed) {
            run.advance(TaskEvent::Fail, &self.bus).await?;
            return Err(TaskError::FanOutIncomplete {
                task: task.name().clone(),
                excluded,
                total,
                reduce_failed,
            });
        }

        run.advance(TaskEvent::Succeed, &self.bus).await?;
        Ok(RunOutcome::Succeeded)
    }

    async fn run_items(&self, task: &Task) -> Result<Vec<ItemResult>, TaskError> {
        let job = Arc::new(ItemJob {
            task: task.name().clone(),
            template: task.command().to_string(),
            fallback: task.catch().cloned(),
            timeout: task.timeout().or(self.default_timeout),
            dispatcher: Arc::clone(&self.dispatcher),
            bus: Arc::clone(&self.bus),
        });
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut handles = Vec::with_capacity(task.input().len());

        for (index, item) in task.input().iter().enumerate() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .expect("fan-out semaphore closed");
            let job = Arc::clone(&job);
            let item = item.clone();
            let span = info_span!("map_item", task = %task.name(), index = index);

            handles.push(tokio::spawn(
                async move {
                    let result = job.run(index, item).await;
                    drop(permit);
                    result
                }
                .instrument(span),
            ));
        }

        let mut slots: Vec<Option<ItemResult>> = vec![None; handles.len()];
        let mut panicked = None;
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(result) => {
                    let slot = result.index;
                    slots[slot] = Some(result);
                }
                Err(err) => {
                    warn!(task = %task.name(), index, error = %err, "fan-out worker failed");
                    panicked.get_or_insert(TaskError::WorkerPanicked {
                        task: task.name().clone(),
                        index,
                        message: err.to_string(),
                    });
                }
            }
        }

        match panicked {
            Some(err) => Err(err),
            None => Ok(slots.into_iter().flatten().collect()),
        }
    }

    async fn run_reduce(&self, task: &Task, fold: &Fold, results: &[&str]) -> ReduceResult {
        let command = fold.with_results(results);
        let request = CommandRequest::new(command.clone(), ExecStyle::Shell)
            .with_timeout(task.timeout().or(self.default_timeout))
            .with_label(task.name().as_str());

        let result = dispatch_reported(
            self.dispatcher.as_ref(),
            &self.bus,
            task.name(),
            CommandPhase::Reduce,
            &request,
        )
        .await;

        if let Err(err) = &result {
            warn!(task = %task.name(), error = %err, "reduce command failed");
        }
        self.bus
            .emit(Event::reduce_completed(
                task.name().clone(),
                command.clone(),
                result.is_ok(),
            ))
            .await;

        match result {
            Ok(output) => ReduceResult {
                command,
                success: true,
                stdout: output.stdout,
                error: None,
            },
            Err(err) => ReduceResult {
                command,
                success: false,
                stdout: String::new(),
                error: Some(err.to_string()),
            },
        }
    }
}

/// Everything a worker needs to process one item of a map task.
struct ItemJob {
    task: TaskName,
    template: String,
    fallback: Option<Fallback>,
    timeout: Option<Duration>,
    dispatcher: Arc<dyn Dispatcher>,
    bus: Arc<EventBus>,
}

impl ItemJob {
    async fn run(&self, index: usize, item: String) -> ItemResult {
        let command = self.template.replace(ITEM_PLACEHOLDER, &item);
        let (outcome, error) = match self.dispatch(CommandPhase::MapItem, command, &item).await {
            Ok(()) => (ItemOutcome::Succeeded, None),
            Err(primary) => match &self.fallback {
                None => (ItemOutcome::Failed, Some(primary)),
                Some(fallback) => {
                    let command = fallback.for_item(&item);
                    match self.dispatch(CommandPhase::MapFallback, command, &item).await {
                        Ok(()) => (ItemOutcome::Recovered, None),
                        Err(err) => (ItemOutcome::Failed, Some(err)),
                    }
                }
            },
        };

        debug!(task = %self.task, index, item = %item, outcome = ?outcome, "item finished");
        self.bus
            .emit(Event::item_completed(
                self.task.clone(),
                index,
                item.clone(),
                outcome,
            ))
            .await;

        ItemResult {
            index,
            item,
            outcome,
            error,
        }
    }

    async fn dispatch(&self, phase: CommandPhase, command: String, item: &str) -> Result<(), String> {
        let request = CommandRequest::new(command, ExecStyle::Shell)
            .with_timeout(self.timeout)
            .with_label(format!("{}[{}]", self.task, item));
        dispatch_reported(self.dispatcher.as_ref(), &self.bus, &self.task, phase, &request)
            .await
            .map(|_| ())
            .map_err(|err| err.to_string())
    }
}
