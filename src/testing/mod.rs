//! Testing utilities for users of the ergo library.
//!
//! This module provides helpers for testing workflow execution without
//! spawning processes:
//!
//! - [`ScriptedDispatcher`]: A dispatcher with scripted per-command outcomes
//!   that records every request it receives
//! - [`RecordingHandler`]: An event handler that keeps every event

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::task::CommandError;
use crate::events::{Event, EventHandler};
use crate::execution::{CommandOutput, CommandRequest, Dispatcher};

#[derive(Debug, Clone, Default)]
struct Script {
    exit_code: Option<i32>,
    stdout: String,
    delay: Option<Duration>,
}

/// A dispatcher whose outcomes are scripted per command string.
///
/// Commands without a script succeed with empty output. Commands are matched
/// exactly, after placeholder substitution.
///
/// # Example
///
/// ```
/// use ergo::testing::ScriptedDispatcher;
/// use ergo::{CommandRequest, Dispatcher, ExecStyle};
///
/// # tokio_test_block(async {
/// let dispatcher = ScriptedDispatcher::new()
///     .fail("exit 1", 1)
///     .succeed_with("echo hi", "hi\n");
///
/// let ok = dispatcher
///     .dispatch(&CommandRequest::new("echo hi", ExecStyle::Shell))
///     .await
///     .unwrap();
/// assert_eq!(ok.stdout, "hi\n");
///
/// let err = dispatcher
///     .dispatch(&CommandRequest::new("exit 1", ExecStyle::Shell))
///     .await;
/// assert!(err.is_err());
/// assert_eq!(dispatcher.commands().await, vec!["echo hi", "exit 1"]);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread()
/// #         .enable_all()
/// #         .build()
/// #         .unwrap()
/// #         .block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ScriptedDispatcher {
    scripts: HashMap<String, Script>,
    requests: Mutex<Vec<CommandRequest>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedDispatcher {
    /// Create a dispatcher where every command succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `command` exit with `code`.
    pub fn fail(mut self, command: impl Into<String>, code: i32) -> Self {
        self.scripts.entry(command.into()).or_default().exit_code = Some(code);
        self
    }

    /// Make `command` succeed and print `stdout`.
    pub fn succeed_with(mut self, command: impl Into<String>, stdout: impl Into<String>) -> Self {
        let script = self.scripts.entry(command.into()).or_default();
        script.exit_code = None;
        script.stdout = stdout.into();
        self
    }

    /// Make `command` take `delay` before finishing.
    pub fn delay(mut self, command: impl Into<String>, delay: Duration) -> Self {
        self.scripts.entry(command.into()).or_default().delay = Some(delay);
        self
    }

    /// Every request received, in dispatch order.
    pub async fn requests(&self) -> Vec<CommandRequest> {
        self.requests.lock().await.clone()
    }

    /// Every command string received, in dispatch order.
    pub async fn commands(&self) -> Vec<String> {
        self.requests
            .lock()
            .await
            .iter()
            .map(|request| request.command.clone())
            .collect()
    }

    /// Number of dispatches so far.
    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Highest number of commands that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        self.requests.lock().await.push(request.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let script = self
            .scripts
            .get(&request.command)
            .cloned()
            .unwrap_or_default();
        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match script.exit_code {
            Some(code) => Err(CommandError::Exited {
                code,
                stderr: format!("scripted failure: {}", request.command),
            }),
            None => Ok(CommandOutput {
                stdout: script.stdout,
                stderr: String::new(),
                exit_code: 0,
            }),
        }
    }
}

/// Event handler that records every event it receives.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events received so far, in order.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.events.lock().await.clear();
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
