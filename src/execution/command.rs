//! Command dispatch.
//!
//! A [`Dispatcher`] runs one command string and reports its captured output.
//! [`ShellDispatcher`] is the process-backed implementation: the command is
//! handed to the host interpreter as a single argument (`bash -c <cmd>`,
//! `cmd /C <cmd>` on Windows, `python -c <cmd>`) and never tokenized.
//!
//! # Streaming
//!
//! When an [`OutputSink`] is attached, every stdout line is forwarded to it
//! as soon as it is read. The full buffered stdout is still returned in
//! [`CommandOutput`].
//!
//! # Timeouts
//!
//! A [`CommandRequest`] may carry a timeout. On expiry the child process is
//! killed and [`CommandError::Timeout`] is returned, which callers treat like
//! any other command failure.

use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::core::task::{CommandError, Operator};

#[cfg(windows)]
const DEFAULT_SHELL: &str = "cmd";
#[cfg(not(windows))]
const DEFAULT_SHELL: &str = "bash";

const DEFAULT_PYTHON: &str = "python";

/// How a command string is handed to an interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecStyle {
    /// Default shell invocation.
    Shell,
    /// Explicit shell invocation (`cli`). Runs exactly like [`ExecStyle::Shell`].
    ExplicitShell,
    /// Python program, inline or a `.py` script path.
    Interpreted,
}

impl From<Operator> for ExecStyle {
    fn from(operator: Operator) -> Self {
        match operator {
            Operator::Shell | Operator::FanOut => ExecStyle::Shell,
            Operator::ExplicitShell => ExecStyle::ExplicitShell,
            Operator::Interpreted => ExecStyle::Interpreted,
        }
    }
}

/// One command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub style: ExecStyle,
    pub timeout: Option<Duration>,
    /// Prefix used when streaming output (usually the task name).
    pub label: String,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, style: ExecStyle) -> Self {
        Self {
            command: command.into(),
            style,
            timeout: None,
            label: String::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Output of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Receives command stdout line by line while the command runs.
pub trait OutputSink: Send + Sync {
    fn line(&self, label: &str, line: &str);
}

/// Runs command strings.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Run a command to completion.
    ///
    /// Launch failures, non-zero exits and timeouts are all errors.
    async fn dispatch(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError>;
}

/// Program and arguments for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

/// Dispatcher that runs commands as child processes.
#[derive(Clone)]
pub struct ShellDispatcher {
    shell: String,
    python: String,
    sink: Option<Arc<dyn OutputSink>>,
}

impl ShellDispatcher {
    /// Create a dispatcher using the platform shell and `python`.
    pub fn new() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            python: DEFAULT_PYTHON.to_string(),
            sink: None,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Forward stdout lines to `sink` as they arrive.
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    /// Work out the program and arguments for a request.
    pub fn invocation(&self, request: &CommandRequest) -> Invocation {
        match request.style {
            ExecStyle::Shell | ExecStyle::ExplicitShell => Invocation {
                program: self.shell.clone(),
                args: vec![shell_flag(&self.shell).to_string(), request.command.clone()],
            },
            ExecStyle::Interpreted => {
                let args = if is_script_path(&request.command) {
                    vec![request.command.trim().to_string()]
                } else {
                    vec!["-c".to_string(), request.command.clone()]
                };
                Invocation {
                    program: self.python.clone(),
                    args,
                }
            }
        }
    }
}

impl Default for ShellDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShellDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellDispatcher")
            .field("shell", &self.shell)
            .field("python", &self.python)
            .field("streaming", &self.sink.is_some())
            .finish()
    }
}

#[async_trait]
impl Dispatcher for ShellDispatcher {
    async fn dispatch(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        let invocation = self.invocation(request);
        debug!(
            program = %invocation.program,
            command = %request.command,
            "dispatching command"
        );

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| CommandError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let sink = self.sink.as_deref();
        let collected = match request.timeout {
            Some(limit) => {
                let result = timeout(limit, collect(&mut child, &request.label, sink)).await;
                match result {
                    Ok(collected) => collected,
                    Err(_) => {
                        if let Err(err) = child.kill().await {
                            warn!(error = %err, "failed to kill timed out command");
                        }
                        return Err(CommandError::Timeout(limit));
                    }
                }
            }
            None => collect(&mut child, &request.label, sink).await,
        };

        let (stdout, stderr, status) = collected.map_err(CommandError::Io)?;

        if status.success() {
            Ok(CommandOutput {
                stdout,
                stderr,
                exit_code: status.code().unwrap_or(0),
            })
        } else {
            match status.code() {
                Some(code) => Err(CommandError::Exited { code, stderr }),
                None => Err(CommandError::Terminated { stderr }),
            }
        }
    }
}

/// Read both pipes to the end and wait for the child to exit.
async fn collect(
    child: &mut Child,
    label: &str,
    sink: Option<&dyn OutputSink>,
) -> std::io::Result<(String, String, ExitStatus)> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout, stderr, status) = tokio::try_join!(
        read_lines(stdout, label, sink),
        read_all(stderr),
        child.wait()
    )?;
    Ok((stdout, stderr, status))
}

async fn read_lines<R>(
    pipe: Option<R>,
    label: &str,
    sink: Option<&dyn OutputSink>,
) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };

    let mut reader = BufReader::new(pipe);
    let mut buffer = String::new();
    let mut raw = Vec::new();
    loop {
        raw.clear();
        if reader.read_until(b'\n', &mut raw).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&raw);
        if let Some(sink) = sink {
            sink.line(label, line.trim_end_matches(['\n', '\r']));
        }
        buffer.push_str(&line);
    }
    Ok(buffer)
}

async fn read_all<R>(pipe: Option<R>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut raw = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut raw).await?;
    }
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn shell_flag(shell: &str) -> &'static str {
    let program = shell
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(shell)
        .to_ascii_lowercase();
    if program == "cmd" || program == "cmd.exe" {
        "/C"
    } else {
        "-c"
    }
}

fn is_script_path(command: &str) -> bool {
    command.trim_end().ends_with(".py")
}
