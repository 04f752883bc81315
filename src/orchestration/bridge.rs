//! Agent process bridge.
//!
//! [`AgentBridge::execute`] spawns one agent CLI process, streams its stdout
//! through the tool's [`StreamParser`] and races the completion event against
//! a deadline and a cancellation token:
//!
//! ```text
//! Connecting ──> Streaming ──> Completing ──> Terminated
//!     │              │
//!     ├──────────────┴──> TimedOut ───> Terminated
//!     └──────────────┴──> Cancelled ──> Terminated
//! ```
//!
//! Every running process is held in a registry so [`AgentBridge::kill_all`]
//! can stop all of them at once. Entries are removed on every exit path.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{LineFramer, StreamEvent, StreamParser};
use super::tools::ToolKind;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::{llog, llog_debug, llog_error, llog_trace, llog_warn};

/// Time a process gets to exit after SIGTERM before it is force-killed.
pub const TERMINATION_GRACE: Duration = Duration::from_millis(500);

/// How long to wait for stderr to drain once the process is gone.
const STDERR_DRAIN: Duration = Duration::from_millis(200);

const READ_BUF_SIZE: usize = 8 * 1024;

/// Lifecycle of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Connecting,
    Streaming,
    Completing,
    Terminated,
    TimedOut,
    Cancelled,
}

impl ExecutionState {
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Connecting, Streaming)
                | (Connecting | Streaming, Completing)
                | (Connecting | Streaming, TimedOut)
                | (Connecting | Streaming, Cancelled)
                | (Completing | TimedOut | Cancelled, Terminated)
        )
    }

    /// Move to `next`, or `Error::InvalidStateTransition`.
    pub fn transition(self, next: ExecutionState) -> Result<ExecutionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ExecutionState::Connecting => "connecting",
            ExecutionState::Streaming => "streaming",
            ExecutionState::Completing => "completing",
            ExecutionState::Terminated => "terminated",
            ExecutionState::TimedOut => "timed_out",
            ExecutionState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Overrides the tool's configured timeout.
    pub timeout: Option<Duration>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Receives every decoded event as it arrives.
    pub events: Option<UnboundedSender<StreamEvent>>,
    /// Cancelling this token (or any parent) stops the execution. A token
    /// already cancelled before spawn fails the execution without starting
    /// the process.
    pub cancel: Option<CancellationToken>,
}

impl ExecuteOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<StreamEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Outcome of one agent execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub text: String,
    pub tool_calls: Vec<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl ExecutionResult {
    fn failure(error: String, started: Instant) -> Self {
        Self {
            success: false,
            text: String::new(),
            tool_calls: Vec::new(),
            error: Some(error),
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code: None,
            stderr: String::new(),
        }
    }

    pub fn timed_out(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.starts_with("timeout after"))
    }
}

#[derive(Debug)]
struct RegistryEntry {
    tool: ToolKind,
    pid: Option<u32>,
    cancel: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<String, RegistryEntry>>>;

/// Removes a registry entry when dropped.
struct Registration {
    registry: Registry,
    key: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.remove(&self.key);
        }
    }
}

/// Spawns and supervises agent CLI processes.
#[derive(Debug)]
pub struct AgentBridge {
    config: Config,
    registry: Registry,
    sequence: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Ending {
    Completed,
    Exited(Option<ExitStatus>),
    TimedOut,
    Cancelled,
}

impl AgentBridge {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Arc::new(Mutex::new(HashMap::new())),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of processes currently registered.
    pub fn active_count(&self) -> usize {
        self.registry.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Keys of the registered processes.
    pub fn active_keys(&self) -> Vec<String> {
        self.registry
            .lock()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Run `instruction` through `tool` and wait for the outcome.
    ///
    /// Never returns an error: spawn failures, timeouts and protocol problems
    /// all surface as a failed [`ExecutionResult`].
    pub async fn execute(
        &self,
        tool: ToolKind,
        instruction: &str,
        options: ExecuteOptions,
    ) -> ExecutionResult {
        let started = Instant::now();
        match self.run(tool, instruction, options, started).await {
            Ok(result) => result,
            Err(e) => {
                llog_error!("{} execution failed: {}", tool, e);
                ExecutionResult::failure(e.to_string(), started)
            }
        }
    }

    async fn run(
        &self,
        tool: ToolKind,
        instruction: &str,
        options: ExecuteOptions,
        started: Instant,
    ) -> Result<ExecutionResult> {
        let timeout = options
            .timeout
            .unwrap_or_else(|| tool.resolve_timeout(&self.config));
        let binary = tool.resolve_binary(&self.config);
        if options.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            llog_debug!("{} cancelled before spawn", tool);
            return Ok(ExecutionResult::failure("cancelled".to_string(), started));
        }

        let mut cmd = Command::new(&binary);
        cmd.args(tool.argv(instruction))
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| Error::ProcessSpawn {
            tool: binary.clone(),
            source,
        })?;

        let cancel = options
            .cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let registration = self.register(tool, child.id(), cancel.clone());
        llog!(
            "Started {} (pid {:?}, timeout {}ms)",
            tool,
            child.id(),
            timeout.as_millis()
        );

        let mut stdout = child.stdout.take().ok_or_else(|| Error::ProcessSpawn {
            tool: binary.clone(),
            source: std::io::Error::other("stdout was not piped"),
        })?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        let mut state = ExecutionState::Connecting;
        let mut parser = StreamParser::new(tool);
        let mut framer = LineFramer::new();
        let sink = options.events.as_ref();
        let mut buf = vec![0u8; READ_BUF_SIZE];

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        // Cancellation is checked first: kill_all cancels before it signals,
        // so the resulting EOF must not read as a normal exit.
        let ending = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ending::Cancelled,
                _ = &mut deadline => break Ending::TimedOut,
                read = stdout.read(&mut buf) => match read {
                    Ok(0) | Err(_) => {
                        if let Err(e) = read {
                            llog_warn!("{} stdout read failed: {}", tool, e);
                        }
                        if let Some(line) = framer.finish() {
                            handle_line(&mut parser, &line, sink);
                        }
                        break tokio::select! {
                            biased;
                            _ = cancel.cancelled() => Ending::Cancelled,
                            _ = &mut deadline => Ending::TimedOut,
                            status = child.wait() => Ending::Exited(status.ok()),
                        };
                    }
                    Ok(n) => {
                        if state == ExecutionState::Connecting {
                            state = state.transition(ExecutionState::Streaming)?;
                        }
                        for line in framer.push(&buf[..n]) {
                            handle_line(&mut parser, &line, sink);
                        }
                        if parser.is_completed() {
                            break Ending::Completed;
                        }
                    }
                },
            }
        };

        let (status, exited_on_own) = match ending {
            Ending::Completed => {
                state = state.transition(ExecutionState::Completing)?;
                match child.try_wait()? {
                    Some(status) => (Some(status), true),
                    None => (terminate(&mut child).await, false),
                }
            }
            Ending::Exited(status) => {
                state = state.transition(ExecutionState::Completing)?;
                (status, true)
            }
            Ending::TimedOut => {
                state = state.transition(ExecutionState::TimedOut)?;
                llog_warn!("{} timed out after {}ms, killing", tool, timeout.as_millis());
                (force_kill(&mut child).await, false)
            }
            Ending::Cancelled => {
                state = state.transition(ExecutionState::Cancelled)?;
                llog_debug!("{} cancelled, killing", tool);
                (force_kill(&mut child).await, false)
            }
        };
        state = state.transition(ExecutionState::Terminated)?;
        // The child is reaped; its pid may be reused from here on.
        drop(registration);

        let stderr = drain_stderr(stderr_task).await;
        let exit_code = status.and_then(|s| s.code());
        let outcome = parser.finish();

        let (success, error) = match ending {
            Ending::TimedOut => (
                false,
                Some(format!("timeout after {}ms", timeout.as_millis())),
            ),
            Ending::Cancelled => (false, Some("cancelled".to_string())),
            _ if !outcome.completed => {
                let mut message = match exit_code {
                    Some(code) => format!("process exited with code {} before completion", code),
                    None => "process terminated before completion".to_string(),
                };
                if let Some(last) = stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                    message.push_str(": ");
                    message.push_str(last.trim());
                }
                (false, Some(message))
            }
            _ => match exit_code {
                Some(code) if exited_on_own && code != 0 => (
                    false,
                    Some(
                        outcome
                            .error
                            .clone()
                            .unwrap_or_else(|| format!("process exited with code {}", code)),
                    ),
                ),
                _ => (outcome.success, outcome.error.clone()),
            },
        };

        let result = ExecutionResult {
            success,
            text: outcome.text,
            tool_calls: outcome.tool_calls,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code,
            stderr,
        };
        llog!(
            "{} finished in {}ms: state={} success={} exit={:?}",
            tool,
            result.duration_ms,
            state,
            result.success,
            result.exit_code
        );
        Ok(result)
    }

    fn register(&self, tool: ToolKind, pid: Option<u32>, cancel: CancellationToken) -> Registration {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let key = format!(
            "{}-{}-{}",
            tool.name(),
            chrono::Utc::now().timestamp_millis(),
            seq
        );
        if let Ok(mut registry) = self.registry.lock() {
            registry.insert(key.clone(), RegistryEntry { tool, pid, cancel });
        }
        Registration {
            registry: Arc::clone(&self.registry),
            key,
        }
    }

    /// Cancel every registered execution. Each one force-kills its own child.
    ///
    /// Returns how many entries were removed. Safe to call repeatedly and
    /// when processes have already exited.
    pub fn kill_all(&self) -> usize {
        let drained: Vec<(String, RegistryEntry)> = match self.registry.lock() {
            Ok(mut registry) => registry.drain().collect(),
            Err(_) => return 0,
        };
        for (key, entry) in &drained {
            llog_debug!("kill_all: stopping {} ({}, pid {:?})", key, entry.tool, entry.pid);
            entry.cancel.cancel();
        }
        if !drained.is_empty() {
            llog!("kill_all stopped {} processes", drained.len());
        }
        drained.len()
    }
}

impl Drop for AgentBridge {
    fn drop(&mut self) {
        self.kill_all();
    }
}

fn handle_line(parser: &mut StreamParser, line: &str, sink: Option<&UnboundedSender<StreamEvent>>) {
    match parser.process_line(line) {
        Ok(events) => {
            for event in events {
                llog_trace!("[{}] {:?}: {}", parser.tool(), event.kind, event.message);
                if let Some(tx) = sink {
                    let _ = tx.send(event);
                }
            }
        }
        Err(e) => llog_warn!("Dropping malformed line: {}", e),
    }
}

/// SIGTERM, then SIGKILL once [`TERMINATION_GRACE`] has passed.
async fn terminate(child: &mut Child) -> Option<ExitStatus> {
    send_sigterm(child);
    match tokio::time::timeout(TERMINATION_GRACE, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        _ => force_kill(child).await,
    }
}

async fn force_kill(child: &mut Child) -> Option<ExitStatus> {
    if let Err(e) = child.start_kill() {
        llog_debug!("start_kill: {}", e);
    }
    child.wait().await.ok()
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}

async fn drain_stderr(task: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match tokio::time::timeout(STDERR_DRAIN, &mut task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => {
            // A grandchild may still hold the pipe open.
            task.abort();
            String::new()
        }
    }
}
