//! Bounded shell execution.
//!
//! Each call gets its own [`Execution`] that owns the child, the output sink,
//! the process-tree guard and the cancellation timers. Output is pumped from
//! stdout and stderr concurrently while timeout and abort race the process;
//! either one terminates the whole tree (SIGTERM, then SIGKILL after a grace
//! period). No result is returned while a member of the shell's process
//! group is still running.

mod abort;
mod output;
mod process;

pub use abort::AbortSignal;
pub use output::{CapturedOutput, OutputSink, render_tail};
pub use process::{
    ProcessTreeGuard, TreeSignal, TreeSnapshot, signal_process_group, signal_process_tree,
    wait_for_group_exit,
};

use crate::config::ToolSettings;
use crate::error::Error;
use crate::truncate::{TruncationLimits, TruncationResult};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt as _;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// How long to keep draining pipes after the shell exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for leftover group members to die after the shell exits.
const GROUP_EXIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll interval while waiting for recorded descendants to exit.
const STRAGGLER_POLL: Duration = Duration::from_millis(20);

const READ_CHUNK_BYTES: usize = 8192;

/// Lifecycle of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecState {
    Pending,
    Running,
    Completed,
    TimedOut,
    Aborted,
}

impl ExecState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Aborted)
    }
}

/// Live view of a running command's output.
#[derive(Debug, Clone)]
pub struct ShellUpdate {
    /// Tail-truncated output so far (no footer).
    pub output: String,
    pub truncation: TruncationResult,
    pub full_output_path: Option<PathBuf>,
}

pub type UpdateCallback = Arc<dyn Fn(&ShellUpdate) + Send + Sync>;

/// Per-call options.
#[derive(Clone, Default)]
pub struct ExecOptions {
    /// `None` uses the executor default; `Some(Duration::ZERO)` disables it.
    pub timeout: Option<Duration>,
    pub abort: Option<AbortSignal>,
    /// Overrides the executor's working directory.
    pub cwd: Option<PathBuf>,
    pub on_update: Option<UpdateCallback>,
}

impl std::fmt::Debug for ExecOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecOptions")
            .field("timeout", &self.timeout)
            .field("abort", &self.abort)
            .field("cwd", &self.cwd)
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}

/// Outcome of one command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShellResult {
    pub success: bool,
    /// Combined, truncated output with footers and any failure notice.
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    /// `-1` when the process was killed or never ran.
    pub exit_code: i32,
    pub state: ExecState,
    pub truncated: bool,
    pub total_lines: usize,
    pub output_lines: usize,
    pub total_bytes: usize,
    /// Overflow log; the caller owns (and must remove) it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation: Option<TruncationResult>,
}

impl ShellResult {
    /// A failure before anything ran.
    fn not_started(err: &Error) -> Self {
        Self {
            success: false,
            output: err.to_string(),
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            exit_code: -1,
            state: ExecState::Pending,
            truncated: false,
            total_lines: 0,
            output_lines: 0,
            total_bytes: 0,
            full_output_path: None,
            truncation: None,
        }
    }
}

/// Runs commands through the platform shell.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    cwd: PathBuf,
    shell_path: Option<String>,
    command_prefix: Option<String>,
    default_timeout: Option<Duration>,
    terminate_grace: Duration,
    limits: TruncationLimits,
    temp_dir: PathBuf,
}

impl ShellExecutor {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self::from_settings(cwd, &ToolSettings::default())
    }

    pub fn from_settings(cwd: impl Into<PathBuf>, settings: &ToolSettings) -> Self {
        Self {
            cwd: cwd.into(),
            shell_path: settings
                .shell_path
                .clone()
                .filter(|path| !path.trim().is_empty()),
            command_prefix: settings
                .shell_command_prefix
                .clone()
                .filter(|prefix| !prefix.trim().is_empty()),
            default_timeout: settings.bash_timeout(),
            terminate_grace: settings.terminate_grace(),
            limits: settings.limits(),
            temp_dir: settings.temp_dir(),
        }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub const fn limits(&self) -> TruncationLimits {
        self.limits
    }

    /// Run `command` to completion, timeout or abort. Never fails: every
    /// error is folded into the returned [`ShellResult`].
    pub async fn execute(&self, command: &str, options: ExecOptions) -> ShellResult {
        let cwd = options.cwd.clone().unwrap_or_else(|| self.cwd.clone());
        if !cwd.is_dir() {
            let err = Error::WorkingDirectoryMissing(cwd);
            tracing::warn!(error = %err, "Refusing to run command");
            return ShellResult::not_started(&err);
        }
        if options.abort.as_ref().is_some_and(AbortSignal::is_aborted) {
            return ShellResult::not_started(&Error::Aborted);
        }

        let timeout = match options.timeout {
            None => self.default_timeout,
            Some(timeout) if timeout.is_zero() => None,
            Some(timeout) => Some(timeout),
        };

        let child = match self.spawn(command, &cwd) {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(command, error = %err, "Failed to spawn shell");
                return ShellResult::not_started(&err);
            }
        };

        let execution = Execution {
            state: ExecState::Pending,
            guard: ProcessTreeGuard::new(child.id()),
            sink: OutputSink::new(self.limits, &self.temp_dir),
            timeout,
            terminate_grace: self.terminate_grace,
            abort: options.abort,
            on_update: options.on_update,
        };
        execution.run(child, command).await
    }

    /// Run with default options and return just the text, or `"Error: …"`.
    pub async fn run_simple(&self, command: &str) -> String {
        let result = self.execute(command, ExecOptions::default()).await;
        if result.success {
            result.output
        } else {
            format!("Error: {}", result.output)
        }
    }

    fn spawn(&self, command: &str, cwd: &Path) -> crate::error::Result<Child> {
        let script = self.command_prefix.as_deref().map_or_else(
            || command.to_string(),
            |prefix| format!("{prefix}\n{command}"),
        );

        let mut cmd = self.shell_command(&script);
        cmd.current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        cmd.spawn().map_err(|e| Error::spawn(e.to_string()))
    }

    #[cfg(unix)]
    fn shell_command(&self, script: &str) -> Command {
        let shell = self.shell_path.clone().unwrap_or_else(default_shell);
        // The trap keeps the shell alive until its background jobs finish,
        // so they stay inside the process group we wait on.
        let script = format!("trap 'code=$?; wait; exit $code' EXIT\n{script}");
        let mut cmd = Command::new(shell);
        cmd.arg("-c").arg(script);
        cmd
    }

    #[cfg(not(unix))]
    fn shell_command(&self, script: &str) -> Command {
        let mut cmd = Command::new(self.shell_path.as_deref().unwrap_or("cmd"));
        cmd.arg("/C").arg(script);
        cmd
    }
}

#[cfg(unix)]
fn default_shell() -> String {
    ["/bin/bash", "/usr/bin/bash", "/usr/local/bin/bash"]
        .into_iter()
        .find(|path| Path::new(path).exists())
        .unwrap_or("sh")
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cancel {
    Timeout(Duration),
    Abort,
}

/// State owned by a single running command.
struct Execution {
    state: ExecState,
    guard: ProcessTreeGuard,
    sink: OutputSink,
    timeout: Option<Duration>,
    terminate_grace: Duration,
    abort: Option<AbortSignal>,
    on_update: Option<UpdateCallback>,
}

impl Execution {
    fn transition(&mut self, next: ExecState) {
        tracing::debug!(pid = ?self.guard.pid(), from = ?self.state, to = ?next, "Execution state");
        self.state = next;
    }

    async fn run(mut self, mut child: Child, command: &str) -> ShellResult {
        let pid = child.id();
        self.transition(ExecState::Running);
        tracing::debug!(command, pid = ?pid, "Spawned shell");

        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(128);
        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump_stream(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump_stream(stderr, tx.clone())));
        }
        drop(tx);

        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);
        let timer = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timer);

        let abort = self.abort.clone();
        let aborted = async move {
            match abort {
                Some(signal) => signal.aborted().await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(aborted);

        let mut cancel: Option<Cancel> = None;
        let mut kill_at: Option<Instant> = None;
        let mut stragglers: Option<TreeSnapshot> = None;
        let mut streams_open = true;

        let status = loop {
            tokio::select! {
                chunk = rx.recv(), if streams_open => match chunk {
                    Some(chunk) => self.ingest(&chunk).await,
                    None => streams_open = false,
                },
                status = child.wait() => break status,
                () = &mut timer, if cancel.is_none() => {
                    let timeout = self.timeout.unwrap_or_default();
                    tracing::warn!(command, pid = ?pid, secs = timeout.as_secs(), "Command timed out; terminating process tree");
                    cancel = Some(Cancel::Timeout(timeout));
                    stragglers = pid.map(TreeSnapshot::capture);
                    self.guard.signal(TreeSignal::Terminate);
                    kill_at = Some(Instant::now() + self.terminate_grace);
                }
                () = &mut aborted, if cancel.is_none() => {
                    tracing::warn!(command, pid = ?pid, "Command aborted; terminating process tree");
                    cancel = Some(Cancel::Abort);
                    stragglers = pid.map(TreeSnapshot::capture);
                    self.guard.signal(TreeSignal::Terminate);
                    kill_at = Some(Instant::now() + self.terminate_grace);
                }
                () = tokio::time::sleep_until(kill_at.unwrap_or_else(Instant::now)), if kill_at.is_some() => {
                    tracing::warn!(pid = ?pid, "Process tree ignored SIGTERM; sending SIGKILL");
                    self.guard.signal(TreeSignal::Kill);
                    kill_at = None;
                }
            }
        };

        // Background jobs that outlived the shell still hold the group. The
        // shell is reaped, so its pid is only trusted as a group id now.
        if let Some(pgid) = pid {
            signal_process_group(pgid, TreeSignal::Kill);
            if !wait_for_group_exit(pgid, GROUP_EXIT_TIMEOUT).await {
                tracing::warn!(pgid, "Process group still present after shell exit");
            }
        }
        // Descendants that left the group were only sent SIGTERM if the shell
        // died before the grace period ran out.
        if let Some(snapshot) = stragglers.as_ref() {
            kill_stragglers(snapshot, kill_at).await;
        }
        self.guard.disarm();

        if streams_open {
            let drain_deadline = Instant::now() + DRAIN_TIMEOUT;
            loop {
                match tokio::time::timeout_at(drain_deadline, rx.recv()).await {
                    Ok(Some(chunk)) => self.ingest(&chunk).await,
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!(pid = ?pid, "Output drain deadline hit; discarding remainder");
                        break;
                    }
                }
            }
        }
        for pump in pumps {
            pump.abort();
        }

        let state = match cancel {
            Some(Cancel::Timeout(_)) => ExecState::TimedOut,
            Some(Cancel::Abort) => ExecState::Aborted,
            None => ExecState::Completed,
        };
        self.transition(state);
        self.finish(status, cancel).await
    }

    async fn ingest(&mut self, chunk: &[u8]) {
        self.sink.push(chunk).await;
        if let Some(callback) = self.on_update.as_ref() {
            let truncation = self.sink.snapshot();
            callback(&ShellUpdate {
                output: output::strip_final_newline(&truncation.content).to_string(),
                truncation,
                full_output_path: self.sink.full_output_path().map(Path::to_path_buf),
            });
        }
    }

    async fn finish(
        self,
        status: std::io::Result<ExitStatus>,
        cancel: Option<Cancel>,
    ) -> ShellResult {
        let state = self.state;
        let captured = self.sink.finish().await;
        let truncation = captured.truncation;
        let mut output = render_tail(&truncation, captured.full_output_path.as_deref());

        let code = match status {
            Ok(status) => status.code(),
            Err(err) => {
                tracing::warn!(error = %err, "Failed to wait for shell");
                None
            }
        };

        let failure = match cancel {
            Some(Cancel::Timeout(timeout)) => Some(Error::Timeout {
                secs: timeout.as_secs(),
            }),
            Some(Cancel::Abort) => Some(Error::Aborted),
            None => None,
        };

        let (exit_code, error, error_kind) = if let Some(err) = failure {
            let _ = write!(output, "\n\n{err}");
            // A killed tree has no meaningful exit status of its own.
            let exit_code = if err.is_cancellation() { -1 } else { code.unwrap_or(-1) };
            (exit_code, Some(err.to_string()), Some(err.kind()))
        } else {
            let exit_code = code.unwrap_or(-1);
            if exit_code == 0 {
                (0, None, None)
            } else {
                let message = format!("Command exited with code {exit_code}");
                let _ = write!(output, "\n\n{message}");
                (exit_code, Some(message), None)
            }
        };
        tracing::debug!(exit_code, state = ?state, bytes = truncation.total_bytes, "Command finished");

        ShellResult {
            success: error.is_none(),
            output,
            error,
            error_kind,
            exit_code,
            state,
            truncated: truncation.truncated,
            total_lines: truncation.total_lines,
            output_lines: truncation.output_lines,
            total_bytes: truncation.total_bytes,
            full_output_path: captured.full_output_path,
            truncation: truncation.truncated.then_some(truncation),
        }
    }
}

/// Wait until `kill_at` for recorded tree members to exit, then SIGKILL the
/// rest and wait for them to go.
async fn kill_stragglers(snapshot: &TreeSnapshot, kill_at: Option<Instant>) {
    if snapshot.is_empty() {
        return;
    }
    tracing::debug!(members = snapshot.len(), "Waiting for recorded process tree");
    let deadline = kill_at.unwrap_or_else(Instant::now);
    while Instant::now() < deadline {
        if !snapshot.any_alive() {
            return;
        }
        tokio::time::sleep(STRAGGLER_POLL).await;
    }

    let killed = snapshot.signal(TreeSignal::Kill);
    if killed == 0 {
        return;
    }
    tracing::warn!(killed, "Descendants outlived the shell; sent SIGKILL");
    let gone_by = Instant::now() + GROUP_EXIT_TIMEOUT;
    while snapshot.any_alive() && Instant::now() < gone_by {
        tokio::time::sleep(STRAGGLER_POLL).await;
    }
}

async fn pump_stream<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
        }
    }
}
