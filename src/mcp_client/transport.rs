//! Process transport: owns a tool server child process and its stdio.
//!
//! One implementation serves both descriptor kinds:
//! - `Script`: the command is spawned directly.
//! - `Container`: `<runtime> run -i --rm …` is spawned and the runtime's own
//!   stdio becomes the channel, so upper layers see an ordinary process.
//!
//! The transport moves opaque newline-terminated frames. Framing of JSON-RPC
//! messages lives in the codec.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::errors::McpError;
use super::types::{ServerDescriptor, TransportKind};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default bound on how long `receive()` waits for one frame.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period between closing stdin and force-killing the process.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for an exit status after stdout hits EOF.
const EXIT_STATUS_WAIT: Duration = Duration::from_millis(500);

/// Number of stderr lines retained for crash diagnostics.
const STDERR_TAIL_LINES: usize = 50;

// ─── Command Construction ────────────────────────────────────────────────────

/// Resolve the program and argument vector for a descriptor.
///
/// Environment values for containers are deliberately absent: they are set
/// on the runtime process and forwarded with `-e KEY`.
pub fn command_line(descriptor: &ServerDescriptor) -> (String, Vec<String>) {
    match &descriptor.kind {
        TransportKind::Script { command } => (command.clone(), descriptor.args.clone()),
        TransportKind::Container { runtime, image } => {
            let mut args = vec!["run".to_string(), "-i".to_string(), "--rm".to_string()];
            for mount in &descriptor.mounts {
                args.push("-v".to_string());
                args.push(mount.to_volume_arg());
            }
            for key in descriptor.env.keys() {
                args.push("-e".to_string());
                args.push(key.clone());
            }
            args.push(image.clone());
            args.extend(descriptor.args.iter().cloned());
            (runtime.clone(), args)
        }
    }
}

/// Build the `tokio` command with env, working directory and piped stdio.
fn build_command(descriptor: &ServerDescriptor) -> Command {
    let (program, args) = command_line(descriptor);

    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.envs(&descriptor.env);

    if let Some(dir) = &descriptor.cwd {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    cmd
}

// ─── ProcessTransport ────────────────────────────────────────────────────────

/// Exclusive handle on a running tool server process.
pub struct ProcessTransport {
    server_name: String,
    child: Child,
    /// `None` once the transport has been closed.
    writer: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    alive: bool,
    receive_timeout: Duration,
}

impl ProcessTransport {
    /// Spawn the server described by `descriptor`.
    pub async fn connect(descriptor: &ServerDescriptor) -> Result<Self, McpError> {
        let name = descriptor.name.as_str();
        let (program, args) = command_line(descriptor);

        tracing::info!(
            server = name,
            program = %program,
            args = ?args,
            container = descriptor.is_container(),
            "spawning tool server"
        );

        let mut child = build_command(descriptor)
            .spawn()
            .map_err(|e| McpError::SpawnFailed {
                name: name.to_string(),
                reason: spawn_failure_reason(descriptor, &program, &e),
            })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;

        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_drain(name.to_string(), stderr, Arc::clone(&stderr_tail));
        }

        Ok(Self {
            server_name: name.to_string(),
            child,
            writer: Some(stdin),
            reader: BufReader::new(stdout),
            stderr_tail,
            alive: true,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
        })
    }

    /// Name of the server this transport talks to.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Override the per-frame receive timeout.
    pub fn set_receive_timeout(&mut self, timeout: Duration) {
        self.receive_timeout = timeout;
    }

    /// Current per-frame receive timeout.
    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    /// Whether the process is still running and the pipes are usable.
    pub fn is_alive(&mut self) -> bool {
        if !self.alive || self.writer.is_none() {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) | Err(_) => {
                self.alive = false;
                false
            }
        }
    }

    /// Write one frame. A trailing newline is appended when missing.
    pub async fn send(&mut self, frame: &[u8]) -> Result<(), McpError> {
        if !self.alive {
            return Err(McpError::Disconnected {
                name: self.server_name.clone(),
            });
        }
        let writer = self.writer.as_mut().ok_or(McpError::Disconnected {
            name: self.server_name.clone(),
        })?;

        let mut result = writer.write_all(frame).await;
        if result.is_ok() && !frame.ends_with(b"\n") {
            result = writer.write_all(b"\n").await;
        }
        if result.is_ok() {
            result = writer.flush().await;
        }

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                Err(self.crashed(&format!("stdin closed: {e}")).await)
            }
            Err(e) => Err(McpError::TransportError {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            }),
        }
    }

    /// Read one frame (without its trailing newline), bounded by the
    /// configured receive timeout.
    pub async fn receive(&mut self) -> Result<Vec<u8>, McpError> {
        let timeout = self.receive_timeout;
        self.receive_within(timeout, "receive").await
    }

    /// Read one frame with an explicit bound. `operation` names what we were
    /// waiting for in the timeout error.
    pub async fn receive_within(
        &mut self,
        timeout: Duration,
        operation: &str,
    ) -> Result<Vec<u8>, McpError> {
        if !self.alive {
            return Err(McpError::Disconnected {
                name: self.server_name.clone(),
            });
        }

        let mut buf = Vec::new();
        let read = tokio::time::timeout(timeout, self.reader.read_until(b'\n', &mut buf)).await;

        match read {
            Err(_) => Err(McpError::Timeout {
                server: self.server_name.clone(),
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(self.crashed(&format!("failed to read from stdout: {e}")).await),
            Ok(Ok(0)) => Err(self.crashed("server stdout closed").await),
            Ok(Ok(_)) => {
                while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                    buf.pop();
                }
                Ok(buf)
            }
        }
    }

    /// Close stdin, wait a bounded grace period, then force-kill.
    pub async fn close(&mut self) {
        self.alive = false;
        // Dropping stdin delivers EOF, the polite stop signal for stdio servers.
        drop(self.writer.take());

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(server = %self.server_name, %status, "tool server exited");
            }
            _ => {
                tracing::warn!(
                    server = %self.server_name,
                    grace_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "tool server did not exit in time, killing"
                );
                let _ = self.child.kill().await;
            }
        }
    }

    /// Recent stderr output, oldest first.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }

    /// Mark the transport dead and build a crash error with whatever
    /// diagnostics are available.
    async fn crashed(&mut self, what: &str) -> McpError {
        self.alive = false;

        let status = match tokio::time::timeout(EXIT_STATUS_WAIT, self.child.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => None,
        };

        let reason = format!(
            "{what}{}{}",
            format_status_suffix(status),
            format_stderr_suffix(&self.stderr_tail())
        );
        tracing::error!(server = %self.server_name, reason = %reason, "tool server crashed");

        McpError::ServerCrashed {
            name: self.server_name.clone(),
            reason,
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Forward stderr lines to the log and keep the most recent ones.
fn spawn_stderr_drain(name: String, stderr: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %name, stderr = %line, "tool server stderr");
            if let Ok(mut tail) = tail.lock() {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    });
}

/// Spawn errors for containers usually mean the runtime is missing or down.
fn spawn_failure_reason(descriptor: &ServerDescriptor, program: &str, err: &std::io::Error) -> String {
    match &descriptor.kind {
        TransportKind::Container { runtime, image } => format!(
            "{err} (is '{runtime}' installed and running? check the image with '{runtime} images | grep {image}')"
        ),
        TransportKind::Script { .. } => format!("{program}: {err}"),
    }
}

fn format_status_suffix(status: Option<ExitStatus>) -> String {
    match status {
        Some(status) => format!(" ({status})"),
        None => String::new(),
    }
}

/// Format a stderr suffix for error messages (empty string if no stderr).
fn format_stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {}", stderr.trim())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
