//! Subprocess job handler.
//!
//! Runs `data.command` through the platform shell with:
//! - optional working directory (`data.workdir`)
//! - per-job timeout (`data.timeout_secs`, else the handler default)
//! - captured, truncated output
//!
//! A non-zero exit is a job failure whose cause carries the output.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::HandlerError;
use crate::worker::{Job, JobHandler};

/// Maximum output size before truncation (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Default command timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// How long to keep collecting output after the shell exits. Background
/// children may hold the pipes open indefinitely.
const OUTPUT_GRACE: Duration = Duration::from_millis(250);

/// Handler that executes each job's command in a subprocess.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    /// Command timeout.
    timeout: Duration,
}

impl CommandHandler {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the default command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Spawn the shell, wait for its exit status, then collect what it wrote.
    async fn run_shell(
        &self,
        cmd: &str,
        workdir: Option<&str>,
        timeout: Duration,
    ) -> Result<(String, i32), HandlerError> {
        let mut command = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", cmd]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", cmd]);
            c
        };

        if let Some(dir) = workdir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            HandlerError::new("Failed to spawn command").with_cause(e.to_string())
        })?;

        let stdout = PipeCapture::spawn(child.stdout.take());
        let stderr = PipeCapture::spawn(child.stderr.take());

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(
                    HandlerError::new("Command execution failed").with_cause(e.to_string())
                );
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(HandlerError::new(format!(
                    "Command timed out after {timeout:?}"
                )));
            }
        };

        let deadline = Instant::now() + OUTPUT_GRACE;
        let (stdout, stderr) = tokio::join!(stdout.collect(deadline), stderr.collect(deadline));

        let output = match (stdout.is_empty(), stderr.is_empty()) {
            (_, true) => stdout,
            (true, false) => stderr,
            (false, false) => format!("{stdout}\n\n--- stderr ---\n{stderr}"),
        };

        Ok((truncate_output(&output), status.code().unwrap_or(-1)))
    }
}

impl Default for CommandHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobHandler for CommandHandler {
    async fn handle(&self, job: &Job) -> Result<serde_json::Value, HandlerError> {
        let cmd = job
            .data
            .get("command")
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| HandlerError::new("Job data has no `command` string"))?;

        let workdir = job.data.get("workdir").and_then(|v| v.as_str());

        let timeout = job
            .data
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(self.timeout);

        tracing::debug!(job_id = %job.id, command = %preview(cmd), "Running command");

        let start = std::time::Instant::now();
        let (output, exit_code) = self.run_shell(cmd, workdir, timeout).await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        if exit_code != 0 {
            return Err(
                HandlerError::new(format!("Command exited with status {exit_code}"))
                    .with_cause(output),
            );
        }

        Ok(serde_json::json!({
            "output": output,
            "exit_code": exit_code,
            "duration_ms": duration_ms,
        }))
    }
}

/// Drains one child pipe on its own task so the child never blocks on a
/// full pipe, forwarding chunks to whoever collects them.
struct PipeCapture {
    chunks: mpsc::UnboundedReceiver<Vec<u8>>,
    reader: Option<JoinHandle<()>>,
}

impl PipeCapture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, chunks) = mpsc::unbounded_channel();
        let reader = pipe.map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let mut forwarded = 0usize;
                loop {
                    match pipe.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            // Keep reading past the cap, but stop buffering.
                            if forwarded <= MAX_OUTPUT_SIZE {
                                forwarded += n;
                                let _ = tx.send(buf[..n].to_vec());
                            }
                        }
                    }
                }
            })
        });
        Self { chunks, reader }
    }

    /// Gather output until the pipe closes or `deadline` passes.
    async fn collect(mut self, deadline: Instant) -> String {
        let mut out = Vec::new();
        while let Ok(Some(chunk)) = tokio::time::timeout_at(deadline, self.chunks.recv()).await {
            out.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&out).into_owned()
    }
}

impl Drop for PipeCapture {
    fn drop(&mut self) {
        if let Some(reader) = &self.reader {
            reader.abort();
        }
    }
}

/// Truncate output to fit within limits (UTF-8 safe).
fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        return s.to_string();
    }
    let end = (0..=MAX_OUTPUT_SIZE)
        .rev()
        .find(|&i| s.is_char_boundary(i))
        .unwrap_or(0);
    format!("{}\n\n... [truncated {} bytes]", &s[..end], s.len() - end)
}

/// First 100 characters of a command, for log fields.
fn preview(cmd: &str) -> String {
    match cmd.char_indices().nth(100) {
        Some((cut, _)) => format!("{}...", &cmd[..cut]),
        None => cmd.to_string(),
    }
}
