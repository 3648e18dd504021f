//! Server process lifecycle.

use crate::config::ServerConfig;
use crate::error::{McpError, McpResult};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The protocol streams of a freshly spawned server.
pub struct ProcessStreams {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Owns a spawned server process.
///
/// stderr is drained into the log by a background task for as long as the
/// process keeps it open.
pub struct ServerProcess {
    name: String,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerProcess {
    /// Spawn the server described by `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: &ServerConfig) -> McpResult<(Self, ProcessStreams)> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        debug!(
            server = %config.name,
            command = %config.command,
            args = ?config.args,
            cwd = ?config.cwd,
            "Starting MCP server"
        );

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::spawn(config.display_command(), e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn(&config.command, "Failed to get stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn(&config.command, "Failed to get stdout"))?;
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(drain_stderr(config.name.clone(), stderr)));

        let pid = child.id();
        info!(server = %config.name, pid = ?pid, "MCP server started");

        let process = Self {
            name: config.name.clone(),
            pid,
            child: Mutex::new(Some(child)),
            stderr_task: Mutex::new(stderr_task),
        };

        Ok((process, ProcessStreams { stdin, stdout }))
    }

    /// OS process id, if the platform reported one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the process is still alive.
    pub async fn is_running(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Wait up to `grace` for the process to exit, then kill it.
    ///
    /// Callers close stdin first; that is how a stdio server is asked to
    /// shut down. Calling this again, or after the process already exited,
    /// returns `Ok(None)`.
    pub async fn stop(&self, grace: Duration) -> McpResult<Option<ExitStatus>> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(None);
        };

        let status = match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!(
                    server = %self.name,
                    pid = ?self.pid(),
                    grace_ms = grace.as_millis() as u64,
                    "MCP server did not exit in time, killing"
                );
                child.kill().await?;
                child.wait().await?
            }
        };

        // stderr closes with the process; let the drain finish its last lines.
        if let Some(task) = self.stderr_task.lock().await.take() {
            if tokio::time::timeout(Duration::from_millis(200), task)
                .await
                .is_err()
            {
                debug!(server = %self.name, "stderr drain still running after stop");
            }
        }

        info!(
            server = %self.name,
            pid = ?self.pid(),
            status = %status,
            "MCP server stopped"
        );
        Ok(Some(status))
    }
}

/// Forward each stderr line to the log.
async fn drain_stderr(server: String, stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                let text = text.trim_end();
                if !text.is_empty() {
                    info!(target: "toolwire_mcp::stderr", server = %server, "{text}");
                }
            }
            Err(e) => {
                warn!(server = %server, error = %e, "Error reading server stderr");
                break;
            }
        }
    }
}
