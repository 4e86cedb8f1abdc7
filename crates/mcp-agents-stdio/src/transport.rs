//! Child-process transport over stdin/stdout.

use std::{
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use mcp_agents_core::{SessionError, Transport, TransportIo};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{ChildStderr, Command},
    task::JoinHandle,
};

use crate::command::{CommandParts, ServerCommand};

/// Transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long `close` waits for a voluntary exit before killing.
    pub close_grace: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            close_grace: Duration::from_secs(5),
        }
    }
}

/// Shared count of transports whose process has not been reaped yet.
#[derive(Debug, Clone, Default)]
pub struct LiveHandles(Arc<AtomicUsize>);

impl LiveHandles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live transports.
    #[must_use]
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A spawned MCP server process (and its process group).
pub struct ChildTransport {
    child: Option<AsyncGroupChild>,
    io: Option<TransportIo>,
    pid: Option<u32>,
    stderr_task: Option<JoinHandle<()>>,
    close_grace: Duration,
    handles: LiveHandles,
}

impl ChildTransport {
    /// Spawn the server described by `command`.
    ///
    /// # Errors
    /// `NotFound` if the command does not resolve, `SpawnFailure` if the OS
    /// refuses to start it or its pipes cannot be captured.
    pub async fn spawn(
        command: &ServerCommand,
        config: &TransportConfig,
        handles: &LiveHandles,
    ) -> Result<Self, SessionError> {
        let CommandParts { program, args } = command.resolve().await?;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(ref dir) = command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .group_spawn()
            .map_err(|e| SessionError::SpawnFailure(format!("{}: {e}", program.display())))?;
        let pid = child.id();

        let stdin = child.inner().stdin.take();
        let stdout = child.inner().stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            if let Err(e) = child.kill().await {
                tracing::warn!(?pid, "failed to kill server after pipe capture failure: {e}");
            }
            return Err(SessionError::SpawnFailure(
                "failed to capture server stdio".into(),
            ));
        };
        let stderr_task = child
            .inner()
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_stderr(stderr, pid)));

        handles.acquire();
        tracing::info!(?pid, program = %program.display(), ?args, "spawned MCP server");

        Ok(Self {
            child: Some(child),
            io: Some(TransportIo::new(stdout, stdin)),
            pid,
            stderr_task,
            close_grace: config.close_grace,
            handles: handles.clone(),
        })
    }

    /// OS process id of the server, while it is alive.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether `close` has not run yet.
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.child.is_some()
    }
}

#[async_trait]
impl Transport for ChildTransport {
    fn take_io(&mut self) -> Option<TransportIo> {
        self.io.take()
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.io = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let pid = self.pid;

        let result = match tokio::time::timeout(self.close_grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(?pid, %status, "MCP server exited");
                Ok(())
            }
            Ok(Err(e)) => Err(SessionError::Process(format!("wait failed: {e}"))),
            Err(_) => {
                tracing::warn!(?pid, grace = ?self.close_grace, "MCP server did not exit, killing");
                match child.kill().await {
                    Ok(()) => child
                        .wait()
                        .await
                        .map(|_| ())
                        .map_err(|e| SessionError::Process(format!("reap failed: {e}"))),
                    Err(e) => Err(SessionError::Process(format!("kill failed: {e}"))),
                }
            }
        };

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.handles.release();
        result
    }
}

impl Drop for ChildTransport {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            tracing::warn!(pid = ?self.pid, "transport dropped without close, killing server");
            let _ = child.start_kill();
            self.handles.release();
        }
    }
}

async fn forward_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "mcp_agents::child", ?pid, "{line}");
    }
}
