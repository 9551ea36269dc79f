//! Agent process host.
//!
//! Spawns the agent subprocess the client talks to:
//! - `kill_on_drop(true)` so the agent never outlives its host.
//! - `env_clear()` + a safe variable allowlist so host secrets never reach
//!   the agent's environment.
//! - stdin/stdout piped for the NDJSON stream; stderr inherited, because the
//!   agent's stderr carries diagnostics only and is never parsed.
//!
//! Shutdown is graceful: the host closes the agent's stdin (by tearing the
//! connection down), waits up to the configured grace period, then kills.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables inherited by the spawned agent process.
///
/// Every other variable is stripped via `env_clear()` before launch.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

// ── Configuration ────────────────────────────────────────────────────────────

/// How to launch an agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Agent binary.
    pub command: String,
    /// Arguments passed to the agent.
    pub args: Vec<String>,
    /// Working directory of the agent; inherits the host's when `None`.
    pub workspace_root: Option<PathBuf>,
    /// Time the agent gets to exit after its stdin closes.
    pub shutdown_grace: Duration,
}

impl From<&AgentConfig> for SpawnConfig {
    fn from(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            workspace_root: config.workspace_root.clone(),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_seconds),
        }
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

/// A running agent process with its stdio pipes.
///
/// Hand `stdout` (source) and `stdin` (sink) to the client connection and
/// keep `child` alive, typically inside [`monitor_exit`].
#[derive(Debug)]
pub struct AgentProcess {
    /// Child handle; killed on drop.
    pub child: Child,
    /// Agent's stdin, the client's outbound stream.
    pub stdin: ChildStdin,
    /// Agent's stdout, the client's inbound stream.
    pub stdout: ChildStdout,
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Launch the agent described by `config`.
///
/// # Errors
///
/// - `AppError::Io` if the OS refuses to spawn the process.
/// - `AppError::Internal` if a stdio pipe cannot be captured.
pub fn spawn_agent(config: &SpawnConfig) -> Result<AgentProcess> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }

    if let Some(root) = &config.workspace_root {
        cmd.current_dir(root);
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Io(format!("failed to spawn agent {}: {err}", config.command)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Internal("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Internal("failed to capture agent stdout".into()))?;

    info!(command = config.command, pid = child.id(), "agent process spawned");
    Ok(AgentProcess {
        child,
        stdin,
        stdout,
    })
}

/// Wait up to `grace` for the agent to exit, then kill it.
///
/// Call after the agent's stdin has been closed. Returns the exit code when
/// the process reported one.
pub async fn shutdown(child: &mut Child, grace: Duration) -> Option<i32> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(err)) => {
            warn!(%err, "error waiting for agent process");
            None
        }
        Err(_elapsed) => {
            warn!(?grace, "agent did not exit within grace period, killing");
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to kill agent process");
            }
            None
        }
    }
}

// ── Exit monitor ─────────────────────────────────────────────────────────────

/// Own `child` until it exits or `cancel` fires.
///
/// On exit the code is logged. On cancellation the agent is shut down with
/// [`shutdown`] and `grace`. The task yields the exit code, if any.
#[must_use]
pub fn monitor_exit(
    mut child: Child,
    grace: Duration,
    cancel: CancellationToken,
) -> JoinHandle<Option<i32>> {
    tokio::spawn(async move {
        let exited = tokio::select! {
            result = child.wait() => Some(result),
            () = cancel.cancelled() => None,
        };

        match exited {
            Some(Ok(status)) => {
                let code = status.code();
                match code {
                    Some(c) => info!(exit_code = c, "agent process exited"),
                    None => warn!("agent process terminated by signal"),
                }
                code
            }
            Some(Err(err)) => {
                warn!(%err, "error waiting for agent process");
                None
            }
            None => {
                info!("monitor_exit: shutting agent down");
                shutdown(&mut child, grace).await
            }
        }
    })
}
