//! Terminal provider backing the `terminal/*` methods.
//!
//! Each terminal is a child process with piped output. Two pump tasks copy
//! stdout and stderr into a bounded buffer; a monitor task waits for exit
//! (or a kill request) and publishes the exit status on a `watch` channel
//! once the pumps have drained.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::messages::{CreateTerminalParams, TerminalOutputResult, WaitForExitResult};
use crate::providers::fs::map_io_error;
use crate::providers::path_safety::validate_absolute;
use crate::{AppError, Result};

/// Boxed future returned by [`Terminals`] methods.
pub type TerminalFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Command execution served to the agent by the client.
pub trait Terminals: Send + Sync {
    /// Start a command and return its terminal id.
    fn create(&self, params: CreateTerminalParams) -> TerminalFuture<'_, String>;

    /// Output captured so far and the exit state.
    fn output(&self, terminal_id: String) -> TerminalFuture<'_, TerminalOutputResult>;

    /// Wait for the command to exit.
    fn wait_for_exit(&self, terminal_id: String) -> TerminalFuture<'_, WaitForExitResult>;

    /// Kill the command; the terminal stays addressable until released.
    fn kill(&self, terminal_id: String) -> TerminalFuture<'_, ()>;

    /// Kill the command if running and forget the terminal.
    fn release(&self, terminal_id: String) -> TerminalFuture<'_, ()>;
}

/// How long pumps may keep draining after the process exits.
///
/// Bounded because a grandchild can inherit the pipes and keep them open.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

// ── Output buffer ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct OutputBuffer {
    data: String,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: String::new(),
            limit,
            truncated: false,
        }
    }

    /// Append `chunk`, dropping the oldest output beyond the limit.
    fn push(&mut self, chunk: &str) {
        self.data.push_str(chunk);
        if self.data.len() > self.limit {
            let mut cut = self.data.len() - self.limit;
            while !self.data.is_char_boundary(cut) {
                cut += 1;
            }
            self.data.drain(..cut);
            self.truncated = true;
        }
    }
}

type SharedOutput = Arc<Mutex<OutputBuffer>>;

/// Incremental UTF-8 decoding across reads.
///
/// A multi-byte character split between two reads is held back until its
/// remaining bytes arrive. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending = self.pending.split_off(valid + bad);
                        }
                        // Incomplete tail: wait for the next read.
                        None => {
                            self.pending = self.pending.split_off(valid);
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Flush a sequence left incomplete at end of stream.
    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

fn lock_output(output: &SharedOutput) -> MutexGuard<'_, OutputBuffer> {
    output.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Terminal entry ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitInfo {
    code: Option<i32>,
}

#[derive(Debug)]
struct Terminal {
    output: SharedOutput,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl Terminal {
    fn request_kill(&self) {
        let sender = self.kill.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    fn snapshot(&self) -> TerminalOutputResult {
        let exit = *self.exit.borrow();
        let output = lock_output(&self.output);
        TerminalOutputResult {
            output: output.data.clone(),
            truncated: output.truncated,
            exited: exit.is_some(),
            exit_code: exit.and_then(|e| e.code),
        }
    }
}

// ── Provider ──────────────────────────────────────────────────────────────────

/// [`Terminals`] backed by `tokio::process`.
#[derive(Debug)]
pub struct ProcessTerminals {
    next_id: AtomicU64,
    terminals: Mutex<HashMap<String, Arc<Terminal>>>,
    wait_timeout: Duration,
    default_output_limit: u64,
}

impl ProcessTerminals {
    /// Provider waiting at most `wait_timeout` in `wait_for_exit` and keeping
    /// `default_output_limit` bytes of output unless a request asks otherwise.
    #[must_use]
    pub fn new(wait_timeout: Duration, default_output_limit: u64) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            terminals: Mutex::new(HashMap::new()),
            wait_timeout,
            default_output_limit,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Terminal>>> {
        self.terminals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, terminal_id: &str) -> Result<Arc<Terminal>> {
        self.lock()
            .get(terminal_id)
            .cloned()
            .ok_or_else(|| AppError::ResourceNotFound(format!("unknown terminal {terminal_id}")))
    }

    /// Number of terminals not yet released.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether every terminal has been released.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn spawn_terminal(&self, params: CreateTerminalParams) -> Result<String> {
        let cwd = validate_absolute(&params.cwd)?;

        let mut cmd = if params.args.is_empty() {
            shell_command(&params.command)
        } else {
            let mut cmd = Command::new(&params.command);
            cmd.args(&params.args);
            cmd
        };
        cmd.envs(&params.env)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| map_io_error(&cwd, &err))?;

        let limit = params.output_byte_limit.unwrap_or(self.default_output_limit);
        let output: SharedOutput = Arc::new(Mutex::new(OutputBuffer::new(
            usize::try_from(limit).unwrap_or(usize::MAX),
        )));

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(spawn_pump(stdout, Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(spawn_pump(stderr, Arc::clone(&output)));
        }

        let terminal_id = format!("term_{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        let monitor_id = terminal_id.clone();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                // Fires on an explicit kill or when the terminal is dropped.
                _ = kill_rx => {
                    if let Err(err) = child.kill().await {
                        warn!(terminal_id = monitor_id, %err, "terminal: kill failed");
                    }
                    child.wait().await
                }
            };
            let code = match status {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!(terminal_id = monitor_id, %err, "terminal: wait failed");
                    None
                }
            };
            for pump in pumps {
                if tokio::time::timeout(DRAIN_GRACE, pump).await.is_err() {
                    debug!(terminal_id = monitor_id, "terminal: output pump still open, detaching");
                }
            }
            debug!(terminal_id = monitor_id, ?code, "terminal: exited");
            let _ = exit_tx.send(Some(ExitInfo { code }));
        });

        self.lock().insert(
            terminal_id.clone(),
            Arc::new(Terminal {
                output,
                exit: exit_rx,
                kill: Mutex::new(Some(kill_tx)),
            }),
        );
        info!(terminal_id, command = params.command, "terminal: created");
        Ok(terminal_id)
    }
}

impl Terminals for ProcessTerminals {
    fn create(&self, params: CreateTerminalParams) -> TerminalFuture<'_, String> {
        Box::pin(async move { self.spawn_terminal(params) })
    }

    fn output(&self, terminal_id: String) -> TerminalFuture<'_, TerminalOutputResult> {
        Box::pin(async move { Ok(self.get(&terminal_id)?.snapshot()) })
    }

    fn wait_for_exit(&self, terminal_id: String) -> TerminalFuture<'_, WaitForExitResult> {
        Box::pin(async move {
            let terminal = self.get(&terminal_id)?;
            let mut exit = terminal.exit.clone();
            let info = tokio::time::timeout(self.wait_timeout, exit.wait_for(Option::is_some))
                .await
                .map_err(|_| {
                    AppError::Timeout(format!(
                        "terminal {terminal_id} did not exit within {:?}",
                        self.wait_timeout
                    ))
                })?
                .map_err(|_| AppError::Internal(format!("terminal {terminal_id} monitor stopped")))?
                .unwrap_or(ExitInfo { code: None });
            let output = lock_output(&terminal.output).data.clone();
            Ok(WaitForExitResult {
                exit_code: info.code,
                output,
            })
        })
    }

    fn kill(&self, terminal_id: String) -> TerminalFuture<'_, ()> {
        Box::pin(async move {
            self.get(&terminal_id)?.request_kill();
            info!(terminal_id, "terminal: kill requested");
            Ok(())
        })
    }

    fn release(&self, terminal_id: String) -> TerminalFuture<'_, ()> {
        Box::pin(async move {
            let terminal = self
                .lock()
                .remove(&terminal_id)
                .ok_or_else(|| AppError::ResourceNotFound(format!("unknown terminal {terminal_id}")))?;
            terminal.request_kill();
            info!(terminal_id, "terminal: released");
            Ok(())
        })
    }
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(line);
    cmd
}

#[cfg(not(unix))]
fn shell_command(line: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(line);
    cmd
}

fn spawn_pump<R>(mut source: R, output: SharedOutput) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0_u8; 4096];
        let mut decoder = Utf8Decoder::default();
        loop {
            match source.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let text = decoder.decode(&buf[..n]);
                    if !text.is_empty() {
                        lock_output(&output).push(&text);
                    }
                }
            }
        }
        let rest = decoder.finish();
        if !rest.is_empty() {
            lock_output(&output).push(&rest);
        }
    })
}
