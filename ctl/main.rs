#![forbid(unsafe_code)]

//! `acp-link-ctl`: interactive ACP client.
//!
//! Spawns an agent subprocess, performs the `initialize` handshake, opens a
//! session and runs a line-oriented prompt loop. Streamed text is printed
//! plainly as it arrives; slash commands control the session.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use acp_link::acp::spawner::{monitor_exit, spawn_agent, SpawnConfig};
use acp_link::acp::ConnectionOptions;
use acp_link::config::GlobalConfig;
use acp_link::driver::{ClientProviders, ClientSide, UpdateHandler};
use acp_link::models::content::ContentBlock;
use acp_link::models::session_update::{Plan, ToolCall, ToolCallUpdate};
use acp_link::{AppError, Result};

const HELP: &str = "\
commands:
  /help      show this help
  /new       open a fresh session
  /cancel    cancel the running prompt
  /info      show session and capability details
  /quit      close the connection and exit
anything else is sent as a prompt";

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "acp-link-ctl",
    about = "Interactive ACP client driving an agent subprocess",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Workspace root: the agent's working directory and the file root.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Agent command line; overrides `[agent]` in the configuration.
    #[arg(last = true)]
    agent: Vec<String>,
}

// ── Update printer ───────────────────────────────────────────────────────────

struct PrintUpdates;

impl PrintUpdates {
    fn line(text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{text}");
    }
}

impl UpdateHandler for PrintUpdates {
    fn on_agent_message(&self, _session_id: &str, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "{text}");
        let _ = out.flush();
    }

    fn on_agent_thought(&self, _session_id: &str, text: &str) {
        Self::line(&format!("[thought] {text}"));
    }

    fn on_tool_call(&self, _session_id: &str, call: &ToolCall) {
        Self::line(&format!("[tool] {} ({}) {}", call.name, call.id, call.arguments));
    }

    fn on_tool_update(&self, _session_id: &str, update: &ToolCallUpdate) {
        let detail = update.error.clone().unwrap_or_default();
        Self::line(&format!("[tool] {} -> {:?} {detail}", update.id, update.status));
    }

    fn on_plan(&self, _session_id: &str, plan: &Plan) {
        for step in &plan.steps {
            Self::line(&format!("[plan] {}. {} ({:?})", step.id, step.description, step.status));
        }
    }

    fn on_mode_change(&self, _session_id: &str, mode: &str) {
        Self::line(&format!("[mode] {mode}"));
    }

    fn on_done(&self, _session_id: &str) {
        Self::line("");
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let outcome = runtime.block_on(run(args));
    runtime.shutdown_timeout(Duration::from_millis(250));
    outcome
}

fn load_config(args: &Cli) -> Result<GlobalConfig> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(ws) = &args.workspace {
        config.agent.workspace_root = Some(ws.clone());
        config.client.fs_root = Some(ws.clone());
    }
    if let Some((command, rest)) = args.agent.split_first() {
        config.agent.command.clone_from(command);
        config.agent.args = rest.to_vec();
    }
    config.validate()?;
    Ok(config)
}

async fn run(args: Cli) -> Result<()> {
    let config = load_config(&args)?;
    let spawn = SpawnConfig::from(&config.agent);
    let process = spawn_agent(&spawn)?;

    let providers = ClientProviders::from_config(&config.client)?;
    let (client, driver) = ClientSide::connect(
        &providers,
        Arc::new(PrintUpdates),
        process.stdout,
        process.stdin,
        ConnectionOptions::from(&config.connection),
    )?;

    let monitor_ct = CancellationToken::new();
    let monitor = monitor_exit(process.child, spawn.shutdown_grace, monitor_ct.clone());

    let working_directory = config
        .agent
        .workspace_root
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned());
    let outcome = repl(&client, working_directory).await;

    client.close();
    match driver.await {
        Ok(Err(err)) => warn!(%err, "connection ended with an error"),
        Err(err) => warn!(%err, "connection task failed"),
        Ok(Ok(())) => {}
    }
    monitor_ct.cancel();
    if let Ok(Some(code)) = monitor.await {
        info!(exit_code = code, "agent exited");
    }
    outcome
}

async fn repl(client: &ClientSide, working_directory: Option<String>) -> Result<()> {
    let init = client.initialize(working_directory).await?;
    PrintUpdates::line(&format!(
        "connected to {} {} (protocol {})",
        init.agent_info.name, init.agent_info.version, init.protocol_version
    ));
    if let Some(instructions) = &init.instructions {
        PrintUpdates::line(instructions);
    }

    let mut session_id = client.session_new(ClientSide::new_session_id(), None).await?;
    PrintUpdates::line(&format!("session {session_id} ready; /help for commands"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut running: Option<JoinHandle<()>> = None;

    loop {
        let line = tokio::select! {
            () = client.connection().closed() => {
                PrintUpdates::line("agent disconnected");
                return Ok(());
            }
            () = shutdown_signal() => {
                info!("shutdown signal received");
                return Ok(());
            }
            line = lines.next_line() => line
                .map_err(|err| AppError::Io(format!("cannot read stdin: {err}")))?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        let line = line.trim();
        if running.as_ref().is_some_and(JoinHandle::is_finished) {
            running = None;
        }

        match line {
            "" => {}
            "/help" => PrintUpdates::line(HELP),
            "/quit" => return Ok(()),
            "/info" => print_info(client, &session_id),
            "/cancel" => {
                if let Err(err) = client.session_cancel(&session_id).await {
                    PrintUpdates::line(&format!("cancel failed: {err}"));
                }
            }
            "/new" => match client.session_new(ClientSide::new_session_id(), None).await {
                Ok(id) => {
                    session_id = id;
                    PrintUpdates::line(&format!("session {session_id} ready"));
                }
                Err(err) => PrintUpdates::line(&format!("session/new failed: {err}")),
            },
            cmd if cmd.starts_with('/') => {
                PrintUpdates::line(&format!("unknown command {cmd}; /help for commands"));
            }
            prompt => {
                if running.is_some() {
                    PrintUpdates::line("a prompt is still running; /cancel it first");
                    continue;
                }
                let client = client.clone();
                let sid = session_id.clone();
                let content = vec![ContentBlock::text(prompt)];
                running = Some(tokio::spawn(async move {
                    match client.session_prompt(&sid, content).await {
                        Ok(stop_reason) => PrintUpdates::line(&format!("[{stop_reason:?}]")),
                        Err(err) => PrintUpdates::line(&format!("prompt failed: {err}")),
                    }
                }));
            }
        }
    }
}

fn print_info(client: &ClientSide, session_id: &str) {
    match client.connection().state().session(session_id) {
        Some(info) => PrintUpdates::line(&format!(
            "session {} state={:?} turns={} created={}",
            info.session_id, info.state, info.turns, info.created_at
        )),
        None => PrintUpdates::line(&format!("session {session_id} unknown")),
    }
    if let Some(caps) = client.capabilities() {
        PrintUpdates::line(&format!("capabilities: {:?}", caps.as_set()));
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
