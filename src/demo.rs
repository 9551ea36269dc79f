//! Deterministic demo agent.
//!
//! [`EchoAgent`] answers every prompt by streaming the prompt text back,
//! word by word, and exercises the rest of the update surface along the way:
//!
//! - a thought chunk opens every turn;
//! - a prompt mentioning "plan" gets a three-step plan;
//! - `read <absolute path>` reads the file through the client (`read_file`
//!   tool call);
//! - `run <command line>` executes it in a client terminal (`run_command`
//!   tool call);
//! - a `done` update closes the stream.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::driver::agent_side::{Agent, AgentFuture, TurnContext};
use crate::models::capabilities::{AgentCapabilities, CapabilitySet, ToolInfo};
use crate::models::content::joined_text;
use crate::models::messages::{
    CreateTerminalParams, Implementation, InitializeParams, InitializeResult, ReadTextFileParams,
    SessionNewParams, SessionPromptParams, SessionRef, StopReason, PROTOCOL_VERSION,
};
use crate::models::session_update::{
    Plan, PlanStep, PlanStepStatus, ToolCall, ToolCallStatus, ToolCallUpdate,
};
use crate::{AppError, Result};

/// Upper bound for `run` commands.
const RUN_TIMEOUT: Duration = Duration::from_secs(60);

/// Demo agent echoing prompts back as streamed updates.
#[derive(Debug, Default)]
pub struct EchoAgent {
    chunk_delay: Duration,
    capabilities: Option<CapabilitySet>,
    known_sessions: Mutex<HashSet<String>>,
}

impl EchoAgent {
    /// Agent streaming without delay and advertising every capability.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause `delay` between streamed chunks.
    #[must_use]
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Advertise `capabilities` instead of the full set.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    fn advertised(&self) -> AgentCapabilities {
        AgentCapabilities {
            set: self.capabilities.clone().unwrap_or_else(CapabilitySet::all),
            streaming: true,
            supported_modes: vec!["agent".into(), "ask".into()],
            tools: vec![
                ToolInfo {
                    name: "read_file".into(),
                    description: "Read a text file from the client workspace".into(),
                    parameters: json!({
                        "type": "object",
                        "properties": { "path": { "type": "string" } },
                        "required": ["path"]
                    }),
                },
                ToolInfo {
                    name: "run_command".into(),
                    description: "Run a shell command in a client terminal".into(),
                    parameters: json!({
                        "type": "object",
                        "properties": { "command": { "type": "string" } },
                        "required": ["command"]
                    }),
                },
            ],
        }
    }

    async fn pause(&self, turn: &TurnContext) {
        if self.chunk_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                () = turn.token().cancelled() => {}
                () = tokio::time::sleep(self.chunk_delay) => {}
            }
        }
    }

    async fn prompt(&self, text: String, turn: TurnContext) -> Result<StopReason> {
        let updates = turn.updates();
        updates.thought_chunk(format!("echoing {} characters", text.chars().count()))?;

        if text.to_lowercase().contains("plan") {
            updates.plan(demo_plan())?;
        }

        let trimmed = text.trim();
        if let Some(path) = trimmed.strip_prefix("read ") {
            read_file(&turn, path.trim()).await?;
        } else if let Some(command) = trimmed.strip_prefix("run ") {
            run_command(&turn, command.trim()).await?;
        }

        for (i, word) in text.split_whitespace().enumerate() {
            self.pause(&turn).await;
            if turn.is_cancelled() {
                return Ok(StopReason::Cancelled);
            }
            let chunk = if i == 0 { word.to_owned() } else { format!(" {word}") };
            updates.message_chunk(chunk)?;
        }

        updates.done()?;
        Ok(StopReason::EndTurn)
    }
}

fn demo_plan() -> Plan {
    let step = |id, description: &str| PlanStep {
        id,
        description: description.into(),
        status: PlanStepStatus::Pending,
    };
    Plan {
        steps: vec![
            step(1, "Read the prompt"),
            step(2, "Echo it back"),
            step(3, "Finish the turn"),
        ],
    }
}

fn tool_result(id: &str, outcome: Result<serde_json::Value>) -> ToolCallUpdate {
    match outcome {
        Ok(result) => ToolCallUpdate {
            id: id.into(),
            status: ToolCallStatus::Completed,
            result: Some(result),
            error: None,
        },
        Err(err) => ToolCallUpdate {
            id: id.into(),
            status: ToolCallStatus::Failed,
            result: None,
            error: Some(err.to_string()),
        },
    }
}

fn in_progress(id: &str) -> ToolCallUpdate {
    ToolCallUpdate {
        id: id.into(),
        status: ToolCallStatus::InProgress,
        result: None,
        error: None,
    }
}

async fn read_file(turn: &TurnContext, path: &str) -> Result<()> {
    let updates = turn.updates();
    let id = "call_read_file";
    updates.tool_call(ToolCall {
        id: id.into(),
        name: "read_file".into(),
        arguments: json!({ "path": path }),
    })?;
    updates.tool_call_update(in_progress(id))?;

    let outcome = turn
        .client()
        .read_text_file(ReadTextFileParams {
            path: path.to_owned(),
            line: None,
            limit: None,
        })
        .await;
    debug!(path, ok = outcome.is_ok(), "echo: read_file finished");
    let content = outcome.as_ref().ok().cloned();
    updates.tool_call_update(tool_result(id, outcome.map(|c| json!({ "content": c }))))?;
    if let Some(content) = content {
        updates.message_chunk(content)?;
    }
    Ok(())
}

async fn run_command(turn: &TurnContext, command: &str) -> Result<()> {
    let updates = turn.updates();
    let id = "call_run_command";
    updates.tool_call(ToolCall {
        id: id.into(),
        name: "run_command".into(),
        arguments: json!({ "command": command }),
    })?;
    updates.tool_call_update(in_progress(id))?;

    let outcome = run_in_terminal(turn, command).await;
    let output = outcome.as_ref().ok().map(|(_, output)| output.clone());
    updates.tool_call_update(tool_result(
        id,
        outcome.map(|(exit_code, output)| json!({ "exit_code": exit_code, "output": output })),
    ))?;
    if let Some(output) = output {
        updates.message_chunk(output)?;
    }
    Ok(())
}

async fn run_in_terminal(turn: &TurnContext, command: &str) -> Result<(Option<i32>, String)> {
    let cwd = std::env::current_dir()
        .map_err(|err| AppError::Io(format!("cannot resolve working directory: {err}")))?;
    let client = turn.client();
    let terminal_id = client
        .create_terminal(CreateTerminalParams {
            command: command.to_owned(),
            args: Vec::new(),
            cwd: cwd.to_string_lossy().into_owned(),
            env: std::collections::HashMap::new(),
            output_byte_limit: None,
        })
        .await?;
    let waited = client.wait_for_exit(&terminal_id, RUN_TIMEOUT).await;
    if let Err(err) = client.release_terminal(&terminal_id).await {
        debug!(terminal_id, %err, "echo: release failed");
    }
    let result = waited?;
    Ok((result.exit_code, result.output))
}

impl Agent for EchoAgent {
    fn initialize(&self, params: InitializeParams) -> AgentFuture<'_, InitializeResult> {
        Box::pin(async move {
            debug!(client = params.client_info.name, "echo: initialize");
            Ok(InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_owned(),
                agent_info: Implementation::this_crate(),
                capabilities: self.advertised(),
                instructions: Some("Echoes every prompt back.".into()),
            })
        })
    }

    fn session_new(&self, params: SessionNewParams) -> AgentFuture<'_, ()> {
        Box::pin(async move {
            self.known_sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(params.session_id);
            Ok(())
        })
    }

    fn session_load(&self, params: SessionRef) -> AgentFuture<'_, bool> {
        Box::pin(async move {
            Ok(self
                .known_sessions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&params.session_id))
        })
    }

    fn session_prompt(
        &self,
        params: SessionPromptParams,
        turn: TurnContext,
    ) -> AgentFuture<'_, StopReason> {
        Box::pin(async move { self.prompt(joined_text(&params.content), turn).await })
    }
}
