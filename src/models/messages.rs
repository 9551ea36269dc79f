//! Parameter and result payloads for every ACP method.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::capabilities::{AgentCapabilities, CapabilitySet};
use crate::models::content::ContentBlock;

/// Protocol version sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025.1";

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Name and version of one party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Product name.
    pub name: String,
    /// Product version.
    pub version: String,
}

impl Implementation {
    /// This crate's own name and version.
    #[must_use]
    pub fn this_crate() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

/// MCP server the client wants the agent to use. Carried, never proxied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServer {
    /// Display name.
    pub name: String,
    /// Server endpoint.
    pub url: String,
    /// Opaque credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
}

/// `initialize` parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Protocol version spoken by the client.
    pub protocol_version: String,
    /// Client identity.
    pub client_info: Implementation,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: CapabilitySet,
    /// Client working directory (absolute).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// MCP servers made available to the agent.
    #[serde(default)]
    pub mcp_servers: Vec<McpServer>,
}

/// `initialize` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Protocol version spoken by the agent.
    pub protocol_version: String,
    /// Agent identity.
    pub agent_info: Implementation,
    /// Agent capabilities.
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    /// Free-form usage hints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// `authenticate` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateParams {
    /// Authentication scheme.
    #[serde(rename = "type")]
    pub auth_type: String,
    /// Scheme-specific token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// `authenticate` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateResult {
    /// Whether the credentials were accepted.
    pub success: bool,
}

// ── Sessions ──────────────────────────────────────────────────────────────────

/// `session/new` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNewParams {
    /// Caller-chosen session id.
    pub session_id: String,
    /// Requested mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Per-session MCP servers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mcp_servers: Vec<McpServer>,
}

/// `session/new` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionNewResult {
    /// The bound session id.
    pub session_id: String,
}

/// Parameters naming a single session (`session/load`, `session/cancel`,
/// `session/close`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    /// Target session.
    pub session_id: String,
}

/// `session/load` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLoadResult {
    /// The session id.
    pub session_id: String,
    /// Whether prior state was restored and the session is now bound.
    pub loaded: bool,
}

/// `session/prompt` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPromptParams {
    /// Target session.
    pub session_id: String,
    /// Prompt content.
    pub content: Vec<ContentBlock>,
}

/// Why a prompt turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The agent finished normally.
    EndTurn,
    /// The turn was cancelled by `session/cancel` or `session/close`.
    Cancelled,
    /// The agent declined to continue.
    Refusal,
    /// The agent hit its output limit.
    MaxTokens,
}

/// `session/prompt` result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPromptResult {
    /// Why the turn ended.
    pub stop_reason: StopReason,
}

// ── File system ───────────────────────────────────────────────────────────────

/// `fs/read_text_file` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadTextFileParams {
    /// Absolute path.
    pub path: String,
    /// First line to return (1-based).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Maximum number of lines to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// `fs/read_text_file` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadTextFileResult {
    /// File content (or the selected window).
    pub content: String,
}

/// `fs/write_text_file` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteTextFileParams {
    /// Absolute path.
    pub path: String,
    /// New file content.
    pub content: String,
}

/// Result of operations that only report success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessResult {
    /// Whether the operation succeeded.
    pub success: bool,
}

// ── Terminals ─────────────────────────────────────────────────────────────────

/// `terminal/create` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTerminalParams {
    /// Program, or a shell command line when `args` is empty.
    pub command: String,
    /// Program arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Absolute working directory.
    pub cwd: String,
    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Maximum retained output in bytes; older output is dropped first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_byte_limit: Option<u64>,
}

/// `terminal/create` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTerminalResult {
    /// Identifier for later terminal calls.
    pub terminal_id: String,
}

/// Parameters naming a single terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalRef {
    /// Target terminal.
    pub terminal_id: String,
}

/// `terminal/output` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalOutputResult {
    /// Output captured so far (stdout and stderr interleaved).
    pub output: String,
    /// Whether older output was dropped to honour the byte limit.
    pub truncated: bool,
    /// Whether the process has exited.
    pub exited: bool,
    /// Exit code, once exited (absent when killed by a signal).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// `terminal/wait_for_exit` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForExitResult {
    /// Exit code (absent when killed by a signal).
    pub exit_code: Option<i32>,
    /// Complete captured output.
    pub output: String,
}
