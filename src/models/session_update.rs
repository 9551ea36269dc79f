//! `session/update` notification payloads.
//!
//! On the wire an update is `{"session_id": …, "type": …, "data": …}`; the
//! `type`/`data` pair is the adjacently tagged [`SessionUpdateKind`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Announced but not started.
    Pending,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// Announcement of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier referenced by later updates.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

/// Status change of a previously announced tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallUpdate {
    /// Identifier from the originating [`ToolCall`].
    pub id: String,
    /// New status.
    pub status: ToolCallStatus,
    /// Tool output, when completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error description, when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Status of a plan step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStepStatus {
    /// Not started.
    Pending,
    /// Running.
    InProgress,
    /// Done.
    Completed,
    /// Deliberately not executed.
    Skipped,
    /// Attempted and failed.
    Failed,
}

/// One step of an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step number.
    pub id: u32,
    /// What the step does.
    pub description: String,
    /// Current status.
    pub status: PlanStepStatus,
}

/// Execution plan shared with the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Ordered steps.
    pub steps: Vec<PlanStep>,
}

/// Kind-specific part of a `session/update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionUpdateKind {
    /// Chunk of the agent's visible reply.
    AgentMessageChunk {
        /// Chunk text.
        text: String,
    },
    /// Chunk of the agent's reasoning.
    AgentThoughtChunk {
        /// Chunk text.
        text: String,
    },
    /// New tool call.
    ToolCall(ToolCall),
    /// Tool call status change.
    ToolCallUpdate(ToolCallUpdate),
    /// Execution plan.
    Plan(Plan),
    /// Session mode change.
    ModeChange {
        /// New mode name.
        mode: String,
    },
    /// The agent finished producing output for the turn.
    Done,
}

impl SessionUpdateKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentMessageChunk { .. } => "agent_message_chunk",
            Self::AgentThoughtChunk { .. } => "agent_thought_chunk",
            Self::ToolCall(_) => "tool_call",
            Self::ToolCallUpdate(_) => "tool_call_update",
            Self::Plan(_) => "plan",
            Self::ModeChange { .. } => "mode_change",
            Self::Done => "done",
        }
    }
}

/// Parameters of a `session/update` notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    /// Session the update belongs to.
    pub session_id: String,
    /// Update payload.
    #[serde(flatten)]
    pub kind: SessionUpdateKind,
}
