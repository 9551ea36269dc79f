//! Capability sets exchanged during `initialize`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Optional protocol features a party advertises.
///
/// Both sides send one of these during `initialize`; the effective set is
/// the per-flag logical AND (see [`crate::acp::handshake`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CapabilitySet {
    /// Text file read/write callbacks (`fs/*`).
    pub text_files: bool,
    /// Terminal execution callbacks (`terminal/*`).
    pub terminal: bool,
    /// Embedded resource context in prompts.
    pub embedded_context: bool,
    /// Audio content blocks.
    pub audio: bool,
    /// Image content blocks.
    pub image: bool,
    /// Vendor-specific extensions, keyed by name.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub experimental: HashMap<String, Value>,
}

impl CapabilitySet {
    /// Set with every boolean capability enabled and no extensions.
    #[must_use]
    pub fn all() -> Self {
        Self {
            text_files: true,
            terminal: true,
            embedded_context: true,
            audio: true,
            image: true,
            experimental: HashMap::new(),
        }
    }

    /// Whether `capability` is set.
    #[must_use]
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::TextFiles => self.text_files,
            Capability::Terminal => self.terminal,
            Capability::EmbeddedContext => self.embedded_context,
            Capability::Audio => self.audio,
            Capability::Image => self.image,
        }
    }
}

/// Named boolean capability subject to negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// `fs/*` callbacks.
    TextFiles,
    /// `terminal/*` callbacks.
    Terminal,
    /// Embedded resources in prompt content.
    EmbeddedContext,
    /// Audio content.
    Audio,
    /// Image content.
    Image,
}

impl Capability {
    /// Wire name of the flag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextFiles => "text_files",
            Self::Terminal => "terminal",
            Self::EmbeddedContext => "embedded_context",
            Self::Audio => "audio",
            Self::Image => "image",
        }
    }
}

/// Tool descriptor advertised by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema of the tool's parameters.
    #[serde(default)]
    pub parameters: Value,
}

/// Capabilities advertised by the agent in the `initialize` result.
///
/// The negotiable flags are flattened alongside agent-only descriptors,
/// which are informational and never gate a method.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentCapabilities {
    /// Negotiable flags.
    #[serde(flatten)]
    pub set: CapabilitySet,
    /// Whether the agent streams partial output.
    #[serde(default)]
    pub streaming: bool,
    /// Session modes the agent accepts in `session/new`.
    #[serde(default)]
    pub supported_modes: Vec<String>,
    /// Tools the agent may invoke.
    #[serde(default)]
    pub tools: Vec<ToolInfo>,
}
