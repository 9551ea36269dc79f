//! Global configuration parsing and validation.
//!
//! Every table and field is optional; an empty file (or no file at all,
//! via [`GlobalConfig::default`]) yields a working configuration.
//!
//! ```toml
//! [connection]
//! max_line_bytes = 1048576
//! request_timeout_seconds = 30
//!
//! [agent]
//! command = "acp-link"
//! args = []
//! workspace_root = "/home/me/project"
//! shutdown_grace_seconds = 5
//!
//! [client]
//! text_files = true
//! terminal = true
//! fs_root = "/home/me/project"
//! terminal_wait_seconds = 300
//! output_byte_limit = 1048576
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::acp::codec::MAX_LINE_BYTES;
use crate::models::capabilities::CapabilitySet;
use crate::{AppError, Result};

/// Transport limits shared by both roles.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConnectionConfig {
    /// Largest inbound record accepted, in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Deadline for every outbound request.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

fn default_max_line_bytes() -> usize {
    MAX_LINE_BYTES
}

fn default_request_timeout_seconds() -> u64 {
    30
}

/// How the client launches its agent subprocess.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent binary.
    #[serde(default = "default_agent_command")]
    pub command: String,
    /// Arguments passed to the agent.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory of the agent; defaults to the current directory.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    /// Time the agent gets to exit after its stdin closes before it is killed.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: Vec::new(),
            workspace_root: None,
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

fn default_agent_command() -> String {
    "acp-link".into()
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

/// Client-side capability providers.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Advertise and serve `fs/*`.
    #[serde(default = "default_true")]
    pub text_files: bool,
    /// Advertise and serve `terminal/*`.
    #[serde(default = "default_true")]
    pub terminal: bool,
    /// Confine file access to this directory.
    #[serde(default)]
    pub fs_root: Option<PathBuf>,
    /// Upper bound for `terminal/wait_for_exit`.
    #[serde(default = "default_terminal_wait_seconds")]
    pub terminal_wait_seconds: u64,
    /// Default retained output per terminal, in bytes.
    #[serde(default = "default_output_byte_limit")]
    pub output_byte_limit: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            text_files: true,
            terminal: true,
            fs_root: None,
            terminal_wait_seconds: default_terminal_wait_seconds(),
            output_byte_limit: default_output_byte_limit(),
        }
    }
}

impl ClientConfig {
    /// Capability set the client advertises in `initialize`.
    #[must_use]
    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet {
            text_files: self.text_files,
            terminal: self.terminal,
            image: true,
            ..CapabilitySet::default()
        }
    }

    /// Upper bound for `terminal/wait_for_exit`.
    #[must_use]
    pub fn terminal_wait(&self) -> Duration {
        Duration::from_secs(self.terminal_wait_seconds)
    }
}

fn default_true() -> bool {
    true
}

fn default_terminal_wait_seconds() -> u64 {
    300
}

fn default_output_byte_limit() -> u64 {
    1_048_576
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Transport limits.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Agent subprocess settings (client role).
    #[serde(default)]
    pub agent: AgentConfig,
    /// Capability providers (client role).
    #[serde(default)]
    pub client: ClientConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate limits and canonicalize configured directories.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for zero limits or missing directories.
    pub fn validate(&mut self) -> Result<()> {
        if self.connection.max_line_bytes == 0 {
            return Err(AppError::Config(
                "connection.max_line_bytes must be greater than zero".into(),
            ));
        }
        if self.connection.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "connection.request_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.client.terminal_wait_seconds == 0 {
            return Err(AppError::Config(
                "client.terminal_wait_seconds must be greater than zero".into(),
            ));
        }
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if let Some(root) = self.agent.workspace_root.take() {
            self.agent.workspace_root = Some(canonical_dir("agent.workspace_root", &root)?);
        }
        if let Some(root) = self.client.fs_root.take() {
            self.client.fs_root = Some(canonical_dir("client.fs_root", &root)?);
        }
        Ok(())
    }

    /// Outbound request deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.request_timeout_seconds)
    }
}

fn canonical_dir(field: &str, path: &Path) -> Result<PathBuf> {
    let canonical = path
        .canonicalize()
        .map_err(|err| AppError::Config(format!("{field} {}: {err}", path.display())))?;
    if !canonical.is_dir() {
        return Err(AppError::Config(format!(
            "{field} {} is not a directory",
            canonical.display()
        )));
    }
    Ok(canonical)
}
