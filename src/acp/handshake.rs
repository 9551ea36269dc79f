//! ACP initialization handshake and capability negotiation.
//!
//! Both parties advertise a [`CapabilitySet`] during `initialize`:
//!
//! 1. The client sends `initialize` with its own set.
//! 2. The agent answers with its [`AgentCapabilities`].
//! 3. Each side runs [`negotiate`] over `(local, remote)` and stores the
//!    result once in its connection state; the agent does so when its
//!    handler succeeds, the client when the response arrives.
//!
//! The effective flag for every boolean capability is
//! `local AND remote`. Experimental extensions survive only when both sides
//! name them, keeping the local value.

use serde::Serialize;

use crate::acp::methods;
use crate::models::capabilities::{AgentCapabilities, Capability, CapabilitySet};
use crate::models::messages::{Implementation, InitializeParams, PROTOCOL_VERSION};
use crate::{AppError, Result};

/// Capability set agreed by both sides. Immutable once computed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EffectiveCapabilities(CapabilitySet);

impl EffectiveCapabilities {
    /// Whether `capability` was advertised by both sides.
    #[must_use]
    pub fn allows(&self, capability: Capability) -> bool {
        self.0.has(capability)
    }

    /// The agreed set.
    #[must_use]
    pub fn as_set(&self) -> &CapabilitySet {
        &self.0
    }

    /// Check the capability gate for `method`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::CapabilityNotSupported`] when `method` depends on a
    /// capability that is not effective.
    pub fn check(&self, method: &str) -> Result<()> {
        match methods::required_capability(method) {
            Some(capability) if !self.allows(capability) => {
                Err(AppError::CapabilityNotSupported(format!(
                    "{method} requires the {} capability, which was not negotiated",
                    capability.as_str()
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Compute the effective capability set from both advertisements.
#[must_use]
pub fn negotiate(local: &CapabilitySet, remote: &CapabilitySet) -> EffectiveCapabilities {
    let experimental = local
        .experimental
        .iter()
        .filter(|(key, _)| remote.experimental.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    EffectiveCapabilities(CapabilitySet {
        text_files: local.text_files && remote.text_files,
        terminal: local.terminal && remote.terminal,
        embedded_context: local.embedded_context && remote.embedded_context,
        audio: local.audio && remote.audio,
        image: local.image && remote.image,
        experimental,
    })
}

/// Build `initialize` parameters for a client.
#[must_use]
pub fn initialize_params(
    capabilities: CapabilitySet,
    working_directory: Option<String>,
) -> InitializeParams {
    InitializeParams {
        protocol_version: PROTOCOL_VERSION.to_owned(),
        client_info: Implementation::this_crate(),
        capabilities,
        working_directory,
        mcp_servers: Vec::new(),
    }
}

/// Whether the agent should accept a client speaking `version`.
///
/// Only the major component (text before the first `.`) must match.
#[must_use]
pub fn version_compatible(version: &str) -> bool {
    let major = |v: &str| v.split('.').next().unwrap_or_default().to_owned();
    major(version) == major(PROTOCOL_VERSION)
}

/// Agent capabilities advertising `set` with no modes or tools.
#[must_use]
pub fn agent_capabilities(set: CapabilitySet) -> AgentCapabilities {
    AgentCapabilities {
        set,
        ..AgentCapabilities::default()
    }
}
