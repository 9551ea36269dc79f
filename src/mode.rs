//! Connection role: which side of the protocol this process plays.
//!
//! The agent and client roles share the whole engine; the only difference
//! is the [`RoleProfile`]: which methods the role serves (registers handlers
//! or subscribers for) and which it issues.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::acp::methods::{self, AGENT_METHODS, CLIENT_CALLBACKS};

/// Side of an ACP connection.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Spawned subprocess answering prompts.
    Agent,
    /// Editor/host driving the agent.
    Client,
}

/// Registration data distinguishing the two roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleProfile {
    /// Role described by this profile.
    pub role: Role,
    /// Requests this role answers.
    pub serves_requests: &'static [&'static str],
    /// Notifications this role consumes.
    pub serves_notifications: &'static [&'static str],
    /// Requests this role sends.
    pub issues_requests: &'static [&'static str],
    /// Notifications this role sends.
    pub issues_notifications: &'static [&'static str],
}

const AGENT_NOTIFICATIONS_IN: &[&str] = &[methods::SESSION_CANCEL];
const CLIENT_NOTIFICATIONS_IN: &[&str] = &[methods::SESSION_UPDATE];

impl Role {
    /// Registration profile for this role.
    #[must_use]
    pub fn profile(self) -> RoleProfile {
        match self {
            Self::Agent => RoleProfile {
                role: self,
                serves_requests: AGENT_METHODS,
                serves_notifications: AGENT_NOTIFICATIONS_IN,
                issues_requests: CLIENT_CALLBACKS,
                issues_notifications: CLIENT_NOTIFICATIONS_IN,
            },
            Self::Client => RoleProfile {
                role: self,
                serves_requests: CLIENT_CALLBACKS,
                serves_notifications: CLIENT_NOTIFICATIONS_IN,
                issues_requests: AGENT_METHODS,
                issues_notifications: AGENT_NOTIFICATIONS_IN,
            },
        }
    }

    /// Lower-case name used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Client => "client",
        }
    }
}

impl RoleProfile {
    /// Whether the role answers `method` requests.
    #[must_use]
    pub fn serves_request(&self, method: &str) -> bool {
        self.serves_requests.contains(&method)
    }

    /// Whether the role consumes `method` notifications.
    #[must_use]
    pub fn serves_notification(&self, method: &str) -> bool {
        self.serves_notifications.contains(&method)
    }

    /// Whether the role may send `method` requests.
    #[must_use]
    pub fn issues_request(&self, method: &str) -> bool {
        self.issues_requests.contains(&method)
    }

    /// Whether the role may send `method` notifications.
    #[must_use]
    pub fn issues_notification(&self, method: &str) -> bool {
        self.issues_notifications.contains(&method)
    }
}
