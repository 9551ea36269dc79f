//! Typed payloads carried inside ACP messages.

pub mod capabilities;
pub mod content;
pub mod messages;
pub mod session_update;
