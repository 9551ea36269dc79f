//! ACP method names and their capability gates.

use crate::models::capabilities::Capability;

/// Handshake (client → agent).
pub const INITIALIZE: &str = "initialize";
/// Optional authentication (client → agent).
pub const AUTHENTICATE: &str = "authenticate";
/// Create a session (client → agent).
pub const SESSION_NEW: &str = "session/new";
/// Restore a session (client → agent).
pub const SESSION_LOAD: &str = "session/load";
/// Run one prompt turn (client → agent).
pub const SESSION_PROMPT: &str = "session/prompt";
/// Cancel the active turn (client → agent).
pub const SESSION_CANCEL: &str = "session/cancel";
/// Close a session (client → agent).
pub const SESSION_CLOSE: &str = "session/close";
/// Streaming update notification (agent → client).
pub const SESSION_UPDATE: &str = "session/update";
/// Read a text file (agent → client).
pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
/// Write a text file (agent → client).
pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
/// Start a command (agent → client).
pub const TERMINAL_CREATE: &str = "terminal/create";
/// Poll a command's output (agent → client).
pub const TERMINAL_OUTPUT: &str = "terminal/output";
/// Wait for a command to exit (agent → client).
pub const TERMINAL_WAIT_FOR_EXIT: &str = "terminal/wait_for_exit";
/// Kill a command (agent → client).
pub const TERMINAL_KILL: &str = "terminal/kill";
/// Forget a terminal (agent → client).
pub const TERMINAL_RELEASE: &str = "terminal/release";

/// Methods the client serves on behalf of the agent.
pub const CLIENT_CALLBACKS: &[&str] = &[
    FS_READ_TEXT_FILE,
    FS_WRITE_TEXT_FILE,
    TERMINAL_CREATE,
    TERMINAL_OUTPUT,
    TERMINAL_WAIT_FOR_EXIT,
    TERMINAL_KILL,
    TERMINAL_RELEASE,
];

/// Methods the agent serves for the client.
pub const AGENT_METHODS: &[&str] = &[
    INITIALIZE,
    AUTHENTICATE,
    SESSION_NEW,
    SESSION_LOAD,
    SESSION_PROMPT,
    SESSION_CANCEL,
    SESSION_CLOSE,
];

/// Capability that must be effective before `method` may be called.
#[must_use]
pub fn required_capability(method: &str) -> Option<Capability> {
    if method.starts_with("fs/") {
        Some(Capability::TextFiles)
    } else if method.starts_with("terminal/") {
        Some(Capability::Terminal)
    } else {
        None
    }
}

/// Whether `method` may run before the connection is initialized.
#[must_use]
pub fn allowed_before_initialize(method: &str) -> bool {
    method == INITIALIZE
}
