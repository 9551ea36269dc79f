//! Streaming turn state: cancellation and tool-call bookkeeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

use crate::models::session_update::{ToolCall, ToolCallStatus, ToolCallUpdate};
use crate::{AppError, Result};

/// Tool call known to a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRecord {
    /// Identifier announced by the `tool_call` update.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Latest status.
    pub status: ToolCallStatus,
}

/// Validates `tool_call` / `tool_call_update` sequences.
///
/// An update is only legal for an id that a prior `tool_call` announced.
#[derive(Debug, Default)]
pub struct ToolCallTracker {
    records: HashMap<String, ToolCallRecord>,
}

impl ToolCallTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly announced tool call.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidParams`] when the id was already announced.
    pub fn announce(&mut self, call: &ToolCall) -> Result<()> {
        if self.records.contains_key(&call.id) {
            return Err(AppError::InvalidParams(format!(
                "tool call {} was already announced",
                call.id
            )));
        }
        self.records.insert(
            call.id.clone(),
            ToolCallRecord {
                id: call.id.clone(),
                name: call.name.clone(),
                status: ToolCallStatus::Pending,
            },
        );
        Ok(())
    }

    /// Apply a status update to a known tool call.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidParams`] when the id was never announced.
    pub fn apply(&mut self, update: &ToolCallUpdate) -> Result<&ToolCallRecord> {
        let record = self.records.get_mut(&update.id).ok_or_else(|| {
            AppError::InvalidParams(format!(
                "tool_call_update references unknown tool call {}",
                update.id
            ))
        })?;
        record.status = update.status;
        Ok(record)
    }

    /// Look up a tool call.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ToolCallRecord> {
        self.records.get(id)
    }
}

#[derive(Debug)]
struct TurnGate {
    open: bool,
    tool_calls: ToolCallTracker,
}

/// Handle on one in-flight `session/prompt`.
///
/// Cloning shares the same turn. Notifications for the turn are emitted
/// through [`StreamingTurn::emit`], which holds the turn lock while queueing;
/// [`StreamingTurn::cancel`] takes the same lock, so once a cancel returns no
/// further notification of the turn can be queued.
#[derive(Debug, Clone)]
pub struct StreamingTurn {
    session_id: Arc<str>,
    seq: u64,
    token: CancellationToken,
    gate: Arc<Mutex<TurnGate>>,
}

impl StreamingTurn {
    pub(crate) fn new(session_id: &str, seq: u64, parent: &CancellationToken) -> Self {
        Self {
            session_id: Arc::from(session_id),
            seq,
            token: parent.child_token(),
            gate: Arc::new(Mutex::new(TurnGate {
                open: true,
                tool_calls: ToolCallTracker::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TurnGate> {
        self.gate
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Session the turn belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Per-session sequence number of the turn.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Token cancelled when the turn is cancelled or the connection closes.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the turn still accepts notifications.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().open && !self.token.is_cancelled()
    }

    /// Request cancellation and stop accepting notifications.
    pub fn cancel(&self) {
        let mut gate = self.lock();
        gate.open = false;
        self.token.cancel();
    }

    /// Stop accepting notifications without signalling cancellation.
    pub(crate) fn close(&self) {
        self.lock().open = false;
    }

    /// Run `send` under the turn lock if the turn is still open.
    ///
    /// `send` receives the tool-call tracker so announcements and updates are
    /// validated atomically with their emission.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] once the turn was cancelled or
    /// ended, or whatever `send` returns.
    pub fn emit<F>(&self, send: F) -> Result<()>
    where
        F: FnOnce(&mut ToolCallTracker) -> Result<()>,
    {
        let mut gate = self.lock();
        if !gate.open || self.token.is_cancelled() {
            return Err(AppError::InvalidState(format!(
                "turn {} of session {} is no longer streaming",
                self.seq, self.session_id
            )));
        }
        send(&mut gate.tool_calls)
    }

    /// Snapshot of a tool call recorded during this turn.
    #[must_use]
    pub fn tool_call(&self, id: &str) -> Option<ToolCallRecord> {
        self.lock().tool_calls.get(id).cloned()
    }
}
