//! Connection phase and per-session lifecycle.
//!
//! ```text
//! connection:  Created ──initialize──▶ Initializing ──ok──▶ Initialized ──▶ Closed
//!                 ▲                          │
//!                 └────────── failed ────────┘
//!
//! session:     Active ──prompt──▶ Processing ──result / cancel──▶ Active
//!                 └───────────── close / teardown ──────────────▶ Closed
//! ```
//!
//! All transitions go through [`ConnectionState`]; the dispatcher consults
//! it before any handler runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::acp::handshake::EffectiveCapabilities;
use crate::acp::methods;
use crate::session::turn::StreamingTurn;
use crate::{AppError, Result};

/// Lifecycle phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// Transport up, no `initialize` yet.
    Created,
    /// `initialize` in flight.
    Initializing,
    /// Capabilities negotiated; session methods accepted.
    Initialized,
    /// Connection torn down.
    Closed,
}

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Bound and idle.
    Active,
    /// A prompt turn is streaming.
    Processing,
    /// Terminal; the id can never be bound again on this connection.
    Closed,
}

impl SessionState {
    /// Check whether a transition from `self` to `next` is valid.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Processing | Self::Closed) | (Self::Processing, Self::Active | Self::Closed)
        )
    }
}

/// Snapshot of a session for inspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    /// Session id.
    pub session_id: String,
    /// Current state.
    pub state: SessionState,
    /// Mode requested at creation.
    pub mode: Option<String>,
    /// Effective capabilities when the session was bound.
    pub capabilities: EffectiveCapabilities,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Number of turns started so far.
    pub turns: u64,
}

#[derive(Debug)]
struct SessionEntry {
    info: SessionInfo,
    turn: Option<StreamingTurn>,
}

#[derive(Debug)]
struct Inner {
    phase: ConnectionPhase,
    sessions: HashMap<String, SessionEntry>,
}

/// Mutable per-connection protocol state.
#[derive(Debug)]
pub struct ConnectionState {
    inner: Mutex<Inner>,
    capabilities: OnceLock<EffectiveCapabilities>,
    shutdown: CancellationToken,
}

impl ConnectionState {
    /// Fresh state in [`ConnectionPhase::Created`].
    ///
    /// Turn tokens are children of `shutdown`, so cancelling it cancels every
    /// active turn.
    #[must_use]
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: ConnectionPhase::Created,
                sessions: HashMap::new(),
            }),
            capabilities: OnceLock::new(),
            shutdown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // ── Connection phase ──────────────────────────────────────────────────────

    /// Current connection phase.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.lock().phase
    }

    /// Whether `initialize` completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.phase() == ConnectionPhase::Initialized
    }

    /// Negotiated capabilities, once initialized.
    #[must_use]
    pub fn capabilities(&self) -> Option<&EffectiveCapabilities> {
        self.capabilities.get()
    }

    /// Enter [`ConnectionPhase::Initializing`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] unless the phase is `Created`.
    pub fn begin_initialize(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.phase {
            ConnectionPhase::Created => {
                inner.phase = ConnectionPhase::Initializing;
                Ok(())
            }
            ConnectionPhase::Initializing => Err(AppError::InvalidState(
                "initialize is already in progress".into(),
            )),
            ConnectionPhase::Initialized => Err(AppError::InvalidState(
                "connection is already initialized".into(),
            )),
            ConnectionPhase::Closed => {
                Err(AppError::ConnectionClosed("connection is closed".into()))
            }
        }
    }

    /// Store the negotiated capabilities and enter `Initialized`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] unless the phase is `Initializing`.
    pub fn complete_initialize(&self, effective: EffectiveCapabilities) -> Result<()> {
        let mut inner = self.lock();
        if inner.phase != ConnectionPhase::Initializing {
            return Err(AppError::InvalidState(format!(
                "cannot complete initialize in phase {:?}",
                inner.phase
            )));
        }
        self.capabilities
            .set(effective)
            .map_err(|_| AppError::InvalidState("capabilities already negotiated".into()))?;
        inner.phase = ConnectionPhase::Initialized;
        info!("connection initialized");
        Ok(())
    }

    /// Return to `Created` after a failed `initialize`.
    pub fn abort_initialize(&self) {
        let mut inner = self.lock();
        if inner.phase == ConnectionPhase::Initializing {
            inner.phase = ConnectionPhase::Created;
        }
    }

    /// Gate an inbound request before its handler runs.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] for anything but `initialize` before the
    ///   connection is initialized.
    /// - [`AppError::CapabilityNotSupported`] for a gated method whose
    ///   capability is not effective.
    pub fn check_request(&self, method: &str) -> Result<()> {
        let phase = self.phase();
        if phase == ConnectionPhase::Closed {
            return Err(AppError::ConnectionClosed("connection is closed".into()));
        }
        if methods::allowed_before_initialize(method) {
            return Ok(());
        }
        if phase != ConnectionPhase::Initialized {
            return Err(AppError::InvalidState(format!(
                "{method} is not accepted before initialize completes"
            )));
        }
        self.check_capability(method)
    }

    /// Check only the capability gate for `method`.
    ///
    /// Before negotiation nothing is known, so gated methods are refused.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::CapabilityNotSupported`] when the gate is closed.
    pub fn check_capability(&self, method: &str) -> Result<()> {
        match self.capabilities.get() {
            Some(effective) => effective.check(method),
            None => EffectiveCapabilities::default().check(method),
        }
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    /// Bind `session_id` in state `Active`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidState`] when the id is live or was closed
    /// earlier on this connection.
    pub fn open_session(&self, session_id: &str, mode: Option<String>) -> Result<SessionInfo> {
        let capabilities = self.capabilities.get().cloned().unwrap_or_default();
        let mut inner = self.lock();
        if let Some(existing) = inner.sessions.get(session_id) {
            return Err(AppError::InvalidState(match existing.info.state {
                SessionState::Closed => format!("session {session_id} was closed and cannot be reused"),
                _ => format!("session {session_id} already exists"),
            }));
        }
        let info = SessionInfo {
            session_id: session_id.to_owned(),
            state: SessionState::Active,
            mode,
            capabilities,
            created_at: Utc::now(),
            turns: 0,
        };
        inner.sessions.insert(
            session_id.to_owned(),
            SessionEntry {
                info: info.clone(),
                turn: None,
            },
        );
        info!(session_id, "session bound");
        Ok(info)
    }

    /// Start a prompt turn: `Active → Processing`.
    ///
    /// # Errors
    ///
    /// - [`AppError::ResourceNotFound`] for unknown or closed sessions.
    /// - [`AppError::InvalidState`] when a turn is already streaming.
    pub fn begin_turn(&self, session_id: &str) -> Result<StreamingTurn> {
        let mut inner = self.lock();
        let entry = live_entry(&mut inner, session_id)?;
        if entry.info.state == SessionState::Processing {
            return Err(AppError::InvalidState(format!(
                "session {session_id} is already processing a prompt"
            )));
        }
        entry.info.turns += 1;
        let turn = StreamingTurn::new(session_id, entry.info.turns, &self.shutdown);
        entry.info.state = SessionState::Processing;
        entry.turn = Some(turn.clone());
        Ok(turn)
    }

    /// End `turn`: `Processing → Active`.
    ///
    /// A no-op when the turn was already ended by a cancel or close.
    pub fn end_turn(&self, turn: &StreamingTurn) {
        turn.close();
        let mut inner = self.lock();
        if let Some(entry) = inner.sessions.get_mut(turn.session_id()) {
            let current = entry.turn.as_ref().is_some_and(|t| t.seq() == turn.seq());
            if current && entry.info.state == SessionState::Processing {
                entry.turn = None;
                entry.info.state = SessionState::Active;
            }
        }
    }

    /// Cancel the active turn, if any: `Processing → Active`.
    ///
    /// Returns whether a turn was cancelled. Cancelling an idle session is a
    /// successful no-op.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ResourceNotFound`] for unknown or closed sessions.
    pub fn cancel_turn(&self, session_id: &str) -> Result<bool> {
        let mut inner = self.lock();
        let entry = live_entry(&mut inner, session_id)?;
        match entry.turn.take() {
            Some(turn) => {
                turn.cancel();
                entry.info.state = SessionState::Active;
                info!(session_id, turn = turn.seq(), "turn cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close a session, cancelling its active turn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ResourceNotFound`] for unknown or already closed
    /// sessions.
    pub fn close_session(&self, session_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let entry = live_entry(&mut inner, session_id)?;
        if let Some(turn) = entry.turn.take() {
            turn.cancel();
        }
        entry.info.state = SessionState::Closed;
        info!(session_id, "session closed");
        Ok(())
    }

    /// Tear the connection down: close every session and refuse further work.
    pub fn close_all(&self) {
        let mut inner = self.lock();
        inner.phase = ConnectionPhase::Closed;
        for entry in inner.sessions.values_mut() {
            if let Some(turn) = entry.turn.take() {
                turn.cancel();
            }
            entry.info.state = SessionState::Closed;
        }
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<SessionInfo> {
        self.lock().sessions.get(session_id).map(|e| e.info.clone())
    }

    /// Active turn of a session, if one is streaming.
    #[must_use]
    pub fn active_turn(&self, session_id: &str) -> Option<StreamingTurn> {
        self.lock()
            .sessions
            .get(session_id)
            .and_then(|e| e.turn.clone())
    }

    /// Ids of sessions that are not closed.
    #[must_use]
    pub fn live_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .sessions
            .values()
            .filter(|e| e.info.state != SessionState::Closed)
            .map(|e| e.info.session_id.clone())
            .collect();
        ids.sort();
        ids
    }
}

fn live_entry<'a>(inner: &'a mut Inner, session_id: &str) -> Result<&'a mut SessionEntry> {
    match inner.sessions.get_mut(session_id) {
        Some(entry) if entry.info.state != SessionState::Closed => Ok(entry),
        Some(_) => Err(AppError::ResourceNotFound(format!(
            "session {session_id} is closed"
        ))),
        None => Err(AppError::ResourceNotFound(format!(
            "unknown session {session_id}"
        ))),
    }
}
