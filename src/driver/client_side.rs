//! Client-role mediator.
//!
//! Serves the agent's `fs/*` and `terminal/*` callbacks through the
//! capability providers, routes `session/update` notifications to an
//! [`UpdateHandler`], and exposes the session methods as typed calls on
//! [`ClientSide`].
//!
//! The client keeps its own session table: a session is bound once the agent
//! confirms `session/new` (or a loaded `session/load`), and a prompt opens a
//! local turn that ends when the agent's response arrives. Updates are only
//! delivered while their session has an open turn, and tool-call updates
//! are checked against the tool calls announced during that turn.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acp::connection::{Connection, ConnectionOptions};
use crate::acp::dispatcher::Dispatcher;
use crate::acp::handler::{decode_params, handler_fn, NotificationSubscriber, RequestContext};
use crate::acp::handshake::{initialize_params, negotiate, version_compatible, EffectiveCapabilities};
use crate::acp::methods;
use crate::config::ClientConfig;
use crate::mode::Role;
use crate::models::capabilities::CapabilitySet;
use crate::models::content::ContentBlock;
use crate::models::messages::{
    AuthenticateParams, AuthenticateResult, CreateTerminalParams, CreateTerminalResult,
    InitializeResult, ReadTextFileParams, ReadTextFileResult, SessionLoadResult, SessionNewParams,
    SessionNewResult, SessionPromptParams, SessionPromptResult, SessionRef, StopReason,
    SuccessResult, TerminalOutputResult, TerminalRef, WaitForExitResult, WriteTextFileParams,
};
use crate::models::session_update::{Plan, SessionUpdate, SessionUpdateKind, ToolCall, ToolCallUpdate};
use crate::providers::fs::{FileSystem, LocalFileSystem};
use crate::providers::terminal::{ProcessTerminals, Terminals};
use crate::{AppError, Result};

/// Receives streamed `session/update` notifications.
///
/// Every method defaults to doing nothing. Calls happen inline on the
/// connection's read loop, in wire order, so implementations must not block.
pub trait UpdateHandler: Send + Sync {
    /// A chunk of the agent's answer.
    fn on_agent_message(&self, _session_id: &str, _text: &str) {}

    /// A chunk of the agent's reasoning.
    fn on_agent_thought(&self, _session_id: &str, _text: &str) {}

    /// A tool call was announced.
    fn on_tool_call(&self, _session_id: &str, _call: &ToolCall) {}

    /// An announced tool call progressed.
    fn on_tool_update(&self, _session_id: &str, _update: &ToolCallUpdate) {}

    /// The agent published its plan.
    fn on_plan(&self, _session_id: &str, _plan: &Plan) {}

    /// The agent switched modes.
    fn on_mode_change(&self, _session_id: &str, _mode: &str) {}

    /// The agent finished streaming output for the turn.
    fn on_done(&self, _session_id: &str) {}
}

/// [`UpdateHandler`] that ignores every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreUpdates;

impl UpdateHandler for IgnoreUpdates {}

struct UpdateRouter {
    handler: Arc<dyn UpdateHandler>,
}

impl NotificationSubscriber for UpdateRouter {
    fn notify(&self, connection: &Connection, params: Option<&serde_json::Value>) -> Result<()> {
        let update: SessionUpdate =
            decode_params(methods::SESSION_UPDATE, params.cloned())?;
        let session_id = update.session_id.as_str();

        let turn = connection.state().active_turn(session_id).ok_or_else(|| {
            AppError::InvalidState(format!(
                "session/update for session {session_id} without an active turn"
            ))
        })?;

        turn.emit(|tracker| {
            let h = &self.handler;
            match &update.kind {
                SessionUpdateKind::AgentMessageChunk { text } => h.on_agent_message(session_id, text),
                SessionUpdateKind::AgentThoughtChunk { text } => h.on_agent_thought(session_id, text),
                SessionUpdateKind::ToolCall(call) => {
                    tracker.announce(call)?;
                    h.on_tool_call(session_id, call);
                }
                SessionUpdateKind::ToolCallUpdate(tool_update) => {
                    tracker.apply(tool_update)?;
                    h.on_tool_update(session_id, tool_update);
                }
                SessionUpdateKind::Plan(plan) => h.on_plan(session_id, plan),
                SessionUpdateKind::ModeChange { mode } => h.on_mode_change(session_id, mode),
                SessionUpdateKind::Done => h.on_done(session_id),
            }
            Ok(())
        })
    }
}

// ── Providers ─────────────────────────────────────────────────────────────────

/// Capability providers served to the agent.
///
/// A capability is advertised only when its flag is set and a provider is
/// present.
#[derive(Clone, Default)]
pub struct ClientProviders {
    advertised: CapabilitySet,
    fs: Option<Arc<dyn FileSystem>>,
    terminals: Option<Arc<dyn Terminals>>,
}

impl std::fmt::Debug for ClientProviders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProviders")
            .field("capabilities", &self.capabilities())
            .finish_non_exhaustive()
    }
}

impl ClientProviders {
    /// No providers; `base` supplies the non-callback capability flags.
    #[must_use]
    pub fn new(base: CapabilitySet) -> Self {
        Self {
            advertised: base,
            fs: None,
            terminals: None,
        }
    }

    /// Serve `fs/*` through `fs`.
    #[must_use]
    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = Some(fs);
        self
    }

    /// Serve `terminal/*` through `terminals`.
    #[must_use]
    pub fn with_terminals(mut self, terminals: Arc<dyn Terminals>) -> Self {
        self.terminals = Some(terminals);
        self
    }

    /// Local providers configured from `[client]`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if `fs_root` cannot be resolved.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut providers = Self::new(config.capabilities());
        if config.text_files {
            let fs = match &config.fs_root {
                Some(root) => LocalFileSystem::confined_to(root)?,
                None => LocalFileSystem::new(),
            };
            providers = providers.with_fs(Arc::new(fs));
        }
        if config.terminal {
            providers = providers.with_terminals(Arc::new(ProcessTerminals::new(
                config.terminal_wait(),
                config.output_byte_limit,
            )));
        }
        Ok(providers)
    }

    /// Capability set advertised in `initialize`.
    #[must_use]
    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet {
            text_files: self.advertised.text_files && self.fs.is_some(),
            terminal: self.advertised.terminal && self.terminals.is_some(),
            ..self.advertised.clone()
        }
    }

    fn fs(&self) -> Result<Arc<dyn FileSystem>> {
        self.fs.clone().ok_or_else(|| {
            AppError::CapabilityNotSupported("no file system provider configured".into())
        })
    }

    fn terminals(&self) -> Result<Arc<dyn Terminals>> {
        self.terminals.clone().ok_or_else(|| {
            AppError::CapabilityNotSupported("no terminal provider configured".into())
        })
    }

    async fn read_text_file(&self, params: ReadTextFileParams) -> Result<ReadTextFileResult> {
        let content = self.fs()?.read_text_file(params).await?;
        Ok(ReadTextFileResult { content })
    }

    async fn write_text_file(&self, params: WriteTextFileParams) -> Result<SuccessResult> {
        self.fs()?.write_text_file(params).await?;
        Ok(SuccessResult { success: true })
    }

    async fn create_terminal(&self, params: CreateTerminalParams) -> Result<CreateTerminalResult> {
        let terminal_id = self.terminals()?.create(params).await?;
        Ok(CreateTerminalResult { terminal_id })
    }

    async fn terminal_output(&self, params: TerminalRef) -> Result<TerminalOutputResult> {
        self.terminals()?.output(params.terminal_id).await
    }

    async fn wait_for_exit(&self, params: TerminalRef) -> Result<WaitForExitResult> {
        self.terminals()?.wait_for_exit(params.terminal_id).await
    }

    async fn kill_terminal(&self, params: TerminalRef) -> Result<SuccessResult> {
        self.terminals()?.kill(params.terminal_id).await?;
        Ok(SuccessResult { success: true })
    }

    async fn release_terminal(&self, params: TerminalRef) -> Result<SuccessResult> {
        self.terminals()?.release(params.terminal_id).await?;
        Ok(SuccessResult { success: true })
    }
}

/// Build the client-role dispatcher.
///
/// Every callback is registered even without a provider, so a request for
/// a capability that was never negotiated is refused by the capability gate
/// rather than reported as an unknown method.
///
/// # Errors
///
/// Returns [`AppError::Config`] if a registration does not match the client
/// role profile.
pub fn dispatcher(providers: &ClientProviders, updates: Arc<dyn UpdateHandler>) -> Result<Dispatcher> {
    let mut dispatcher = Dispatcher::new(Role::Client);

    let p = providers.clone();
    dispatcher.register(
        methods::FS_READ_TEXT_FILE,
        handler_fn(move |_ctx: RequestContext, params: ReadTextFileParams| {
            let p = p.clone();
            async move { p.read_text_file(params).await }
        }),
    )?;

    let p = providers.clone();
    dispatcher.register(
        methods::FS_WRITE_TEXT_FILE,
        handler_fn(move |_ctx: RequestContext, params: WriteTextFileParams| {
            let p = p.clone();
            async move { p.write_text_file(params).await }
        }),
    )?;

    let p = providers.clone();
    dispatcher.register(
        methods::TERMINAL_CREATE,
        handler_fn(move |_ctx: RequestContext, params: CreateTerminalParams| {
            let p = p.clone();
            async move { p.create_terminal(params).await }
        }),
    )?;

    let p = providers.clone();
    dispatcher.register(
        methods::TERMINAL_OUTPUT,
        handler_fn(move |_ctx: RequestContext, params: TerminalRef| {
            let p = p.clone();
            async move { p.terminal_output(params).await }
        }),
    )?;

    let p = providers.clone();
    dispatcher.register(
        methods::TERMINAL_WAIT_FOR_EXIT,
        handler_fn(move |_ctx: RequestContext, params: TerminalRef| {
            let p = p.clone();
            async move { p.wait_for_exit(params).await }
        }),
    )?;

    let p = providers.clone();
    dispatcher.register(
        methods::TERMINAL_KILL,
        handler_fn(move |_ctx: RequestContext, params: TerminalRef| {
            let p = p.clone();
            async move { p.kill_terminal(params).await }
        }),
    )?;

    let p = providers.clone();
    dispatcher.register(
        methods::TERMINAL_RELEASE,
        handler_fn(move |_ctx: RequestContext, params: TerminalRef| {
            let p = p.clone();
            async move { p.release_terminal(params).await }
        }),
    )?;

    dispatcher.subscribe(
        methods::SESSION_UPDATE,
        Arc::new(UpdateRouter { handler: updates }),
    )?;

    Ok(dispatcher)
}

// ── ClientSide ────────────────────────────────────────────────────────────────

/// Client end of a running connection.
#[derive(Debug, Clone)]
pub struct ClientSide {
    connection: Connection,
    advertised: CapabilitySet,
}

impl ClientSide {
    /// Start a client connection over a pair of byte streams.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the dispatcher cannot be built.
    pub fn connect<R, W>(
        providers: &ClientProviders,
        updates: Arc<dyn UpdateHandler>,
        source: R,
        sink: W,
        options: ConnectionOptions,
    ) -> Result<(Self, JoinHandle<Result<()>>)>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let dispatcher = dispatcher(providers, updates)?;
        let (connection, driver) = Connection::start(dispatcher, source, sink, options);
        Ok((
            Self {
                connection,
                advertised: providers.capabilities(),
            },
            driver,
        ))
    }

    /// Fresh random session id.
    #[must_use]
    pub fn new_session_id() -> String {
        format!("sess_{}", Uuid::new_v4().simple())
    }

    /// Underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Negotiated capabilities, once initialized.
    #[must_use]
    pub fn capabilities(&self) -> Option<&EffectiveCapabilities> {
        self.connection.state().capabilities()
    }

    /// Perform the `initialize` handshake and store the effective
    /// capabilities.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] if already initialized or in progress, or
    ///   if the agent speaks an incompatible protocol version.
    /// - Whatever the agent answers.
    pub async fn initialize(&self, working_directory: Option<String>) -> Result<InitializeResult> {
        let state = self.connection.state();
        state.begin_initialize()?;

        let params = initialize_params(self.advertised.clone(), working_directory);
        let outcome = self
            .connection
            .request::<_, InitializeResult>(methods::INITIALIZE, &params)
            .await
            .and_then(|result| {
                if version_compatible(&result.protocol_version) {
                    Ok(result)
                } else {
                    Err(AppError::InvalidState(format!(
                        "agent speaks incompatible protocol version {}",
                        result.protocol_version
                    )))
                }
            });

        match outcome {
            Ok(result) => {
                let effective = negotiate(&self.advertised, &result.capabilities.set);
                info!(
                    agent = result.agent_info.name,
                    effective = ?effective.as_set(),
                    "client: capabilities negotiated"
                );
                state.complete_initialize(effective)?;
                Ok(result)
            }
            Err(err) => {
                state.abort_initialize();
                Err(err)
            }
        }
    }

    /// Authenticate with the agent.
    ///
    /// # Errors
    ///
    /// Whatever the agent answers, or a transport error.
    pub async fn authenticate(
        &self,
        auth_type: impl Into<String>,
        token: Option<String>,
    ) -> Result<bool> {
        let params = AuthenticateParams {
            auth_type: auth_type.into(),
            token,
        };
        let result: AuthenticateResult = self.connection.request(methods::AUTHENTICATE, &params).await?;
        Ok(result.success)
    }

    /// Create a session with a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Whatever the agent answers, or a transport error.
    pub async fn session_new(
        &self,
        session_id: impl Into<String>,
        mode: Option<String>,
    ) -> Result<String> {
        let params = SessionNewParams {
            session_id: session_id.into(),
            mode: mode.clone(),
            mcp_servers: Vec::new(),
        };
        let result: SessionNewResult = self.connection.request(methods::SESSION_NEW, &params).await?;
        self.connection
            .state()
            .open_session(&result.session_id, mode)?;
        Ok(result.session_id)
    }

    /// Ask the agent to restore a session. Binds it locally when loaded.
    ///
    /// # Errors
    ///
    /// Whatever the agent answers, or a transport error.
    pub async fn session_load(&self, session_id: impl Into<String>) -> Result<bool> {
        let params = SessionRef {
            session_id: session_id.into(),
        };
        let result: SessionLoadResult = self.connection.request(methods::SESSION_LOAD, &params).await?;
        if result.loaded {
            self.connection.state().open_session(&result.session_id, None)?;
        }
        Ok(result.loaded)
    }

    /// Send a prompt and wait for the turn to end.
    ///
    /// Updates of the turn reach the [`UpdateHandler`] before this returns.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] if this client already has a turn open on
    ///   the session.
    /// - [`AppError::ResourceNotFound`] for a session this client never bound.
    /// - [`AppError::Timeout`] after the request timeout; the agent's turn is
    ///   cancelled with a `session/cancel` notification first.
    /// - Whatever the agent answers, or a transport error.
    pub async fn session_prompt(
        &self,
        session_id: &str,
        content: Vec<ContentBlock>,
    ) -> Result<StopReason> {
        let state = self.connection.state();
        let turn = state.begin_turn(session_id)?;
        let params = SessionPromptParams {
            session_id: session_id.to_owned(),
            content,
        };
        let outcome: Result<SessionPromptResult> =
            self.connection.request(methods::SESSION_PROMPT, &params).await;
        if let Err(AppError::Timeout(_)) = &outcome {
            // The agent's turn is still open; close it so both sides agree.
            warn!(session_id, "client: prompt timed out, cancelling the turn");
            if let Err(err) = self.notify_cancel(session_id) {
                debug!(session_id, %err, "client: cancel after timeout not sent");
            }
        }
        state.end_turn(&turn);
        let stop_reason = outcome?.stop_reason;
        debug!(session_id, ?stop_reason, "client: turn ended");
        Ok(stop_reason)
    }

    /// Cancel the session's active turn and wait for the acknowledgement.
    ///
    /// # Errors
    ///
    /// Whatever the agent answers, or a transport error.
    pub async fn session_cancel(&self, session_id: &str) -> Result<()> {
        let params = SessionRef {
            session_id: session_id.to_owned(),
        };
        let _: serde_json::Value = self.connection.request(methods::SESSION_CANCEL, &params).await?;
        self.connection.state().cancel_turn(session_id)?;
        Ok(())
    }

    /// Cancel the session's active turn without waiting for an answer.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConnectionClosed`] after teardown.
    pub fn notify_cancel(&self, session_id: &str) -> Result<()> {
        let params = SessionRef {
            session_id: session_id.to_owned(),
        };
        self.connection.notify(methods::SESSION_CANCEL, &params)
    }

    /// Close a session on both sides.
    ///
    /// # Errors
    ///
    /// Whatever the agent answers, or a transport error.
    pub async fn session_close(&self, session_id: &str) -> Result<()> {
        let params = SessionRef {
            session_id: session_id.to_owned(),
        };
        let _: serde_json::Value = self.connection.request(methods::SESSION_CLOSE, &params).await?;
        self.connection.state().close_session(session_id)?;
        Ok(())
    }

    /// Tear the connection down.
    pub fn close(&self) {
        self.connection.close();
    }
}
