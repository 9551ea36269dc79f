//! Agent-role mediator.
//!
//! Wraps an [`Agent`] implementation in a [`Dispatcher`] serving the agent
//! methods. The mediator owns the protocol policy (phase transitions,
//! capability negotiation, turn bookkeeping, cancellation); the agent only
//! produces answers and streams updates through its [`TurnContext`].
//!
//! # Prompt turn
//!
//! 1. `session/prompt` moves the session to `Processing` and opens a
//!    [`StreamingTurn`].
//! 2. The agent's prompt future races the turn's cancellation token.
//! 3. Whichever finishes first decides the stop reason; the turn is ended
//!    before the response is queued, so every update of the turn precedes
//!    the response on the wire.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::acp::connection::{Connection, ConnectionOptions};
use crate::acp::dispatcher::Dispatcher;
use crate::acp::handler::{handler_fn, ordered_handler_fn, subscriber_fn, RequestContext};
use crate::acp::handshake::{negotiate, version_compatible};
use crate::acp::methods;
use crate::mode::Role;
use crate::models::messages::{
    AuthenticateParams, AuthenticateResult, CreateTerminalParams, CreateTerminalResult,
    InitializeParams, InitializeResult, ReadTextFileParams, ReadTextFileResult, SessionLoadResult,
    SessionNewParams, SessionNewResult, SessionPromptParams, SessionPromptResult, SessionRef,
    StopReason, SuccessResult, TerminalOutputResult, TerminalRef, WaitForExitResult,
    WriteTextFileParams,
};
use crate::models::session_update::{Plan, SessionUpdate, SessionUpdateKind, ToolCall, ToolCallUpdate};
use crate::session::StreamingTurn;
use crate::{AppError, Result};

/// Boxed future returned by [`Agent`] methods.
pub type AgentFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Behaviour of an agent served over ACP.
///
/// Only `initialize` and `session_prompt` are required; the remaining hooks
/// default to accepting the request.
pub trait Agent: Send + Sync + 'static {
    /// Answer `initialize` with the agent's identity and capabilities.
    fn initialize(&self, params: InitializeParams) -> AgentFuture<'_, InitializeResult>;

    /// Authenticate the client. Accepts everything by default.
    fn authenticate(&self, params: AuthenticateParams) -> AgentFuture<'_, AuthenticateResult> {
        debug!(auth_type = params.auth_type, "agent: default authenticate");
        Box::pin(async { Ok(AuthenticateResult { success: true }) })
    }

    /// Prepare a new session. The id is already bound when this runs.
    fn session_new(&self, params: SessionNewParams) -> AgentFuture<'_, ()> {
        debug!(session_id = params.session_id, "agent: default session_new");
        Box::pin(async { Ok(()) })
    }

    /// Restore a persisted session. Returns whether it was found.
    fn session_load(&self, params: SessionRef) -> AgentFuture<'_, bool> {
        debug!(session_id = params.session_id, "agent: session_load unsupported");
        Box::pin(async { Ok(false) })
    }

    /// Process one prompt turn, streaming updates through `turn`.
    fn session_prompt(
        &self,
        params: SessionPromptParams,
        turn: TurnContext,
    ) -> AgentFuture<'_, StopReason>;

    /// Observe a cancelled turn. The mediator has already stopped it.
    fn session_cancel(&self, session_id: &str) {
        debug!(session_id, "agent: turn cancelled");
    }
}

// ── Turn context ──────────────────────────────────────────────────────────────

/// Everything a prompt handler needs while its turn streams.
#[derive(Debug, Clone)]
pub struct TurnContext {
    turn: StreamingTurn,
    updates: UpdateEmitter,
    client: ClientProxy,
}

impl TurnContext {
    /// Context for `turn` on `connection`.
    #[must_use]
    pub fn new(connection: Connection, turn: StreamingTurn) -> Self {
        Self {
            updates: UpdateEmitter {
                connection: connection.clone(),
                turn: turn.clone(),
            },
            client: ClientProxy::new(connection),
            turn,
        }
    }

    /// Session being prompted.
    #[must_use]
    pub fn session_id(&self) -> &str {
        self.turn.session_id()
    }

    /// Token cancelled when the turn is cancelled or the connection closes.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        self.turn.token()
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.turn.is_cancelled()
    }

    /// Emitter for `session/update` notifications of this turn.
    #[must_use]
    pub fn updates(&self) -> &UpdateEmitter {
        &self.updates
    }

    /// Typed access to the client's `fs/*` and `terminal/*` methods.
    #[must_use]
    pub fn client(&self) -> &ClientProxy {
        &self.client
    }
}

/// Emits `session/update` notifications for one turn.
///
/// Every emission goes through [`StreamingTurn::emit`]: once the turn is
/// cancelled or ended, emission fails with [`AppError::InvalidState`] and
/// nothing reaches the wire.
#[derive(Debug, Clone)]
pub struct UpdateEmitter {
    connection: Connection,
    turn: StreamingTurn,
}

impl UpdateEmitter {
    /// Emit one update.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidState`] after cancellation or turn end.
    /// - [`AppError::InvalidParams`] for a duplicate `tool_call` id or a
    ///   `tool_call_update` naming an unannounced id.
    /// - [`AppError::ConnectionClosed`] after teardown.
    pub fn send(&self, kind: SessionUpdateKind) -> Result<()> {
        trace!(session_id = self.turn.session_id(), kind = kind.name(), "agent: emitting update");
        self.turn.emit(|tracker| {
            match &kind {
                SessionUpdateKind::ToolCall(call) => tracker.announce(call)?,
                SessionUpdateKind::ToolCallUpdate(update) => {
                    tracker.apply(update)?;
                }
                _ => {}
            }
            let update = SessionUpdate {
                session_id: self.turn.session_id().to_owned(),
                kind,
            };
            self.connection.notify(methods::SESSION_UPDATE, &update)
        })
    }

    /// Stream a chunk of the agent's answer.
    ///
    /// # Errors
    ///
    /// See [`UpdateEmitter::send`].
    pub fn message_chunk(&self, text: impl Into<String>) -> Result<()> {
        self.send(SessionUpdateKind::AgentMessageChunk { text: text.into() })
    }

    /// Stream a chunk of the agent's reasoning.
    ///
    /// # Errors
    ///
    /// See [`UpdateEmitter::send`].
    pub fn thought_chunk(&self, text: impl Into<String>) -> Result<()> {
        self.send(SessionUpdateKind::AgentThoughtChunk { text: text.into() })
    }

    /// Announce a tool call.
    ///
    /// # Errors
    ///
    /// See [`UpdateEmitter::send`].
    pub fn tool_call(&self, call: ToolCall) -> Result<()> {
        self.send(SessionUpdateKind::ToolCall(call))
    }

    /// Report progress of an announced tool call.
    ///
    /// # Errors
    ///
    /// See [`UpdateEmitter::send`].
    pub fn tool_call_update(&self, update: ToolCallUpdate) -> Result<()> {
        self.send(SessionUpdateKind::ToolCallUpdate(update))
    }

    /// Publish the execution plan.
    ///
    /// # Errors
    ///
    /// See [`UpdateEmitter::send`].
    pub fn plan(&self, plan: Plan) -> Result<()> {
        self.send(SessionUpdateKind::Plan(plan))
    }

    /// Announce a mode switch.
    ///
    /// # Errors
    ///
    /// See [`UpdateEmitter::send`].
    pub fn mode_change(&self, mode: impl Into<String>) -> Result<()> {
        self.send(SessionUpdateKind::ModeChange { mode: mode.into() })
    }

    /// Signal the end of streamed output.
    ///
    /// # Errors
    ///
    /// See [`UpdateEmitter::send`].
    pub fn done(&self) -> Result<()> {
        self.send(SessionUpdateKind::Done)
    }
}

/// Typed client callbacks available to the agent.
///
/// Requests are subject to the negotiated capabilities: a method whose
/// capability is not effective fails locally with
/// [`AppError::CapabilityNotSupported`] and is never sent.
#[derive(Debug, Clone)]
pub struct ClientProxy {
    connection: Connection,
}

impl ClientProxy {
    /// Proxy issuing requests on `connection`.
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.connection.request(method, params).await
    }

    /// Read a text file, optionally a window of lines.
    ///
    /// # Errors
    ///
    /// Whatever the client answers, or a local capability/transport error.
    pub async fn read_text_file(&self, params: ReadTextFileParams) -> Result<String> {
        let result: ReadTextFileResult = self.call(methods::FS_READ_TEXT_FILE, &params).await?;
        Ok(result.content)
    }

    /// Replace a text file's content.
    ///
    /// # Errors
    ///
    /// Whatever the client answers, or a local capability/transport error.
    pub async fn write_text_file(
        &self,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<()> {
        let params = WriteTextFileParams {
            path: path.into(),
            content: content.into(),
        };
        let _: SuccessResult = self.call(methods::FS_WRITE_TEXT_FILE, &params).await?;
        Ok(())
    }

    /// Start a command in a client terminal.
    ///
    /// # Errors
    ///
    /// Whatever the client answers, or a local capability/transport error.
    pub async fn create_terminal(&self, params: CreateTerminalParams) -> Result<String> {
        let result: CreateTerminalResult = self.call(methods::TERMINAL_CREATE, &params).await?;
        Ok(result.terminal_id)
    }

    /// Output captured so far.
    ///
    /// # Errors
    ///
    /// Whatever the client answers, or a local capability/transport error.
    pub async fn terminal_output(&self, terminal_id: &str) -> Result<TerminalOutputResult> {
        self.call(methods::TERMINAL_OUTPUT, &terminal_ref(terminal_id))
            .await
    }

    /// Wait for a terminal's command to exit, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`AppError::Timeout`] after `timeout`, otherwise as the other calls.
    pub async fn wait_for_exit(
        &self,
        terminal_id: &str,
        timeout: Duration,
    ) -> Result<WaitForExitResult> {
        let params = serde_json::to_value(terminal_ref(terminal_id)).map_err(|e| {
            AppError::Internal(format!("{}: cannot encode params: {e}", methods::TERMINAL_WAIT_FOR_EXIT))
        })?;
        let value = self
            .connection
            .request_value_with_timeout(methods::TERMINAL_WAIT_FOR_EXIT, params, timeout)
            .await?;
        serde_json::from_value(value).map_err(|e| {
            AppError::Internal(format!("{}: malformed result: {e}", methods::TERMINAL_WAIT_FOR_EXIT))
        })
    }

    /// Kill a terminal's command, keeping its output addressable.
    ///
    /// # Errors
    ///
    /// Whatever the client answers, or a local capability/transport error.
    pub async fn kill_terminal(&self, terminal_id: &str) -> Result<()> {
        let _: SuccessResult = self
            .call(methods::TERMINAL_KILL, &terminal_ref(terminal_id))
            .await?;
        Ok(())
    }

    /// Release a terminal, killing it if still running.
    ///
    /// # Errors
    ///
    /// Whatever the client answers, or a local capability/transport error.
    pub async fn release_terminal(&self, terminal_id: &str) -> Result<()> {
        let _: SuccessResult = self
            .call(methods::TERMINAL_RELEASE, &terminal_ref(terminal_id))
            .await?;
        Ok(())
    }
}

fn terminal_ref(terminal_id: &str) -> TerminalRef {
    TerminalRef {
        terminal_id: terminal_id.to_owned(),
    }
}

// ── Mediator ──────────────────────────────────────────────────────────────────

/// Build the agent-role dispatcher for `agent`.
///
/// # Errors
///
/// Returns [`AppError::Config`] if a registration does not match the agent
/// role profile.
pub fn dispatcher(agent: Arc<dyn Agent>) -> Result<Dispatcher> {
    let mut dispatcher = Dispatcher::new(Role::Agent);

    let a = Arc::clone(&agent);
    dispatcher.register(
        methods::INITIALIZE,
        handler_fn(move |ctx: RequestContext, params: InitializeParams| {
            let agent = Arc::clone(&a);
            async move { initialize(agent.as_ref(), &ctx.connection, params).await }
        }),
    )?;

    let a = Arc::clone(&agent);
    dispatcher.register(
        methods::AUTHENTICATE,
        handler_fn(move |_ctx: RequestContext, params: AuthenticateParams| {
            let agent = Arc::clone(&a);
            async move { agent.authenticate(params).await }
        }),
    )?;

    let a = Arc::clone(&agent);
    dispatcher.register(
        methods::SESSION_NEW,
        ordered_handler_fn(
            |ctx: &mut RequestContext, params: &SessionNewParams| {
                ctx.connection
                    .state()
                    .open_session(&params.session_id, params.mode.clone())
                    .map(drop)
            },
            move |ctx: RequestContext, params: SessionNewParams| {
                let agent = Arc::clone(&a);
                async move { session_new(agent.as_ref(), &ctx.connection, params).await }
            },
        ),
    )?;

    let a = Arc::clone(&agent);
    dispatcher.register(
        methods::SESSION_LOAD,
        handler_fn(move |ctx: RequestContext, params: SessionRef| {
            let agent = Arc::clone(&a);
            async move { session_load(agent.as_ref(), &ctx.connection, params).await }
        }),
    )?;

    let a = Arc::clone(&agent);
    dispatcher.register(
        methods::SESSION_PROMPT,
        ordered_handler_fn(
            |ctx: &mut RequestContext, params: &SessionPromptParams| {
                ctx.turn = Some(ctx.connection.state().begin_turn(&params.session_id)?);
                Ok(())
            },
            move |ctx: RequestContext, params: SessionPromptParams| {
                let agent = Arc::clone(&a);
                async move { session_prompt(agent.as_ref(), ctx, params).await }
            },
        ),
    )?;

    let a = Arc::clone(&agent);
    dispatcher.register(
        methods::SESSION_CANCEL,
        ordered_handler_fn(
            move |ctx: &mut RequestContext, params: &SessionRef| {
                cancel(a.as_ref(), &ctx.connection, &params.session_id)
            },
            |_ctx: RequestContext, _params: SessionRef| async { Ok::<(), AppError>(()) },
        ),
    )?;

    let a = Arc::clone(&agent);
    dispatcher.subscribe(
        methods::SESSION_CANCEL,
        subscriber_fn(methods::SESSION_CANCEL, move |conn: &Connection, params: SessionRef| {
            cancel(a.as_ref(), conn, &params.session_id)
        }),
    )?;

    let a = agent;
    dispatcher.register(
        methods::SESSION_CLOSE,
        ordered_handler_fn(
            move |ctx: &mut RequestContext, params: &SessionRef| {
                session_close(a.as_ref(), &ctx.connection, &params.session_id)
            },
            |_ctx: RequestContext, _params: SessionRef| async { Ok::<(), AppError>(()) },
        ),
    )?;

    Ok(dispatcher)
}

async fn initialize(
    agent: &dyn Agent,
    connection: &Connection,
    params: InitializeParams,
) -> Result<InitializeResult> {
    let state = connection.state();
    state.begin_initialize()?;

    if !version_compatible(&params.protocol_version) {
        state.abort_initialize();
        return Err(AppError::InvalidParams(format!(
            "unsupported protocol version {}",
            params.protocol_version
        )));
    }

    let client_capabilities = params.capabilities.clone();
    let client = params.client_info.name.clone();
    match agent.initialize(params).await {
        Ok(result) => {
            let effective = negotiate(&result.capabilities.set, &client_capabilities);
            info!(client, effective = ?effective.as_set(), "agent: capabilities negotiated");
            state.complete_initialize(effective)?;
            Ok(result)
        }
        Err(err) => {
            state.abort_initialize();
            Err(err)
        }
    }
}

/// Runs after admission bound the id.
async fn session_new(
    agent: &dyn Agent,
    connection: &Connection,
    params: SessionNewParams,
) -> Result<SessionNewResult> {
    let session_id = params.session_id.clone();
    if let Err(err) = agent.session_new(params).await {
        // The id is burnt: a closed id can never be bound again.
        let _ = connection.state().close_session(&session_id);
        return Err(err);
    }
    Ok(SessionNewResult { session_id })
}

async fn session_load(
    agent: &dyn Agent,
    connection: &Connection,
    params: SessionRef,
) -> Result<SessionLoadResult> {
    let session_id = params.session_id.clone();
    if connection.state().session(&session_id).is_some() {
        return Err(AppError::InvalidState(format!(
            "session {session_id} is already known on this connection"
        )));
    }
    let loaded = agent.session_load(params).await?;
    if loaded {
        connection.state().open_session(&session_id, None)?;
    }
    Ok(SessionLoadResult { session_id, loaded })
}

/// Runs the turn opened at admission. A cancel that arrived in between has
/// already fired the token, so the agent is never polled.
async fn session_prompt(
    agent: &dyn Agent,
    request: RequestContext,
    params: SessionPromptParams,
) -> Result<SessionPromptResult> {
    let RequestContext {
        connection, turn, ..
    } = request;
    let turn = turn.ok_or_else(|| {
        AppError::Internal(format!("prompt for {} admitted without a turn", params.session_id))
    })?;
    let state = connection.state();
    let token = turn.token().clone();
    let ctx = TurnContext::new(connection.clone(), turn.clone());
    debug!(session_id = turn.session_id(), turn = turn.seq(), "agent: turn started");

    let outcome = tokio::select! {
        biased;
        () = token.cancelled() => Ok(StopReason::Cancelled),
        result = agent.session_prompt(params, ctx) => result,
    };
    state.end_turn(&turn);

    let stop_reason = if turn.is_cancelled() {
        if let Err(err) = outcome {
            debug!(%err, "agent: prompt error after cancellation ignored");
        }
        StopReason::Cancelled
    } else {
        outcome?
    };
    debug!(session_id = turn.session_id(), turn = turn.seq(), ?stop_reason, "agent: turn ended");
    Ok(SessionPromptResult { stop_reason })
}

fn session_close(agent: &dyn Agent, connection: &Connection, session_id: &str) -> Result<()> {
    let state = connection.state();
    let had_turn = state.active_turn(session_id).is_some();
    state.close_session(session_id)?;
    if had_turn {
        agent.session_cancel(session_id);
    }
    Ok(())
}

fn cancel(agent: &dyn Agent, connection: &Connection, session_id: &str) -> Result<()> {
    if connection.state().cancel_turn(session_id)? {
        agent.session_cancel(session_id);
    }
    Ok(())
}

// ── Serving ───────────────────────────────────────────────────────────────────

/// Serve `agent` over a pair of byte streams.
///
/// # Errors
///
/// Returns [`AppError::Config`] if the dispatcher cannot be built.
pub fn serve<R, W>(
    agent: Arc<dyn Agent>,
    source: R,
    sink: W,
    options: ConnectionOptions,
) -> Result<(Connection, JoinHandle<Result<()>>)>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let dispatcher = dispatcher(agent)?;
    Ok(Connection::start(dispatcher, source, sink, options))
}

/// Serve `agent` over this process's stdin and stdout until the client
/// disconnects or `shutdown` fires.
///
/// # Errors
///
/// Returns the fault that ended the connection, if any.
pub async fn serve_stdio(
    agent: Arc<dyn Agent>,
    options: ConnectionOptions,
    shutdown: CancellationToken,
) -> Result<()> {
    let (connection, mut driver) = serve(agent, tokio::io::stdin(), tokio::io::stdout(), options)?;
    let finished = tokio::select! {
        outcome = &mut driver => Some(outcome),
        () = shutdown.cancelled() => None,
    };
    let outcome = match finished {
        Some(outcome) => outcome,
        None => {
            info!("agent: shutdown requested, closing connection");
            connection.close();
            driver.await
        }
    };
    outcome.map_err(|e| AppError::Internal(format!("connection task failed: {e}")))?
}
