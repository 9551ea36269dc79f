//! One ACP connection over a pair of byte streams.
//!
//! [`Connection::start`] wires the engine together:
//!
//! ```text
//! reader ─▶ FramedRead<AcpCodec> ─▶ Message ─▶ Dispatcher ─▶ registry / subscribers / handlers
//!                                                                     │
//! writer ◀─ FramedWrite<AcpCodec> ◀─ writer task ◀─ mpsc ◀────────────┘
//! ```
//!
//! The returned [`Connection`] is a cheap clonable handle shared by the
//! read loop, every handler task, and the application. Request ids, the
//! pending-request registry and the session table all live inside it, so
//! independent connections never share state.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::acp::codec::MAX_LINE_BYTES;
use crate::acp::dispatcher::Dispatcher;
use crate::acp::envelope::Message;
use crate::acp::reader::run_reader;
use crate::acp::registry::CorrelationRegistry;
use crate::acp::writer::run_writer;
use crate::config::ConnectionConfig;
use crate::mode::{Role, RoleProfile};
use crate::session::ConnectionState;
use crate::{AppError, Result};

/// Runtime limits of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Largest inbound record accepted, in bytes.
    pub max_line_bytes: usize,
    /// Deadline for every outbound request.
    pub request_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_line_bytes: MAX_LINE_BYTES,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&ConnectionConfig> for ConnectionOptions {
    fn from(settings: &ConnectionConfig) -> Self {
        Self {
            max_line_bytes: settings.max_line_bytes,
            request_timeout: Duration::from_secs(settings.request_timeout_seconds),
        }
    }
}

#[derive(Debug)]
struct ConnectionInner {
    profile: RoleProfile,
    config: ConnectionOptions,
    outbound: mpsc::UnboundedSender<Message>,
    registry: CorrelationRegistry,
    state: ConnectionState,
    shutdown: CancellationToken,
}

/// Handle on a running connection.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Start the read loop and writer task for `dispatcher`'s role.
    ///
    /// The returned task completes when the connection is torn down; it
    /// yields the fault that ended the read loop, or `Ok(())` on a clean
    /// end-of-stream or local close.
    pub fn start<R, W>(
        dispatcher: Dispatcher,
        source: R,
        sink: W,
        config: ConnectionOptions,
    ) -> (Self, JoinHandle<Result<()>>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let role = dispatcher.role();
        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Self {
            inner: Arc::new(ConnectionInner {
                profile: role.profile(),
                config,
                outbound: tx,
                registry: CorrelationRegistry::new(),
                state: ConnectionState::new(shutdown.clone()),
                shutdown: shutdown.clone(),
            }),
        };

        let writer_conn = connection.clone();
        let writer = tokio::spawn(async move {
            let outcome = run_writer(role.as_str(), sink, rx, shutdown).await;
            if let Err(ref err) = outcome {
                writer_conn.teardown(&format!("write failed: {err}"));
            }
            outcome
        });

        let dispatcher = Arc::new(dispatcher);
        let reader_conn = connection.clone();
        let span = info_span!("acp_connection", role = role.as_str());
        let driver = tokio::spawn(
            async move {
                let read_outcome = run_reader(reader_conn.clone(), dispatcher, source).await;
                reader_conn.teardown("connection closed");
                let write_outcome = writer
                    .await
                    .map_err(|e| AppError::Internal(format!("writer task failed: {e}")))?;
                info!("connection finished");
                read_outcome.and(write_outcome)
            }
            .instrument(span),
        );

        (connection, driver)
    }

    /// Role of this side of the connection.
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.profile.role
    }

    /// Protocol state (phase, capabilities, sessions).
    #[must_use]
    pub fn state(&self) -> &ConnectionState {
        &self.inner.state
    }

    /// Outbound request registry.
    #[must_use]
    pub fn registry(&self) -> &CorrelationRegistry {
        &self.inner.registry
    }

    /// Runtime limits.
    #[must_use]
    pub fn config(&self) -> &ConnectionOptions {
        &self.inner.config
    }

    /// Whether the connection has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Resolves once the connection has been torn down.
    pub async fn closed(&self) {
        self.inner.shutdown.cancelled().await;
    }

    /// Queue a message for the writer task.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConnectionClosed`] after teardown.
    pub fn send(&self, message: Message) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::ConnectionClosed("connection is closed".into()));
        }
        self.inner
            .outbound
            .send(message)
            .map_err(|_| AppError::ConnectionClosed("writer has stopped".into()))
    }

    /// Send a notification this role is allowed to issue.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidRequest`] for a notification the role does
    /// not issue, or [`AppError::ConnectionClosed`].
    pub fn notify<P: Serialize>(&self, method: &str, params: &P) -> Result<()> {
        if !self.inner.profile.issues_notification(method) {
            return Err(AppError::InvalidRequest(format!(
                "the {} role does not send {method} notifications",
                self.role().as_str()
            )));
        }
        let params = serde_json::to_value(params)
            .map_err(|e| AppError::Internal(format!("{method}: cannot encode params: {e}")))?;
        self.send(Message::notification(method, Some(params)))
    }

    /// Issue a request and wait for its raw result.
    ///
    /// The capability gate is checked locally before anything is sent.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidRequest`] for a method the role does not issue.
    /// - [`AppError::CapabilityNotSupported`] when the gate is closed.
    /// - [`AppError::Timeout`] after `timeout`.
    /// - [`AppError::ConnectionClosed`] on teardown.
    /// - The typed error carried by an error response.
    pub async fn request_value_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if !self.inner.profile.issues_request(method) {
            return Err(AppError::InvalidRequest(format!(
                "the {} role does not issue {method}",
                self.role().as_str()
            )));
        }
        if method != crate::acp::methods::INITIALIZE {
            self.state().check_capability(method)?;
        }

        let (id, pending) = self.inner.registry.register(method);
        debug!(method, request_id = %id, "sending request");
        self.send(Message::request(id, method, Some(params)))?;
        pending.wait(timeout).await
    }

    /// Issue a request with the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`Connection::request_value_with_timeout`].
    pub async fn request_value(&self, method: &str, params: Value) -> Result<Value> {
        self.request_value_with_timeout(method, params, self.inner.config.request_timeout)
            .await
    }

    /// Issue a typed request with the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`Connection::request_value_with_timeout`]; additionally
    /// [`AppError::Internal`] when the result does not decode as `R`.
    pub async fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|e| AppError::Internal(format!("{method}: cannot encode params: {e}")))?;
        let value = self.request_value(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| AppError::Internal(format!("{method}: malformed result: {e}")))
    }

    /// Tear the connection down locally.
    pub fn close(&self) {
        self.teardown("closed locally");
    }

    /// Close every session, fail every pending request, stop both tasks.
    pub(crate) fn teardown(&self, reason: &str) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.state.close_all();
        let cancelled = self.inner.registry.cancel_all(reason);
        self.inner.shutdown.cancel();
        info!(
            role = self.role().as_str(),
            reason,
            cancelled_requests = cancelled,
            "connection torn down"
        );
    }
}
