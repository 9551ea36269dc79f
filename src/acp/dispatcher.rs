//! Inbound message router.
//!
//! [`Dispatcher::dispatch`] is the single routing function, called by the
//! read loop once per decoded message, in wire order:
//!
//! | Kind           | Route                                                   |
//! |----------------|---------------------------------------------------------|
//! | Response       | [`CorrelationRegistry::resolve`](crate::acp::registry::CorrelationRegistry::resolve) |
//! | Notification   | every subscriber for the method, inline                 |
//! | Request        | inline admission, then a spawned task for the handler  |
//!
//! Admission (lookup, gating, the handler's `admit` step) runs in the read
//! loop, so a `session/cancel` right behind a `session/prompt` always finds
//! the turn. Handler bodies never run on the read loop, so a handler that
//! waits on the peer (an agent reading a client file mid-turn) cannot stall
//! the connection.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};

use crate::acp::connection::Connection;
use crate::acp::envelope::{Message, Notification, Request, Response};
use crate::acp::handler::{MethodHandler, NotificationSubscriber, RequestContext};
use crate::mode::{Role, RoleProfile};
use crate::{AppError, Result};

/// A request that passed admission and waits for its handler to run.
pub struct AdmittedRequest {
    handler: Arc<dyn MethodHandler>,
    ctx: RequestContext,
    params: Option<Value>,
}

impl std::fmt::Debug for AdmittedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmittedRequest")
            .field("method", &self.ctx.method)
            .field("request_id", &self.ctx.request_id)
            .finish_non_exhaustive()
    }
}

impl AdmittedRequest {
    /// Run the handler; its value, error or panic becomes the response.
    pub async fn run(self) -> Response {
        let Self {
            handler,
            ctx,
            params,
        } = self;
        let id = ctx.request_id.clone();
        let method = ctx.method.clone();
        match AssertUnwindSafe(handler.call(ctx, params))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => Response::success(id, value),
            Ok(Err(err)) => {
                debug!(method, %err, "dispatcher: handler returned error");
                Response::failure(id, &err)
            }
            Err(_panic) => {
                warn!(method, "dispatcher: handler panicked");
                Response::failure(id, &AppError::Internal(format!("{method} handler panicked")))
            }
        }
    }
}

/// Handler table for one connection role.
pub struct Dispatcher {
    profile: RoleProfile,
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
    subscribers: HashMap<String, Vec<Arc<dyn NotificationSubscriber>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<&String> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("Dispatcher")
            .field("role", &self.profile.role)
            .field("methods", &methods)
            .field("subscriptions", &self.subscribers.len())
            .finish()
    }
}

impl Dispatcher {
    /// Empty dispatcher for `role`.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            profile: role.profile(),
            handlers: HashMap::new(),
            subscribers: HashMap::new(),
        }
    }

    /// Role this dispatcher serves.
    #[must_use]
    pub fn role(&self) -> Role {
        self.profile.role
    }

    /// Register the handler for `method`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the role does not serve `method`.
    pub fn register(&mut self, method: &str, handler: Arc<dyn MethodHandler>) -> Result<()> {
        if !self.profile.serves_request(method) {
            return Err(AppError::Config(format!(
                "the {} role does not serve {method}",
                self.profile.role.as_str()
            )));
        }
        self.handlers.insert(method.to_owned(), handler);
        Ok(())
    }

    /// Add a subscriber for `method` notifications.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when the role does not consume `method`.
    pub fn subscribe(
        &mut self,
        method: &str,
        subscriber: Arc<dyn NotificationSubscriber>,
    ) -> Result<()> {
        if !self.profile.serves_notification(method) {
            return Err(AppError::Config(format!(
                "the {} role does not consume {method} notifications",
                self.profile.role.as_str()
            )));
        }
        self.subscribers
            .entry(method.to_owned())
            .or_default()
            .push(subscriber);
        Ok(())
    }

    /// Route one inbound message.
    ///
    /// Requests are admitted here, inline: method lookup, the connection
    /// gate and the handler's admission step all see messages in wire order.
    /// Only the handler body runs in the spawned task.
    pub fn dispatch(self: &Arc<Self>, message: Message, connection: &Connection) {
        match message {
            Message::Response(response) => {
                connection.registry().resolve(response);
            }
            Message::Notification(note) => self.deliver(&note, connection),
            Message::Request(request) => {
                let span = info_span!(
                    "acp_request",
                    role = self.profile.role.as_str(),
                    method = %request.method,
                    request_id = %request.id
                );
                let id = request.id.clone();
                let admitted = span.in_scope(|| self.admit(request, connection));
                let conn = connection.clone();
                match admitted {
                    Ok(admitted) => {
                        tokio::spawn(
                            async move {
                                let response = admitted.run().await;
                                if let Err(err) = conn.send(Message::Response(response)) {
                                    debug!(%err, "dispatcher: response dropped, connection closed");
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(err) => {
                        let response = Response::failure(id, &err);
                        if let Err(err) = conn.send(Message::Response(response)) {
                            debug!(%err, "dispatcher: response dropped, connection closed");
                        }
                    }
                }
            }
        }
    }

    /// Admit `request`: lookup, gating and the handler's admission step.
    ///
    /// # Errors
    ///
    /// - [`AppError::MethodNotFound`] for an unregistered method.
    /// - Whatever the connection gate or the admission step rejects with.
    pub fn admit(&self, request: Request, connection: &Connection) -> Result<AdmittedRequest> {
        let Request { id, method, params } = request;

        let Some(handler) = self.handlers.get(&method).cloned() else {
            debug!(method, "dispatcher: no handler registered");
            return Err(AppError::MethodNotFound(format!("no handler for {method}")));
        };

        if let Err(err) = connection.state().check_request(&method) {
            debug!(method, %err, "dispatcher: request rejected by gate");
            return Err(err);
        }

        let mut ctx = RequestContext::new(connection.clone(), id, method);
        let admission =
            std::panic::catch_unwind(AssertUnwindSafe(|| handler.admit(&mut ctx, params.as_ref())));
        match admission {
            Ok(Ok(())) => Ok(AdmittedRequest {
                handler,
                ctx,
                params,
            }),
            Ok(Err(err)) => {
                debug!(method = ctx.method, %err, "dispatcher: request refused at admission");
                Err(err)
            }
            Err(_panic) => {
                warn!(method = ctx.method, "dispatcher: admission panicked");
                Err(AppError::Internal(format!("{} admission panicked", ctx.method)))
            }
        }
    }

    /// Produce the single response for `request`: admission, then the
    /// handler.
    pub async fn handle_request(&self, request: Request, connection: &Connection) -> Response {
        let id = request.id.clone();
        match self.admit(request, connection) {
            Ok(admitted) => admitted.run().await,
            Err(err) => Response::failure(id, &err),
        }
    }

    fn deliver(&self, note: &Notification, connection: &Connection) {
        if !connection.state().is_initialized() {
            warn!(method = note.method, "dispatcher: dropping notification before initialize");
            return;
        }
        let Some(subscribers) = self.subscribers.get(&note.method) else {
            debug!(method = note.method, "dispatcher: no subscriber, notification ignored");
            return;
        };
        for subscriber in subscribers {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                subscriber.notify(connection, note.params.as_ref())
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(method = note.method, %err, "dispatcher: subscriber rejected notification");
                }
                Err(_panic) => {
                    warn!(method = note.method, "dispatcher: subscriber panicked");
                }
            }
        }
    }
}
