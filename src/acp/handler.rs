//! Polymorphic method handlers and notification subscribers.
//!
//! The dispatcher stores handlers as `method name → Arc<dyn MethodHandler>`,
//! so adding a method is a registration, never a change to the router.
//! [`handler_fn`] and [`subscriber_fn`] adapt typed closures: parameters are
//! decoded before the closure runs (failures become
//! [`AppError::InvalidParams`]) and results are encoded after.
//! [`ordered_handler_fn`] adds an admission closure that runs in the read
//! loop, in wire order, before the request task is spawned.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::acp::connection::Connection;
use crate::acp::envelope::RequestId;
use crate::session::StreamingTurn;
use crate::{AppError, Result};

/// Boxed future returned by [`MethodHandler::call`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Context handed to a request handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Connection the request arrived on; handlers use it to issue their own
    /// requests and notifications.
    pub connection: Connection,
    /// Id of the request being served.
    pub request_id: RequestId,
    /// Method being served.
    pub method: String,
    /// Turn opened while the request was admitted, if any.
    pub turn: Option<StreamingTurn>,
}

impl RequestContext {
    /// Context for a request that has not been admitted yet.
    #[must_use]
    pub fn new(connection: Connection, request_id: RequestId, method: impl Into<String>) -> Self {
        Self {
            connection,
            request_id,
            method: method.into(),
            turn: None,
        }
    }
}

/// Serves one request method.
///
/// Whatever the returned future yields (value or error) becomes the single
/// response for the request.
pub trait MethodHandler: Send + Sync {
    /// Admission step, run inline by the read loop after the connection gate.
    ///
    /// Messages behind this request on the wire observe whatever state this
    /// step changes. An error becomes the response and [`call`] never runs.
    ///
    /// [`call`]: MethodHandler::call
    ///
    /// # Errors
    ///
    /// Any error is sent back as the request's response.
    fn admit(&self, _ctx: &mut RequestContext, _params: Option<&Value>) -> Result<()> {
        Ok(())
    }

    /// Handle one request.
    fn call(&self, ctx: RequestContext, params: Option<Value>) -> HandlerFuture<'_>;
}

/// Consumes one notification method.
///
/// Subscribers run inline in the connection's read loop, in wire order, so
/// they must not block. A failing subscriber is logged and isolated.
pub trait NotificationSubscriber: Send + Sync {
    /// Handle one notification.
    ///
    /// # Errors
    ///
    /// Any error is logged by the dispatcher and otherwise ignored.
    fn notify(&self, connection: &Connection, params: Option<&Value>) -> Result<()>;
}

/// Decode request parameters into `P`.
///
/// Absent parameters decode from `null`, so `()` and all-optional structs
/// accept a missing `params`.
///
/// # Errors
///
/// Returns [`AppError::InvalidParams`] naming the method on failure.
pub fn decode_params<P: DeserializeOwned>(method: &str, params: Option<Value>) -> Result<P> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| AppError::InvalidParams(format!("{method}: {e}")))
}

// ── Closure adapters ──────────────────────────────────────────────────────────

struct FnHandler<F, P> {
    f: F,
    _params: PhantomData<fn(P)>,
}

impl<F, P, R, Fut> MethodHandler for FnHandler<F, P>
where
    F: Fn(RequestContext, P) -> Fut + Send + Sync,
    P: DeserializeOwned + Send,
    R: Serialize,
    Fut: Future<Output = Result<R>> + Send,
{
    fn call(&self, ctx: RequestContext, params: Option<Value>) -> HandlerFuture<'_> {
        Box::pin(async move {
            let method = ctx.method.clone();
            let params: P = decode_params(&method, params)?;
            let result = (self.f)(ctx, params).await?;
            serde_json::to_value(result)
                .map_err(|e| AppError::Internal(format!("{method}: cannot encode result: {e}")))
        })
    }
}

/// Wrap a typed async closure as a [`MethodHandler`].
pub fn handler_fn<F, P, R, Fut>(f: F) -> Arc<dyn MethodHandler>
where
    F: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
    P: DeserializeOwned + Send + 'static,
    R: Serialize + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _params: PhantomData,
    })
}

struct OrderedFnHandler<A, F, P> {
    admit: A,
    inner: FnHandler<F, P>,
}

impl<A, F, P, R, Fut> MethodHandler for OrderedFnHandler<A, F, P>
where
    A: Fn(&mut RequestContext, &P) -> Result<()> + Send + Sync,
    F: Fn(RequestContext, P) -> Fut + Send + Sync,
    P: DeserializeOwned + Send,
    R: Serialize,
    Fut: Future<Output = Result<R>> + Send,
{
    fn admit(&self, ctx: &mut RequestContext, params: Option<&Value>) -> Result<()> {
        let decoded: P = decode_params(&ctx.method, params.cloned())?;
        (self.admit)(ctx, &decoded)
    }

    fn call(&self, ctx: RequestContext, params: Option<Value>) -> HandlerFuture<'_> {
        self.inner.call(ctx, params)
    }
}

/// Like [`handler_fn`], with `admit` run inline in wire order first.
///
/// Use it for requests whose state transition later messages depend on,
/// such as opening or cancelling a turn.
pub fn ordered_handler_fn<A, F, P, R, Fut>(admit: A, f: F) -> Arc<dyn MethodHandler>
where
    A: Fn(&mut RequestContext, &P) -> Result<()> + Send + Sync + 'static,
    F: Fn(RequestContext, P) -> Fut + Send + Sync + 'static,
    P: DeserializeOwned + Send + 'static,
    R: Serialize + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    Arc::new(OrderedFnHandler {
        admit,
        inner: FnHandler {
            f,
            _params: PhantomData,
        },
    })
}

struct FnSubscriber<F, P> {
    method: &'static str,
    f: F,
    _params: PhantomData<fn(P)>,
}

impl<F, P> NotificationSubscriber for FnSubscriber<F, P>
where
    F: Fn(&Connection, P) -> Result<()> + Send + Sync,
    P: DeserializeOwned,
{
    fn notify(&self, connection: &Connection, params: Option<&Value>) -> Result<()> {
        let params: P = decode_params(self.method, params.cloned())?;
        (self.f)(connection, params)
    }
}

/// Wrap a typed closure as a [`NotificationSubscriber`] for `method`.
pub fn subscriber_fn<F, P>(method: &'static str, f: F) -> Arc<dyn NotificationSubscriber>
where
    F: Fn(&Connection, P) -> Result<()> + Send + Sync + 'static,
    P: DeserializeOwned + 'static,
{
    Arc::new(FnSubscriber {
        method,
        f,
        _params: PhantomData,
    })
}
