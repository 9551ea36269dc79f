//! JSON-RPC envelope classification and serialisation.
//!
//! A decoded record is classified purely by which of `method`, `id`,
//! `result` and `error` are present:
//!
//! | Shape                                   | Kind                        |
//! |-----------------------------------------|-----------------------------|
//! | `method`, no `id`                       | [`Message::Notification`]   |
//! | `method` and `id`                       | [`Message::Request`]        |
//! | `id`, exactly one of `result`/`error`, no `method` | [`Message::Response`] |
//! | anything else                           | [`AppError::ParseError`]    |
//!
//! `params` and `result` stay as raw [`Value`]s; typed decoding belongs to
//! the handler that consumes them.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// JSON-RPC protocol version stamped on every outbound message.
pub const JSONRPC_VERSION: &str = "2.0";

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Request identifier chosen by the issuer and echoed verbatim in responses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer identifier (the form this crate allocates).
    Number(i64),
    /// String identifier.
    String(String),
    /// `null`, only valid on error responses that cannot name a request.
    Null,
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl RequestId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Null => Some(Self::Null),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
            Self::Null => Value::Null,
        }
    }
}

// ── Error object ──────────────────────────────────────────────────────────────

/// JSON-RPC error object carried by an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code (see [`crate::errors`]).
    pub code: i64,
    /// Short description of the failure.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Outcome carried by a [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    /// Successful result (may be `null`).
    Result(Value),
    /// Failure reported by the serving side.
    Error(RpcError),
}

/// A call expecting exactly one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Issuer-chosen identifier.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Raw parameters, if present on the wire.
    pub params: Option<Value>,
}

/// Reply to a [`Request`], echoing its id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Identifier of the request being answered.
    pub id: RequestId,
    /// Result or error.
    pub payload: ResponsePayload,
}

/// Fire-and-forget message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Raw parameters, if present on the wire.
    pub params: Option<Value>,
}

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Call expecting a response.
    Request(Request),
    /// Reply to an earlier request.
    Response(Response),
    /// Call without a response.
    Notification(Notification),
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    /// Error response built from a crate error.
    #[must_use]
    pub fn failure(id: RequestId, err: &AppError) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(err.to_rpc_error()),
        }
    }

    /// Convert the payload into the crate result type.
    ///
    /// # Errors
    ///
    /// Returns the typed error mapped from an error payload.
    pub fn into_result(self) -> Result<Value> {
        match self.payload {
            ResponsePayload::Result(value) => Ok(value),
            ResponsePayload::Error(err) => Err(AppError::from_rpc_error(&err)),
        }
    }
}

impl Message {
    /// Build a request message.
    #[must_use]
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request(Request {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    /// Build a notification message.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// Classify a parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ParseError`] when the value matches none of the
    /// three envelope shapes.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(AppError::ParseError("message must be a JSON object".into()));
        };

        let id = match obj.remove("id") {
            Some(raw) => Some(RequestId::from_value(&raw).ok_or_else(|| {
                AppError::ParseError("id must be an integer, a string or null".into())
            })?),
            None => None,
        };
        let params = obj.remove("params");

        if let Some(method) = obj.remove("method") {
            let Value::String(method) = method else {
                return Err(AppError::ParseError("method must be a string".into()));
            };
            if obj.contains_key("result") || obj.contains_key("error") {
                return Err(AppError::ParseError(format!(
                    "{method}: message carries both a method and a result/error"
                )));
            }
            return match id {
                Some(RequestId::Null) => Err(AppError::ParseError(format!(
                    "{method}: request id must not be null"
                ))),
                Some(id) => Ok(Self::Request(Request { id, method, params })),
                None => Ok(Self::Notification(Notification { method, params })),
            };
        }

        let Some(id) = id else {
            return Err(AppError::ParseError(
                "message has neither a method nor an id".into(),
            ));
        };

        let payload = match (obj.remove("result"), obj.remove("error")) {
            (Some(result), None) => ResponsePayload::Result(result),
            (None, Some(error)) => ResponsePayload::Error(error_from_value(error)?),
            (Some(_), Some(_)) => {
                return Err(AppError::ParseError(format!(
                    "response {id} carries both result and error"
                )))
            }
            (None, None) => {
                return Err(AppError::ParseError(format!(
                    "response {id} carries neither result nor error"
                )))
            }
        };

        if id == RequestId::Null && matches!(payload, ResponsePayload::Result(_)) {
            return Err(AppError::ParseError(
                "a successful response must carry a non-null id".into(),
            ));
        }

        Ok(Self::Response(Response { id, payload }))
    }

    /// Parse and classify one framed record.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ParseError`] for invalid JSON or an unrecognised
    /// envelope shape.
    pub fn decode(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| AppError::ParseError(format!("malformed json: {e}")))?;
        Self::from_value(value)
    }

    /// Serialise into the wire object, always stamping `"jsonrpc": "2.0"`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::String(JSONRPC_VERSION.into()));
        match self {
            Self::Request(req) => {
                obj.insert("id".into(), req.id.to_value());
                obj.insert("method".into(), Value::String(req.method.clone()));
                if let Some(params) = &req.params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Notification(note) => {
                obj.insert("method".into(), Value::String(note.method.clone()));
                if let Some(params) = &note.params {
                    obj.insert("params".into(), params.clone());
                }
            }
            Self::Response(resp) => {
                obj.insert("id".into(), resp.id.to_value());
                match &resp.payload {
                    ResponsePayload::Result(result) => {
                        obj.insert("result".into(), result.clone());
                    }
                    ResponsePayload::Error(err) => {
                        obj.insert("error".into(), error_to_value(err));
                    }
                }
            }
        }
        Value::Object(obj)
    }

    /// Serialise into a single-line record (without the delimiter).
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    /// Method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(note) => Some(&note.method),
            Self::Response(_) => None,
        }
    }
}

impl From<Response> for Message {
    fn from(value: Response) -> Self {
        Self::Response(value)
    }
}

fn error_from_value(value: Value) -> Result<RpcError> {
    let Value::Object(mut obj) = value else {
        return Err(AppError::ParseError("error must be an object".into()));
    };
    let code = obj
        .get("code")
        .and_then(Value::as_i64)
        .ok_or_else(|| AppError::ParseError("error.code must be an integer".into()))?;
    let message = match obj.remove("message") {
        Some(Value::String(message)) => message,
        _ => return Err(AppError::ParseError("error.message must be a string".into())),
    };
    Ok(RpcError {
        code,
        message,
        data: obj.remove("data"),
    })
}

fn error_to_value(err: &RpcError) -> Value {
    let mut obj = Map::new();
    obj.insert("code".into(), Value::from(err.code));
    obj.insert("message".into(), Value::String(err.message.clone()));
    if let Some(data) = &err.data {
        obj.insert("data".into(), data.clone());
    }
    Value::Object(obj)
}

/// Best-effort extraction of the id from a record that failed to classify.
///
/// Used when reporting a fatal parse fault, so the peer can still correlate
/// the error when the record carried a usable id.
#[must_use]
pub fn salvage_id(line: &str) -> RequestId {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(RequestId::from_value))
        .unwrap_or(RequestId::Null)
}
