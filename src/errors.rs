//! Error types shared across the crate.
//!
//! [`AppError`] doubles as the JSON-RPC error taxonomy: every variant maps to
//! a wire code through [`AppError::code`], and error objects received from the
//! peer map back through [`AppError::from_rpc_error`].

use std::fmt::{Display, Formatter};

use crate::acp::envelope::RpcError;

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

// ── Wire codes ────────────────────────────────────────────────────────────────

/// Invalid JSON was received, or the record is not a valid envelope.
pub const PARSE_ERROR: i64 = -32_700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32_600;
/// The method does not exist or is not served by this role.
pub const METHOD_NOT_FOUND: i64 = -32_601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32_602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32_603;
/// A session, terminal or file referenced by the request does not exist.
pub const RESOURCE_NOT_FOUND: i64 = -32_001;
/// The serving side refused the operation.
pub const PERMISSION_DENIED: i64 = -32_002;
/// The method was called out of sequence.
pub const INVALID_STATE: i64 = -32_003;
/// The method depends on a capability that was not negotiated.
pub const CAPABILITY_NOT_SUPPORTED: i64 = -32_004;

/// Crate error enumeration covering protocol, transport and domain failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Record is not valid JSON or not a recognisable envelope.
    ParseError(String),
    /// Envelope is well formed but not an acceptable request.
    InvalidRequest(String),
    /// No handler is registered for the method.
    MethodNotFound(String),
    /// Parameters failed to decode or validate.
    InvalidParams(String),
    /// Unexpected failure inside a handler or the engine.
    Internal(String),
    /// Referenced session, terminal or file does not exist.
    ResourceNotFound(String),
    /// Operation refused by the serving side.
    PermissionDenied(String),
    /// Method called out of sequence for the connection or session state.
    InvalidState(String),
    /// Method requires a capability that is not effective on this connection.
    CapabilityNotSupported(String),
    /// Framing violation on the byte stream (for example an oversized record).
    Protocol(String),
    /// Outbound request did not complete within its deadline.
    Timeout(String),
    /// Connection ended before the operation completed.
    ConnectionClosed(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or stream I/O failure.
    Io(String),
}

impl AppError {
    /// JSON-RPC error code reported on the wire for this error.
    ///
    /// Local-only kinds (timeouts, transport and configuration faults) have no
    /// dedicated code and are reported as [`INTERNAL_ERROR`].
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::ParseError(_) | Self::Protocol(_) => PARSE_ERROR,
            Self::InvalidRequest(_) => INVALID_REQUEST,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::ResourceNotFound(_) => RESOURCE_NOT_FOUND,
            Self::PermissionDenied(_) => PERMISSION_DENIED,
            Self::InvalidState(_) => INVALID_STATE,
            Self::CapabilityNotSupported(_) => CAPABILITY_NOT_SUPPORTED,
            Self::Internal(_)
            | Self::Timeout(_)
            | Self::ConnectionClosed(_)
            | Self::Config(_)
            | Self::Io(_) => INTERNAL_ERROR,
        }
    }

    /// Human-readable detail carried by the error.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::ParseError(msg)
            | Self::InvalidRequest(msg)
            | Self::MethodNotFound(msg)
            | Self::InvalidParams(msg)
            | Self::Internal(msg)
            | Self::ResourceNotFound(msg)
            | Self::PermissionDenied(msg)
            | Self::InvalidState(msg)
            | Self::CapabilityNotSupported(msg)
            | Self::Protocol(msg)
            | Self::Timeout(msg)
            | Self::ConnectionClosed(msg)
            | Self::Config(msg)
            | Self::Io(msg) => msg,
        }
    }

    /// Build the JSON-RPC error object sent in a response.
    ///
    /// The wire message carries the detail only; the kind travels as the code.
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        RpcError {
            code: self.code(),
            message: self.message().to_owned(),
            data: None,
        }
    }

    /// Map an error object received from the peer back to a typed error.
    ///
    /// Unknown codes become [`AppError::Internal`] carrying the peer's message.
    #[must_use]
    pub fn from_rpc_error(err: &RpcError) -> Self {
        let msg = err.message.clone();
        match err.code {
            PARSE_ERROR => Self::ParseError(msg),
            INVALID_REQUEST => Self::InvalidRequest(msg),
            METHOD_NOT_FOUND => Self::MethodNotFound(msg),
            INVALID_PARAMS => Self::InvalidParams(msg),
            RESOURCE_NOT_FOUND => Self::ResourceNotFound(msg),
            PERMISSION_DENIED => Self::PermissionDenied(msg),
            INVALID_STATE => Self::InvalidState(msg),
            CAPABILITY_NOT_SUPPORTED => Self::CapabilityNotSupported(msg),
            INTERNAL_ERROR => Self::Internal(msg),
            other => Self::Internal(format!("peer error {other}: {msg}")),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseError(msg) => write!(f, "parse error: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::MethodNotFound(msg) => write!(f, "method not found: {msg}"),
            Self::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
            Self::ResourceNotFound(msg) => write!(f, "resource not found: {msg}"),
            Self::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::CapabilityNotSupported(msg) => write!(f, "capability not supported: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::ConnectionClosed(msg) => write!(f, "connection closed: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
