//! The unified error type for wirekit.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use super::codes;
use super::details::{BoxError, HandshakeDetails, InvalidParamsDetails, TransportDetails};
use super::jsonrpc::JsonRpcError;
use super::transport::{TransportContext, TransportErrorKind};
use crate::protocol::EnvelopeError;

/// The taxonomy class of an [`RpcError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed bytes on the wire. Fatal to the connection.
    Framing,
    /// A well-formed envelope that breaks the message invariants.
    Protocol,
    /// A local deadline elapsed.
    Timeout,
    /// Either side cancelled the operation.
    Cancelled,
    /// The session is gone (closed locally, unknown remotely).
    SessionClosed,
    /// The event store pruned the requested replay range.
    ReplayExpired,
    /// A non-framing transport failure.
    Transport,
    /// The peer answered with an error Response.
    Remote,
    /// A per-request failure produced locally (unknown method, bad params, handler error).
    Request,
}

/// The primary error type for wirekit.
///
/// Large variants are boxed so `Result<T, RpcError>` stays small.
#[derive(Error, Diagnostic, Debug)]
pub enum RpcError {
    // ========================================================================
    // Framing and protocol
    // ========================================================================
    /// Bytes that do not decode into a message.
    #[error("Parse error: {message}")]
    #[diagnostic(
        code(wirekit::framing::parse_error),
        help("Each frame must hold exactly one JSON-RPC 2.0 message")
    )]
    Parse {
        /// Human-readable error message.
        message: String,
        /// The underlying parse error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// A decodable message that violates the protocol.
    #[error("Protocol error: {message}")]
    #[diagnostic(code(wirekit::protocol::violation))]
    Protocol {
        /// Human-readable error message.
        message: String,
    },

    // ========================================================================
    // Per-request errors
    // ========================================================================
    /// The request is not acceptable in the current state.
    #[error("Invalid request: {message}")]
    #[diagnostic(code(wirekit::request::invalid))]
    InvalidRequest {
        /// Human-readable error message.
        message: String,
    },

    /// No handler is registered for the method.
    #[error("Method not found: {method}")]
    #[diagnostic(code(wirekit::request::method_not_found))]
    MethodNotFound {
        /// The method that was requested.
        method: String,
    },

    /// Invalid method parameter(s).
    #[error("Invalid params for '{}': {}", .0.method, .0.message)]
    #[diagnostic(code(wirekit::request::invalid_params))]
    InvalidParams(#[source] Box<InvalidParamsDetails>),

    /// Internal failure while serving a request.
    #[error("Internal error: {message}")]
    #[diagnostic(code(wirekit::internal), severity(error))]
    Internal {
        /// Human-readable error message.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<BoxError>,
    },

    /// The peer answered with an error Response.
    #[error("Peer returned error {}: {}", .0.code, .0.message)]
    #[diagnostic(code(wirekit::remote))]
    Remote(Box<JsonRpcError>),

    // ========================================================================
    // Transport
    // ========================================================================
    /// Transport-level error.
    #[error("Transport error ({}): {}", .0.kind, .0.message)]
    #[diagnostic(code(wirekit::transport::error))]
    Transport(#[source] Box<TransportDetails>),

    // ========================================================================
    // Request lifecycle
    // ========================================================================
    /// A request did not resolve before its deadline.
    #[error("Request '{method}' timed out after {duration:?}")]
    #[diagnostic(
        code(wirekit::timeout),
        help("Consider increasing the request timeout or checking the peer")
    )]
    Timeout {
        /// The method of the request that timed out.
        method: String,
        /// How long we waited.
        duration: Duration,
    },

    /// A request was cancelled.
    #[error("Request '{method}' cancelled{}", reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    #[diagnostic(code(wirekit::cancelled))]
    Cancelled {
        /// The method of the cancelled request.
        method: String,
        /// Reason for cancellation, if provided.
        reason: Option<String>,
    },

    // ========================================================================
    // Session lifecycle
    // ========================================================================
    /// Operation attempted after the session was torn down.
    #[error("Session closed{}", reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    #[diagnostic(code(wirekit::session::closed))]
    SessionClosed {
        /// Why the session closed, if known.
        reason: Option<String>,
    },

    /// The requested replay range has been pruned.
    #[error("Replay expired for stream {stream_id} after event {after}")]
    #[diagnostic(
        code(wirekit::session::replay_expired),
        help("Start a new session; the missed events are no longer available")
    )]
    ReplayExpired {
        /// The stream that was being resumed.
        stream_id: String,
        /// The last sequence number the client had seen.
        after: u64,
    },

    /// The session identifier is unknown.
    #[error("Session not found: {session_id}")]
    #[diagnostic(code(wirekit::session::not_found), help("Re-initialize to continue"))]
    SessionNotFound {
        /// The unknown session identifier.
        session_id: String,
    },

    /// The initialize exchange failed.
    #[error("Handshake failed: {}", .0.message)]
    #[diagnostic(code(wirekit::session::handshake_failed))]
    HandshakeFailed(#[source] Box<HandshakeDetails>),

    // ========================================================================
    // Context-wrapped errors
    // ========================================================================
    /// An error with additional context.
    #[error("{context}: {source}")]
    #[diagnostic(code(wirekit::context))]
    WithContext {
        /// The context message.
        context: String,
        /// The underlying error.
        #[source]
        source: Box<RpcError>,
    },
}

// ============================================================================
// Error Construction Helpers
// ============================================================================

impl RpcError {
    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            source: None,
        }
    }

    /// Create a parse error with a source.
    pub fn parse_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Parse {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a method not found error.
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    /// Create an invalid params error.
    pub fn invalid_params(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParams(Box::new(InvalidParamsDetails {
            method: method.into(),
            message: message.into(),
            source: None,
        }))
    }

    /// Create an invalid params error from a deserialization failure.
    pub fn invalid_params_from(method: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidParams(Box::new(InvalidParamsDetails {
            method: method.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }))
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with a source.
    pub fn internal_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transport error.
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::transport_with_context(kind, message, TransportContext::default())
    }

    /// Create a transport error with context.
    pub fn transport_with_context(
        kind: TransportErrorKind,
        message: impl Into<String>,
        context: TransportContext,
    ) -> Self {
        Self::Transport(Box::new(TransportDetails {
            kind,
            message: message.into(),
            context,
            source: None,
        }))
    }

    /// Record where a transport error happened. Other errors are returned
    /// unchanged.
    #[must_use]
    pub fn with_transport_context(mut self, context: TransportContext) -> Self {
        if let Self::Transport(details) = &mut self {
            details.context = context;
        }
        self
    }

    /// Create a timeout error.
    pub fn timeout(method: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            method: method.into(),
            duration,
        }
    }

    /// Create a cancelled error.
    pub fn cancelled(method: impl Into<String>) -> Self {
        Self::Cancelled {
            method: method.into(),
            reason: None,
        }
    }

    /// Create a cancelled error with reason.
    pub fn cancelled_with_reason(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Cancelled {
            method: method.into(),
            reason: Some(reason.into()),
        }
    }

    /// Create a session closed error.
    pub fn session_closed(reason: Option<String>) -> Self {
        Self::SessionClosed { reason }
    }

    /// Create a handshake failed error.
    pub fn handshake_failed(message: impl Into<String>) -> Self {
        Self::handshake_failed_with_versions(message, None, None)
    }

    /// Create a handshake failed error with version info.
    pub fn handshake_failed_with_versions(
        message: impl Into<String>,
        local_version: Option<String>,
        peer_version: Option<String>,
    ) -> Self {
        Self::HandshakeFailed(Box::new(HandshakeDetails {
            message: message.into(),
            local_version,
            peer_version,
            source: None,
        }))
    }

    /// Get the JSON-RPC error code for this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse { .. } => codes::PARSE_ERROR,
            Self::Protocol { .. } => codes::INVALID_REQUEST,
            Self::InvalidRequest { .. } => codes::INVALID_REQUEST,
            Self::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => codes::INVALID_PARAMS,
            Self::Internal { .. } => codes::INTERNAL_ERROR,
            Self::Remote(e) => e.code,
            Self::Transport(_) => codes::TRANSPORT_ERROR,
            Self::Timeout { .. } => codes::REQUEST_TIMEOUT,
            Self::Cancelled { .. } => codes::REQUEST_CANCELLED,
            Self::SessionClosed { .. } => codes::CONNECTION_CLOSED,
            Self::ReplayExpired { .. } => codes::REPLAY_EXPIRED,
            Self::SessionNotFound { .. } => codes::SESSION_NOT_FOUND,
            Self::HandshakeFailed(_) => codes::HANDSHAKE_FAILED,
            Self::WithContext { source, .. } => source.code(),
        }
    }

    /// Get the taxonomy class of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Parse { .. } => ErrorCategory::Framing,
            Self::Protocol { .. } | Self::HandshakeFailed(_) => ErrorCategory::Protocol,
            Self::InvalidRequest { .. }
            | Self::MethodNotFound { .. }
            | Self::InvalidParams(_)
            | Self::Internal { .. } => ErrorCategory::Request,
            Self::Remote(_) => ErrorCategory::Remote,
            Self::Transport(details) if details.kind.is_framing() => ErrorCategory::Framing,
            Self::Transport(details) if details.kind == TransportErrorKind::ReplayExpired => {
                ErrorCategory::ReplayExpired
            }
            Self::Transport(details) if details.kind == TransportErrorKind::SessionNotFound => {
                ErrorCategory::SessionClosed
            }
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::SessionClosed { .. } | Self::SessionNotFound { .. } => {
                ErrorCategory::SessionClosed
            }
            Self::ReplayExpired { .. } => ErrorCategory::ReplayExpired,
            Self::WithContext { source, .. } => source.category(),
        }
    }

    /// Whether this error ends the session it occurred on.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Framing
                | ErrorCategory::SessionClosed
                | ErrorCategory::ReplayExpired
                | ErrorCategory::Transport
        )
    }
}

// ============================================================================
// Standard Error Conversions
// ============================================================================

impl From<JsonRpcError> for RpcError {
    fn from(err: JsonRpcError) -> Self {
        Self::Remote(Box::new(err))
    }
}

impl From<EnvelopeError> for RpcError {
    fn from(err: EnvelopeError) -> Self {
        Self::parse_with_source(err.to_string(), err)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse_with_source("JSON serialization/deserialization error", err)
    }
}

impl From<std::io::Error> for RpcError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                TransportErrorKind::ConnectionFailed
            }
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => TransportErrorKind::ConnectionClosed,
            std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            std::io::ErrorKind::WriteZero => TransportErrorKind::WriteFailed,
            std::io::ErrorKind::InvalidData => TransportErrorKind::InvalidMessage,
            _ => TransportErrorKind::ReadFailed,
        };
        let message = err.to_string();
        Self::Transport(Box::new(TransportDetails {
            kind,
            message,
            context: TransportContext::default(),
            source: Some(Box::new(err)),
        }))
    }
}
