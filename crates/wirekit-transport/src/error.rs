//! Transport error types.

use wirekit_core::error::{RpcError, TransportContext, TransportDetails, TransportErrorKind};
use wirekit_core::protocol::EnvelopeError;
use thiserror::Error;

use crate::event_store::StoreError;

/// Errors that can occur during transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O error from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bytes on the wire did not form a message.
    #[error("Framing error: {0}")]
    Framing(#[from] EnvelopeError),

    /// Connection error.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("Not connected")]
    NotConnected,

    /// Message was too large.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size (a lower bound when the frame was cut off).
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// The peer broke the transport's protocol.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Timeout occurred.
    #[error("{operation} timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// How long the operation waited.
        duration: std::time::Duration,
    },

    /// The remote side does not know the session.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The rejected session identifier.
        session_id: String,
    },

    /// Event store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transport was already closed.
    #[error("Transport already closed")]
    AlreadyClosed,
}

impl TransportError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Get the transport error kind.
    #[must_use]
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected => TransportErrorKind::ConnectionFailed,
                std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::BrokenPipe => {
                    TransportErrorKind::ConnectionClosed
                }
                std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
                std::io::ErrorKind::WriteZero => TransportErrorKind::WriteFailed,
                std::io::ErrorKind::InvalidData => TransportErrorKind::InvalidMessage,
                _ => TransportErrorKind::ReadFailed,
            },
            Self::Json(_) | Self::Framing(_) | Self::MessageTooLarge { .. } => {
                TransportErrorKind::InvalidMessage
            }
            Self::Connection { .. } | Self::NotConnected => TransportErrorKind::ConnectionFailed,
            Self::ConnectionClosed | Self::AlreadyClosed => TransportErrorKind::ConnectionClosed,
            Self::Protocol { .. } => TransportErrorKind::ProtocolViolation,
            Self::Timeout { .. } => TransportErrorKind::Timeout,
            Self::SessionNotFound { .. } => TransportErrorKind::SessionNotFound,
            Self::Store(StoreError::ReplayExpired { .. }) => TransportErrorKind::ReplayExpired,
            Self::Store(StoreError::StreamNotFound { .. }) => TransportErrorKind::SessionNotFound,
            Self::Store(_) => TransportErrorKind::ProtocolViolation,
        }
    }

    /// Whether the error means malformed bytes arrived on the wire.
    #[must_use]
    pub fn is_framing(&self) -> bool {
        self.kind().is_framing()
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Store(StoreError::ReplayExpired {
                stream_id, after, ..
            }) => Self::ReplayExpired { stream_id, after },
            TransportError::SessionNotFound { session_id }
            | TransportError::Store(StoreError::StreamNotFound {
                stream_id: session_id,
            }) => Self::SessionNotFound { session_id },
            err if err.is_framing() => Self::parse_with_source(err.to_string(), err),
            err => Self::Transport(Box::new(TransportDetails {
                kind: err.kind(),
                message: err.to_string(),
                context: TransportContext::default(),
                source: Some(Box::new(err)),
            })),
        }
    }
}
