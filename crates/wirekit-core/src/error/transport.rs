//! Transport error classification and context.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Connection could not be established.
    ConnectionFailed,
    /// Connection was closed unexpectedly.
    ConnectionClosed,
    /// Read operation failed.
    ReadFailed,
    /// Write operation failed.
    WriteFailed,
    /// Operation timed out.
    Timeout,
    /// Bytes on the wire did not form a message.
    InvalidMessage,
    /// The peer broke the transport's protocol (bad status, bad headers).
    ProtocolViolation,
    /// The session is unknown to the remote side.
    SessionNotFound,
    /// The requested replay range is gone.
    ReplayExpired,
    /// Resources exhausted (e.g., too many sessions).
    ResourceExhausted,
}

impl TransportErrorKind {
    /// Whether this kind describes malformed bytes on the wire.
    #[must_use]
    pub const fn is_framing(self) -> bool {
        matches!(self, Self::InvalidMessage)
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ConnectionFailed => "connection failed",
            Self::ConnectionClosed => "connection closed",
            Self::ReadFailed => "read failed",
            Self::WriteFailed => "write failed",
            Self::Timeout => "timeout",
            Self::InvalidMessage => "invalid message",
            Self::ProtocolViolation => "protocol violation",
            Self::SessionNotFound => "session not found",
            Self::ReplayExpired => "replay expired",
            Self::ResourceExhausted => "resource exhausted",
        };
        f.write_str(text)
    }
}

/// Where a transport error happened. Attached by the session engine,
/// which knows which transport it was driving.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportContext {
    /// Short transport name (`memory`, `process`, `http`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// The other end: an endpoint URL or a child pid.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    /// Session identifier, when the transport carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl TransportContext {
    /// Context for a transport of `kind`.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Default::default()
        }
    }

    /// Record the other end.
    #[must_use]
    pub fn with_peer(mut self, peer: Option<String>) -> Self {
        self.peer = peer;
        self
    }

    /// Record the session identifier.
    #[must_use]
    pub fn with_session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }
}

impl fmt::Display for TransportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.as_deref().unwrap_or("transport"))?;
        if let Some(peer) = &self.peer {
            write!(f, " to {peer}")?;
        }
        if let Some(session_id) = &self.session_id {
            write!(f, " (session {session_id})")?;
        }
        Ok(())
    }
}
