//! The transport abstraction.
//!
//! A transport is a bidirectional conduit of whole messages: one inbound
//! channel read through [`Transport::recv`] and one outbound channel written
//! through [`Transport::send`]. Framing (lines, HTTP bodies, SSE events) is
//! the transport's business; the session engine only ever sees [`Message`]s.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use wirekit_core::protocol::Message;

/// What a session knows about the conduit it runs over.
///
/// Only [`session_id`](Self::session_id) affects behavior: the session
/// engine uses it as its log label. The rest is for diagnostics.
#[derive(Debug, Clone)]
pub struct TransportMetadata {
    /// Short name of the transport: `memory`, `line`, `stdio`, `process`,
    /// `http` or `http-server`.
    pub kind: &'static str,
    /// Who is on the other end: an endpoint URL, a child pid, a pipe.
    pub peer: Option<String>,
    /// Session identifier carried by the transport, if any.
    pub session_id: Option<String>,
    /// Whether a dropped connection can be resumed from an event store.
    pub resumable: bool,
    /// When the transport was opened.
    pub opened_at: Instant,
    /// Anything else worth logging, such as a child's command line.
    pub extra: Option<serde_json::Value>,
}

impl TransportMetadata {
    /// Metadata for a transport of `kind` opened now.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            peer: None,
            session_id: None,
            resumable: false,
            opened_at: Instant::now(),
            extra: None,
        }
    }

    /// Describe the other end.
    #[must_use]
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Record the transport's session identifier. Such transports can be
    /// resumed.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self.resumable = true;
        self
    }

    /// Attach extra diagnostics.
    #[must_use]
    pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
        self.extra = Some(extra);
        self
    }
}

/// Core transport trait.
///
/// Implementations must allow `send` and `recv` to be called concurrently
/// from different tasks: the session engine reads from one task and writes
/// from another.
///
/// `recv` must be cancel-safe. The engine races it against its shutdown
/// signal, and a cancelled `recv` must not lose a message.
pub trait Transport: Send + Sync {
    /// Failure type; the session engine converts it into `RpcError`.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Hand a message to the transport.
    ///
    /// Returning `Ok` means the transport accepted the message, not that the
    /// peer received it.
    fn send(&self, msg: Message) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receive the next message.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed and `Err`
    /// on transport faults (including framing errors).
    fn recv(&self) -> impl Future<Output = Result<Option<Message>, Self::Error>> + Send;

    /// Close the transport. Afterwards `recv` on the peer returns `Ok(None)`
    /// once anything already sent has been read.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Whether the transport can still carry messages.
    fn is_connected(&self) -> bool;

    /// Describe the transport.
    fn metadata(&self) -> TransportMetadata;
}

impl<T: Transport> Transport for Arc<T> {
    type Error = T::Error;

    fn send(&self, msg: Message) -> impl Future<Output = Result<(), Self::Error>> + Send {
        (**self).send(msg)
    }

    fn recv(&self) -> impl Future<Output = Result<Option<Message>, Self::Error>> + Send {
        (**self).recv()
    }

    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send {
        (**self).close()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn metadata(&self) -> TransportMetadata {
        (**self).metadata()
    }
}
