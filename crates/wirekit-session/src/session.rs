//! The session handle and its builder.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use wirekit_core::capability::{
    InitializeParams, InitializeResult, Negotiated, is_version_supported,
};
use wirekit_core::error::{RpcError, TransportContext};
use wirekit_core::protocol::{Message, Notification, ProgressToken, Request, RequestId};
use wirekit_core::state::SessionState;
use wirekit_core::types::{CancelledParams, method};
use wirekit_transport::{Transport, TransportMetadata};

use crate::config::SessionConfig;
use crate::context::RequestContext;
use crate::engine;
use crate::handler::{NotificationListener, RequestHandler, Typed};
use crate::inflight::{InFlight, Pending, ProgressSink};

/// Which side of the handshake this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends `initialize`.
    Client,
    /// Answers `initialize`.
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

/// Per-call options for [`Session::send_request_with`].
#[derive(Debug, Default)]
pub struct RequestOptions {
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
    progress: Option<ProgressSink>,
}

impl RequestOptions {
    /// Options that use the session defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the session's request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abandon the request when `token` fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Ask the peer for progress and deliver updates to `sink`.
    #[must_use]
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }
}

/// Everything one session shares between its handle, its tasks and the
/// handlers it runs.
pub(crate) struct Inner {
    pub(crate) label: String,
    pub(crate) role: Role,
    pub(crate) config: SessionConfig,
    pub(crate) metadata: TransportMetadata,
    pub(crate) handlers: Arc<HashMap<String, Arc<dyn RequestHandler>>>,
    pub(crate) state: watch::Sender<SessionState>,
    pub(crate) inflight: InFlight,
    pub(crate) outbound: mpsc::Sender<Message>,
    pub(crate) notifications: Option<mpsc::UnboundedSender<Notification>>,
    pub(crate) negotiated: OnceLock<Negotiated>,
    pub(crate) close_reason: OnceLock<String>,
    pub(crate) handler_slots: Arc<Semaphore>,
    pub(crate) handler_tasks: TaskTracker,
    /// Fires when teardown starts; stops the reader and every handler.
    pub(crate) shutdown: CancellationToken,
    /// Fires once the writer has flushed and the transport is closed.
    pub(crate) finished: CancellationToken,
    next_id: AtomicI64,
}

impl Inner {
    pub(crate) fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `next` if the state machine allows it.
    pub(crate) fn transition(&self, next: SessionState) -> bool {
        let mut from = None;
        let changed = self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                from = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });
        if let Some(from) = from {
            tracing::debug!(session = %self.label, %from, to = %next, "session state changed");
        }
        changed
    }

    pub(crate) fn transport_context(&self) -> TransportContext {
        TransportContext::new(self.metadata.kind)
            .with_peer(self.metadata.peer.clone())
            .with_session_id(self.metadata.session_id.clone())
    }

    pub(crate) fn closed_error(&self) -> RpcError {
        RpcError::session_closed(self.close_reason.get().cloned())
    }

    /// Queue a message for the writer task.
    pub(crate) async fn enqueue(&self, msg: Message) -> Result<(), RpcError> {
        if self.state().is_closed() {
            return Err(self.closed_error());
        }
        self.outbound
            .send(msg)
            .await
            .map_err(|_| self.closed_error())
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Tear the session down. Only the first call has any effect.
    pub(crate) fn teardown(&self, reason: impl Into<String>) {
        self.shut_down(reason.into(), None);
    }

    /// Tear down after a fatal transport error. Outstanding callers see the
    /// error itself when it tells them how to recover, and `SessionClosed`
    /// otherwise.
    pub(crate) fn fail(&self, context: &str, error: &RpcError) {
        self.shut_down(format!("{context}: {error}"), Some(error));
    }

    fn shut_down(&self, reason: String, cause: Option<&RpcError>) {
        if self.close_reason.set(reason.clone()).is_err() {
            return;
        }
        self.transition(SessionState::Closed);
        tracing::debug!(session = %self.label, reason = %reason, "session torn down");

        self.inflight.fail_all(|| match cause {
            Some(RpcError::SessionNotFound { session_id }) => RpcError::SessionNotFound {
                session_id: session_id.clone(),
            },
            Some(RpcError::ReplayExpired { stream_id, after }) => RpcError::ReplayExpired {
                stream_id: stream_id.clone(),
                after: *after,
            },
            _ => RpcError::session_closed(Some(reason.clone())),
        });
        self.handler_tasks.close();
        self.shutdown.cancel();
    }

    /// Send a request and wait for its Response, without checking the
    /// session state.
    pub(crate) async fn call(
        self: &Arc<Self>,
        method_name: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, RpcError> {
        let id = self.next_request_id();
        let mut request = match params {
            Some(params) => Request::with_params(method_name.to_string(), id.clone(), params),
            None => Request::new(method_name.to_string(), id.clone()),
        };

        let mut progress = None;
        if let Some(sink) = options.progress {
            let token = ProgressToken::from(&id);
            if request.set_progress_token(&token) {
                self.inflight.route_progress_to(token.clone(), sink);
                progress = Some(token);
            } else {
                tracing::debug!(request_id = %id, method = method_name, "positional params cannot carry a progress token");
            }
        }

        let (reply, rx) = oneshot::channel();
        self.inflight.register(
            id.clone(),
            Pending {
                method: method_name.to_string(),
                reply,
                progress,
            },
        );
        let guard = OutstandingRequest {
            inner: Arc::clone(self),
            id: id.clone(),
            armed: true,
        };

        tracing::trace!(session = %self.label, request_id = %id, method = method_name, "sending request");
        self.enqueue(request.into()).await?;

        let timeout = options.timeout.unwrap_or(self.config.request_timeout);
        let cancel = options.cancel.unwrap_or_default();

        tokio::select! {
            biased;
            outcome = rx => {
                guard.disarm();
                outcome.unwrap_or_else(|_| Err(self.closed_error()))
            }
            () = cancel.cancelled() => {
                guard.abandon("cancelled by caller");
                Err(RpcError::cancelled_with_reason(method_name, "cancelled by caller"))
            }
            () = tokio::time::sleep(timeout) => {
                tracing::debug!(session = %self.label, request_id = %id, method = method_name, ?timeout, "request timed out");
                guard.abandon("timeout");
                Err(RpcError::timeout(method_name, timeout))
            }
        }
    }
}

/// Removes an outstanding request from the table when the caller stops
/// waiting, and tells the peer so.
struct OutstandingRequest {
    inner: Arc<Inner>,
    id: RequestId,
    armed: bool,
}

impl OutstandingRequest {
    fn disarm(mut self) {
        self.armed = false;
    }

    fn abandon(mut self, reason: &str) {
        self.armed = false;
        self.cancel_remote(reason);
    }

    fn cancel_remote(&self, reason: &str) {
        if !self.inner.inflight.abandon(&self.id) || self.inner.state().is_closed() {
            return;
        }
        let note: Message = CancelledParams {
            request_id: self.id.clone(),
            reason: Some(reason.to_string()),
        }
        .into_notification()
        .into();

        // Best effort: a full queue defers the notice to a task.
        match self.inner.outbound.try_send(note) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(note)) => {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let outbound = self.inner.outbound.clone();
                    runtime.spawn(async move {
                        let _ = outbound.send(note).await;
                    });
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

impl Drop for OutstandingRequest {
    fn drop(&mut self) {
        if self.armed {
            self.cancel_remote("request dropped by caller");
        }
    }
}

/// A live session.
///
/// Cheap to clone; every clone drives the same session. The session keeps
/// running until [`close`](Self::close) is called or the peer disconnects.
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("label", &self.inner.label)
            .field("role", &self.inner.role)
            .field("state", &self.inner.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Start configuring a session.
    #[must_use]
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Identifier used in logs: the transport's session id when it has one.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Which side of the handshake this session plays.
    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Watch lifecycle changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Whether arbitrary requests may be sent.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// The handshake outcome, once negotiated.
    #[must_use]
    pub fn negotiated(&self) -> Option<&Negotiated> {
        self.inner.negotiated.get()
    }

    /// Metadata of the underlying transport.
    #[must_use]
    pub fn transport_metadata(&self) -> &TransportMetadata {
        &self.inner.metadata
    }

    /// Why the session ended, once it has.
    #[must_use]
    pub fn close_reason(&self) -> Option<&str> {
        self.inner.close_reason.get().map(String::as_str)
    }

    /// Number of outgoing requests awaiting a Response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.inflight.outgoing_len()
    }

    /// Number of incoming requests being handled.
    #[must_use]
    pub fn active_handlers(&self) -> usize {
        self.inner.inflight.incoming_len()
    }

    /// Wait until the handshake completes.
    pub async fn initialized(&self) -> Result<(), RpcError> {
        let mut changes = self.inner.state.subscribe();
        let reached = changes
            .wait_for(|state| state.is_active() || state.is_shutting_down())
            .await
            .map(|state| state.is_active());
        match reached {
            Ok(true) => Ok(()),
            _ => Err(self.inner.closed_error()),
        }
    }

    /// Send a request with the default timeout and wait for its result.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.send_request_with(method, params, RequestOptions::default())
            .await
    }

    /// Send a request and wait for its result, a timeout or cancellation.
    ///
    /// On timeout or cancellation the peer is sent `notifications/cancelled`
    /// for the request, and a Response arriving later is discarded. Dropping
    /// the returned future has the same effect.
    pub async fn send_request_with(
        &self,
        method: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Value, RpcError> {
        match self.state() {
            SessionState::Active => {}
            SessionState::Closing | SessionState::Closed => return Err(self.inner.closed_error()),
            SessionState::Uninitialized | SessionState::Initializing if method == method::PING => {}
            state => {
                return Err(RpcError::invalid_request(format!(
                    "cannot send '{method}' while the session is {state}"
                )));
            }
        }
        self.inner.call(method, params, options).await
    }

    /// Send a request with typed params and result.
    pub async fn request<P, R>(&self, method: &str, params: &P) -> Result<R, RpcError>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let params =
            serde_json::to_value(params).map_err(|e| RpcError::invalid_params_from(method, e))?;
        let params = (!params.is_null()).then_some(params);
        let result = self.send_request(method, params).await?;
        serde_json::from_value(result).map_err(|e| {
            RpcError::internal_with_source(format!("unexpected result for '{method}'"), e)
        })
    }

    /// Check that the peer is responsive.
    pub async fn ping(&self) -> Result<(), RpcError> {
        self.send_request(method::PING, None).await.map(|_| ())
    }

    /// Send a notification. Returns once the message is queued for the
    /// transport, not once it is delivered.
    pub async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let note = match params {
            Some(params) => Notification::with_params(method.to_string(), params),
            None => Notification::new(method.to_string()),
        };
        self.send_raw(note.into()).await
    }

    pub(crate) async fn send_raw(&self, msg: Message) -> Result<(), RpcError> {
        self.inner.enqueue(msg).await
    }

    /// Close the session.
    ///
    /// Stops accepting new requests, waits up to the configured close
    /// timeout for outstanding requests and running handlers, then closes
    /// the transport. Requests still unresolved fail with `SessionClosed`.
    pub async fn close(&self) -> Result<(), RpcError> {
        if self.inner.transition(SessionState::Closing) {
            let drained = tokio::time::timeout(
                self.inner.config.close_timeout,
                self.inner.inflight.drained(),
            )
            .await;
            if drained.is_err() {
                tracing::warn!(
                    session = %self.inner.label,
                    pending = self.inner.inflight.outgoing_len(),
                    handlers = self.inner.inflight.incoming_len(),
                    "close timed out with work still in flight"
                );
            }
            self.inner.teardown("closed locally");
        }
        self.closed().await;
        Ok(())
    }

    /// Wait until the session has fully shut down.
    pub async fn closed(&self) {
        self.inner.finished.cancelled().await;
    }

    /// Client handshake: offer our version and capabilities, check the
    /// answer, confirm with `notifications/initialized`.
    async fn handshake(&self) -> Result<(), RpcError> {
        let inner = &self.inner;
        inner.transition(SessionState::Initializing);

        let config = &inner.config;
        let params = InitializeParams {
            protocol_version: config.protocol_version.clone(),
            capabilities: config.capabilities.clone(),
            client_info: config.info.clone(),
        };
        let params = serde_json::to_value(params)
            .map_err(|e| RpcError::invalid_params_from(method::INITIALIZE, e))?;

        let options = RequestOptions::new().with_timeout(config.initialize_timeout);
        let result = inner
            .call(method::INITIALIZE, Some(params), options)
            .await
            .map_err(|e| match e {
                RpcError::Remote(remote) => RpcError::handshake_failed_with_versions(
                    remote.message.clone(),
                    Some(config.protocol_version.clone()),
                    None,
                ),
                other => other,
            })?;

        let result: InitializeResult = serde_json::from_value(result).map_err(|e| {
            RpcError::handshake_failed(format!("malformed initialize result: {e}"))
        })?;
        if !is_version_supported(&result.protocol_version) {
            tracing::warn!(
                session = %inner.label,
                peer_version = %result.protocol_version,
                "peer chose an unsupported protocol version"
            );
            return Err(RpcError::handshake_failed_with_versions(
                "unsupported protocol version",
                Some(config.protocol_version.clone()),
                Some(result.protocol_version),
            ));
        }

        let _ = inner.negotiated.set(Negotiated {
            protocol_version: result.protocol_version.clone(),
            peer_info: Some(result.server_info.clone()),
            peer_capabilities: result.capabilities,
        });
        self.send_notification(method::INITIALIZED, None).await?;
        inner.transition(SessionState::Active);

        tracing::info!(
            session = %inner.label,
            peer = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "session initialized"
        );
        Ok(())
    }
}

/// Registers handlers and starts sessions over transports.
///
/// A builder can start any number of sessions; each gets its own in-flight
/// tables and tasks but shares the registered handlers.
#[derive(Clone)]
pub struct SessionBuilder {
    config: SessionConfig,
    handlers: Arc<HashMap<String, Arc<dyn RequestHandler>>>,
    listener: Option<Arc<dyn NotificationListener>>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("methods", &methods)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl SessionBuilder {
    /// Create a builder with no handlers.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            handlers: Arc::new(HashMap::new()),
            listener: None,
        }
    }

    /// The configuration sessions will use.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Serve `method` with an async closure.
    #[must_use]
    pub fn handler<F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        self.service(method, handler)
    }

    /// Serve `method` with typed params and result.
    #[must_use]
    pub fn typed_handler<F, Fut, P, R>(self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        let method = method.into();
        let typed = Typed::new(method.clone(), handler);
        self.service(method, typed)
    }

    /// Serve `method` with any [`RequestHandler`].
    #[must_use]
    pub fn service(mut self, method: impl Into<String>, handler: impl RequestHandler) -> Self {
        Arc::make_mut(&mut self.handlers).insert(method.into(), Arc::new(handler));
        self
    }

    /// Receive notifications with an async closure.
    #[must_use]
    pub fn on_notification<F, Fut>(self, listener: F) -> Self
    where
        F: Fn(Notification, Session) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.listener(listener)
    }

    /// Receive notifications with any [`NotificationListener`].
    #[must_use]
    pub fn listener(mut self, listener: impl NotificationListener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    /// Whether a handler is registered for `method`.
    #[must_use]
    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Start a client session and perform the handshake.
    pub async fn connect<T>(&self, transport: T) -> Result<Session, RpcError>
    where
        T: Transport + 'static,
        RpcError: From<T::Error>,
    {
        let session = self.start(transport, Role::Client, SessionState::Uninitialized);
        match session.handshake().await {
            Ok(()) => Ok(session),
            Err(e) => {
                tracing::warn!(session = %session.label(), error = %e, "handshake failed");
                session.inner.teardown(format!("handshake failed: {e}"));
                session.closed().await;
                Err(e)
            }
        }
    }

    /// Start a server session. It becomes active once the peer's
    /// `initialize` exchange completes; see [`Session::initialized`].
    pub fn accept<T>(&self, transport: T) -> Session
    where
        T: Transport + 'static,
        RpcError: From<T::Error>,
    {
        self.start(transport, Role::Server, SessionState::Uninitialized)
    }

    /// Start a session whose handshake already happened elsewhere, for
    /// example on another server instance sharing an event store.
    pub fn resume<T>(&self, transport: T, role: Role, protocol_version: Option<String>) -> Session
    where
        T: Transport + 'static,
        RpcError: From<T::Error>,
    {
        let session = self.start(transport, role, SessionState::Active);
        let _ = session.inner.negotiated.set(Negotiated {
            protocol_version: protocol_version
                .unwrap_or_else(|| self.config.protocol_version.clone()),
            peer_info: None,
            peer_capabilities: wirekit_core::capability::Capabilities::default(),
        });
        tracing::info!(session = %session.label(), %role, "session resumed");
        session
    }

    fn start<T>(&self, transport: T, role: Role, initial: SessionState) -> Session
    where
        T: Transport + 'static,
        RpcError: From<T::Error>,
    {
        let metadata = transport.metadata();
        let label = metadata.session_id.clone().unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            id[..8].to_string()
        });

        let (outbound, outbound_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let (notifications, notifications_rx) = match &self.listener {
            Some(_) => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(rx))
            }
            None => (None, None),
        };
        let (state, _) = watch::channel(initial);

        let inner = Arc::new(Inner {
            label,
            role,
            config: self.config.clone(),
            metadata,
            handlers: Arc::clone(&self.handlers),
            state,
            inflight: InFlight::default(),
            outbound,
            notifications,
            negotiated: OnceLock::new(),
            close_reason: OnceLock::new(),
            handler_slots: Arc::new(Semaphore::new(self.config.max_concurrent_handlers.max(1))),
            handler_tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            finished: CancellationToken::new(),
            next_id: AtomicI64::new(1),
        });
        let session = Session { inner };

        let transport = Arc::new(transport);
        engine::spawn_writer(Arc::clone(&session.inner), Arc::clone(&transport), outbound_rx);
        engine::spawn_reader(session.clone(), transport);
        if let (Some(listener), Some(rx)) = (self.listener.clone(), notifications_rx) {
            engine::spawn_listener(session.clone(), listener, rx);
        }

        tracing::debug!(session = %session.label(), %role, state = %initial, "session started");
        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirekit_transport::MemoryTransport;

    #[test]
    fn test_request_options() {
        let token = CancellationToken::new();
        let options = RequestOptions::new()
            .with_timeout(Duration::from_secs(3))
            .with_cancellation(token);
        assert_eq!(options.timeout, Some(Duration::from_secs(3)));
        assert!(options.cancel.is_some());
        assert!(options.progress.is_none());
    }

    #[test]
    fn test_builder_registration() {
        let builder = SessionBuilder::default()
            .handler("a", |_params, _ctx: RequestContext| async move { Ok(Value::Null) })
            .typed_handler("b", |n: i64, _ctx| async move { Ok::<_, RpcError>(n + 1) });
        assert!(builder.has_handler("a"));
        assert!(builder.has_handler("b"));
        assert!(!builder.has_handler("c"));

        // Clones share handlers registered before the clone only.
        let extended = builder.clone().handler("c", |_params, _ctx: RequestContext| async move {
            Ok(Value::Null)
        });
        assert!(extended.has_handler("c"));
        assert!(!builder.has_handler("c"));
        assert!(format!("{extended:?}").contains("\"c\""));
    }

    #[tokio::test]
    async fn test_uninitialized_session_refuses_requests() {
        let (ours, _theirs) = MemoryTransport::pair();
        let session = SessionBuilder::default().accept(ours);
        assert_eq!(session.role(), Role::Server);
        assert_eq!(session.state(), SessionState::Uninitialized);

        let err = session
            .send_request("anything", None)
            .await
            .expect_err("not initialized");
        assert!(matches!(err, RpcError::InvalidRequest { .. }));
        assert_eq!(session.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() -> Result<(), RpcError> {
        let (ours, _theirs) = MemoryTransport::pair();
        let session = SessionBuilder::default().accept(ours);
        session.close().await?;
        session.close().await?;
        assert!(session.state().is_closed());
        assert_eq!(session.close_reason(), Some("closed locally"));
        Ok(())
    }
}
