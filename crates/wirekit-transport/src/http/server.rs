//! Server side of the streaming HTTP transport.
//!
//! [`StreamableHttpService`] is an axum service hosting many sessions on one
//! endpoint:
//!
//! - `POST` carries client messages. A body holding at least one request is
//!   answered with an event stream that ends once every request in the body
//!   has its response; anything else is answered with `202 Accepted`.
//! - `GET` opens a standalone event stream for server-initiated messages.
//! - `DELETE` terminates the session.
//!
//! Every message the session sends is appended to the event store first and
//! then broadcast to whichever streams are attached. Each SSE event carries
//! its sequence number as `id`, so a client that reconnects with
//! `Last-Event-ID` receives exactly what it missed.
//!
//! When a request names a session this instance does not host, the service
//! consults the configured event store. A stream in the store proves the
//! session existed, so a fresh local session is attached and the application
//! is told to resume it. Without a configured store the request is refused.

use std::collections::HashSet;
use std::convert::Infallible;
use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_lock::Mutex as AsyncMutex;
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::Stream;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use wirekit_core::error::{JsonRpcError, codes};
use wirekit_core::protocol::{Message, RequestId};
use wirekit_core::types::method;

use crate::error::TransportError;
use crate::event_store::{EventStore, EventStoreConfig, MemoryEventStore, StoreError, StoredEvent};
use crate::traits::{Transport, TransportMetadata};

use super::config::{
    HttpServerConfig, LAST_EVENT_ID_HEADER, PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER,
};

/// How a session handed to the application came to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStart {
    /// A client sent `initialize` without a session id.
    New,
    /// A client named a session this instance does not host, and the shared
    /// event store holds its stream. The handshake already happened
    /// elsewhere, so the session should start out active.
    Resumed {
        /// Protocol version the client announced in its request headers.
        protocol_version: Option<String>,
    },
}

type SessionCallback = Arc<dyn Fn(HttpServerTransport, SessionStart) + Send + Sync>;

/// Per-session state shared between the HTTP handlers and the transport.
struct SessionSlot {
    id: String,
    inbound: mpsc::Sender<Message>,
    live: broadcast::Sender<StoredEvent>,
    closed: CancellationToken,
    created: Instant,
    last_active_ms: AtomicU64,
}

impl SessionSlot {
    fn new(id: String, capacity: usize) -> (Arc<Self>, mpsc::Receiver<Message>) {
        let (inbound, inbound_rx) = mpsc::channel(capacity);
        let (live, _) = broadcast::channel(capacity);
        let slot = Arc::new(Self {
            id,
            inbound,
            live,
            closed: CancellationToken::new(),
            created: Instant::now(),
            last_active_ms: AtomicU64::new(0),
        });
        (slot, inbound_rx)
    }

    fn touch(&self) {
        let elapsed = self.created.elapsed().as_millis() as u64;
        self.last_active_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last)
    }
}

/// The transport handed to the application for one HTTP session.
pub struct HttpServerTransport {
    slot: Arc<SessionSlot>,
    inbound: AsyncMutex<mpsc::Receiver<Message>>,
    store: Arc<dyn EventStore>,
    metadata: TransportMetadata,
}

impl HttpServerTransport {
    /// The session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.slot.id
    }
}

impl Transport for HttpServerTransport {
    type Error = TransportError;

    /// Append to the session's stream, then push to any attached listener.
    /// Never waits for a client to be connected.
    async fn send(&self, msg: Message) -> Result<(), Self::Error> {
        if self.slot.closed.is_cancelled() {
            return Err(TransportError::NotConnected);
        }
        let seq = self.store.append(&self.slot.id, msg.clone()).await?;
        self.slot.touch();
        // No receivers just means nobody is attached right now.
        let _ = self.slot.live.send(StoredEvent {
            stream_id: self.slot.id.clone(),
            seq,
            message: msg,
        });
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Message>, Self::Error> {
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            biased;
            msg = inbound.recv() => Ok(msg),
            () = self.slot.closed.cancelled() => Ok(None),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.slot.closed.cancel();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.slot.closed.is_cancelled()
    }

    fn metadata(&self) -> TransportMetadata {
        self.metadata.clone()
    }
}

struct ServiceState {
    config: HttpServerConfig,
    store: Arc<dyn EventStore>,
    roaming: bool,
    sessions: DashMap<String, Arc<SessionSlot>>,
    on_session: SessionCallback,
}

impl ServiceState {
    fn attach(&self, id: String) -> (Arc<SessionSlot>, HttpServerTransport) {
        let (slot, inbound) = SessionSlot::new(id, self.config.channel_capacity.max(1));
        slot.touch();
        let transport = HttpServerTransport {
            slot: Arc::clone(&slot),
            inbound: AsyncMutex::new(inbound),
            store: Arc::clone(&self.store),
            metadata: TransportMetadata::new("http-server").with_session_id(slot.id.clone()),
        };
        (slot, transport)
    }

    fn create_session(&self) -> Arc<SessionSlot> {
        let id = uuid::Uuid::new_v4().to_string();
        let (slot, transport) = self.attach(id.clone());
        self.sessions.insert(id.clone(), Arc::clone(&slot));
        tracing::info!(session_id = %id, "session created");
        (self.on_session)(transport, SessionStart::New);
        slot
    }

    /// Find the local session for `id`, resuming it from the store if this
    /// instance does not host it.
    async fn resolve(&self, id: &str, headers: &HeaderMap) -> Result<Arc<SessionSlot>, Response> {
        if let Some(slot) = self.sessions.get(id).map(|s| Arc::clone(s.value())) {
            if slot.closed.is_cancelled() {
                return Err(not_found(id));
            }
            return Ok(slot);
        }

        if !self.roaming {
            tracing::warn!(session_id = %id, "unknown session and no shared event store");
            return Err(not_found(id));
        }

        match self.store.contains(id).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(match self.store.replay(id, None).await {
                    Err(e @ StoreError::ReplayExpired { .. }) => store_error_response(&e),
                    _ => not_found(id),
                });
            }
            Err(e) => return Err(store_error_response(&e)),
        }

        let protocol_version = header_str(headers, PROTOCOL_VERSION_HEADER).map(str::to_string);
        let (slot, transport) = match self.sessions.entry(id.to_string()) {
            // Another request attached it while the store was consulted.
            Entry::Occupied(existing) => return Ok(Arc::clone(existing.get())),
            Entry::Vacant(vacant) => {
                let (slot, transport) = self.attach(id.to_string());
                vacant.insert(Arc::clone(&slot));
                (slot, transport)
            }
        };

        tracing::info!(session_id = %id, "session resumed from event store");
        (self.on_session)(transport, SessionStart::Resumed { protocol_version });
        Ok(slot)
    }

    /// Record client activity on a hosted session, locally and in the store,
    /// so the store's time-to-live runs from the session's last use.
    async fn keep_alive(&self, slot: &SessionSlot) {
        slot.touch();
        if let Err(e) = self.store.touch(&slot.id).await {
            tracing::warn!(session_id = %slot.id, error = %e, "failed to refresh stream");
        }
    }

    /// Drop closed and idle sessions, then prune the store.
    async fn sweep(&self) {
        let idle_timeout = self.config.session_idle_timeout;
        let mut finished = Vec::new();
        let mut idle = Vec::new();

        self.sessions.retain(|id, slot| {
            if slot.closed.is_cancelled() {
                finished.push(id.clone());
                false
            } else if slot.idle_for() >= idle_timeout {
                slot.closed.cancel();
                idle.push(id.clone());
                false
            } else {
                true
            }
        });

        for id in &idle {
            tracing::info!(session_id = %id, "idle session dropped");
        }

        // A shared store keeps idle streams so another instance can resume them.
        let expire = finished
            .iter()
            .chain(idle.iter().filter(|_| !self.roaming));
        for id in expire {
            if let Err(e) = self.store.expire(id).await {
                tracing::warn!(session_id = %id, error = %e, "failed to expire stream");
            }
        }

        match self.store.prune_expired().await {
            Ok(0) => {}
            Ok(dropped) => tracing::debug!(dropped, "pruned expired events"),
            Err(e) => tracing::warn!(error = %e, "event store pruning failed"),
        }
    }
}

/// Axum service hosting streaming HTTP sessions.
///
/// # Example
///
/// ```no_run
/// use wirekit_transport::http::{HttpServerConfig, SessionStart, StreamableHttpService};
///
/// # async fn example() -> Result<(), wirekit_transport::TransportError> {
/// let service = StreamableHttpService::new(HttpServerConfig::new(), |transport, start| {
///     // Hand `transport` to a session engine here.
///     let _ = (transport, start);
/// });
/// let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
/// service.serve(listener).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StreamableHttpService {
    state: Arc<ServiceState>,
}

impl StreamableHttpService {
    /// Create the service.
    ///
    /// `on_session` runs for every session this instance starts hosting. It
    /// must not block; spawn the session engine and return.
    pub fn new<F>(config: HttpServerConfig, on_session: F) -> Self
    where
        F: Fn(HttpServerTransport, SessionStart) + Send + Sync + 'static,
    {
        let (store, roaming): (Arc<dyn EventStore>, bool) = match &config.event_store {
            Some(store) => (Arc::clone(store), true),
            // A private store lives exactly as long as the sessions it serves.
            None => {
                let retention = EventStoreConfig::new().with_ttl(config.session_idle_timeout);
                (Arc::new(MemoryEventStore::with_config(retention)), false)
            }
        };
        Self {
            state: Arc::new(ServiceState {
                config,
                store,
                roaming,
                sessions: DashMap::new(),
                on_session: Arc::new(on_session),
            }),
        }
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &HttpServerConfig {
        &self.state.config
    }

    /// Number of sessions hosted by this instance.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.sessions.len()
    }

    /// Build the axum router serving the endpoint.
    pub fn router(&self) -> Router {
        Router::new()
            .route(
                &self.state.config.endpoint_path,
                post(handle_post).get(handle_get).delete(handle_delete),
            )
            .layer(DefaultBodyLimit::max(self.state.config.max_message_size))
            .with_state(Arc::clone(&self.state))
    }

    /// Periodically drop idle sessions and prune the event store.
    ///
    /// The task stops once the service is dropped.
    pub fn spawn_maintenance(&self, interval: Duration) -> JoinHandle<()> {
        let state: Weak<ServiceState> = Arc::downgrade(&self.state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(state) = state.upgrade() else {
                    break;
                };
                state.sweep().await;
            }
        })
    }

    /// Serve on `listener` until the server fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), TransportError> {
        self.serve_with_shutdown(listener, std::future::pending()).await
    }

    /// Serve on `listener` until `shutdown` completes.
    pub async fn serve_with_shutdown<S>(
        self,
        listener: TcpListener,
        shutdown: S,
    ) -> Result<(), TransportError>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let sweep_every = (self.state.config.session_idle_timeout / 4)
            .clamp(Duration::from_secs(1), Duration::from_secs(60));
        let maintenance = self.spawn_maintenance(sweep_every);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, path = %self.state.config.endpoint_path, "HTTP server started");
        }

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .into_future()
            .await;
        maintenance.abort();

        result.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            TransportError::connection(format!("server error: {e}"))
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, LAST_EVENT_ID_HEADER).and_then(|v| v.trim().parse().ok())
}

fn rpc_error_response(status: StatusCode, error: JsonRpcError) -> Response {
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": error,
    });
    (status, Json(body)).into_response()
}

fn not_found(session_id: &str) -> Response {
    rpc_error_response(
        StatusCode::NOT_FOUND,
        JsonRpcError::new(
            codes::SESSION_NOT_FOUND,
            format!("session not found: {session_id}"),
        ),
    )
}

fn store_error_response(err: &StoreError) -> Response {
    match err {
        StoreError::ReplayExpired {
            stream_id,
            after,
            earliest,
        } => rpc_error_response(
            StatusCode::GONE,
            JsonRpcError::new(codes::REPLAY_EXPIRED, err.to_string()).with_data(
                serde_json::json!({
                    "streamId": stream_id,
                    "after": after,
                    "earliest": earliest,
                }),
            ),
        ),
        StoreError::StreamNotFound { stream_id } => not_found(stream_id),
        StoreError::CursorAhead { .. } => rpc_error_response(
            StatusCode::BAD_REQUEST,
            JsonRpcError::invalid_request(err.to_string()),
        ),
        StoreError::Backend { .. } => rpc_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            JsonRpcError::internal_error(err.to_string()),
        ),
    }
}

/// Validate the origin header for DNS rebinding protection.
fn validate_origin(headers: &HeaderMap, config: &HttpServerConfig) -> Result<(), Response> {
    if config.allowed_origins.is_empty() {
        return Ok(());
    }
    // Requests without an Origin header come from non-browser clients.
    match header_str(headers, header::ORIGIN.as_str()) {
        Some(origin) if !config.is_origin_allowed(origin) => {
            tracing::warn!(origin = %origin, "rejecting request from disallowed origin");
            Err((StatusCode::FORBIDDEN, "Origin not allowed").into_response())
        }
        _ => Ok(()),
    }
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    header_str(headers, header::ACCEPT.as_str())
        .is_none_or(|accept| accept.contains("text/event-stream") || accept.contains("*/*"))
}

fn missing_session_header() -> Response {
    rpc_error_response(
        StatusCode::BAD_REQUEST,
        JsonRpcError::invalid_request(format!("missing {SESSION_ID_HEADER} header")),
    )
}

/// Replay the backlog after `cursor`. A stream that has no events yet is an
/// empty backlog.
async fn backlog(
    store: &dyn EventStore,
    session_id: &str,
    cursor: u64,
) -> Result<Vec<StoredEvent>, Response> {
    match store.replay(session_id, Some(cursor)).await {
        Ok(events) => Ok(events),
        Err(StoreError::StreamNotFound { .. }) if cursor == 0 => Ok(Vec::new()),
        Err(e) => Err(store_error_response(&e)),
    }
}

async fn cursor_for(store: &dyn EventStore, session_id: &str, headers: &HeaderMap) -> u64 {
    match last_event_id(headers) {
        Some(cursor) => cursor,
        None => store
            .last_sequence(session_id)
            .await
            .ok()
            .flatten()
            .unwrap_or(0),
    }
}

async fn handle_post(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = validate_origin(&headers, &state.config) {
        return response;
    }
    if !accepts_event_stream(&headers) {
        return (StatusCode::NOT_ACCEPTABLE, "Must accept text/event-stream").into_response();
    }
    if body.len() > state.config.max_message_size {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "Message too large: {} bytes (max {})",
                body.len(),
                state.config.max_message_size
            ),
        )
            .into_response();
    }

    let messages = match Message::decode_batch(&body) {
        Ok(messages) => messages,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting undecodable POST body");
            return rpc_error_response(
                StatusCode::BAD_REQUEST,
                JsonRpcError::parse_error(e.to_string()),
            );
        }
    };

    let (slot, created) = match header_str(&headers, SESSION_ID_HEADER) {
        Some(id) => match state.resolve(id, &headers).await {
            Ok(slot) => (slot, false),
            Err(response) => return response,
        },
        None => {
            let initializing = messages
                .iter()
                .any(|m| matches!(m, Message::Request(r) if r.method == method::INITIALIZE));
            if !initializing {
                return missing_session_header();
            }
            (state.create_session(), true)
        }
    };
    state.keep_alive(&slot).await;

    let awaiting: HashSet<RequestId> = messages
        .iter()
        .filter_map(|m| m.as_request().map(|r| r.id.clone()))
        .collect();

    if awaiting.is_empty() {
        for msg in messages {
            if slot.inbound.send(msg).await.is_err() {
                return not_found(&slot.id);
            }
        }
        return (StatusCode::ACCEPTED, [(SESSION_ID_HEADER, slot.id.clone())]).into_response();
    }

    // Subscribe before replaying so nothing falls between the two.
    let live = slot.live.subscribe();
    let cursor = if created {
        0
    } else {
        cursor_for(state.store.as_ref(), &slot.id, &headers).await
    };
    let backlog = match backlog(state.store.as_ref(), &slot.id, cursor).await {
        Ok(events) => events,
        Err(response) => return response,
    };

    for msg in messages {
        if slot.inbound.send(msg).await.is_err() {
            return not_found(&slot.id);
        }
    }

    let stream = event_stream(
        Arc::clone(&state),
        Arc::clone(&slot),
        live,
        backlog,
        cursor,
        Some(awaiting),
    );
    (
        [(SESSION_ID_HEADER, slot.id.clone())],
        Sse::new(stream).keep_alive(KeepAlive::new().interval(state.config.keep_alive)),
    )
        .into_response()
}

async fn handle_get(State(state): State<Arc<ServiceState>>, headers: HeaderMap) -> Response {
    if let Err(response) = validate_origin(&headers, &state.config) {
        return response;
    }
    if !accepts_event_stream(&headers) {
        return (StatusCode::NOT_ACCEPTABLE, "Must accept text/event-stream").into_response();
    }
    let Some(id) = header_str(&headers, SESSION_ID_HEADER) else {
        return missing_session_header();
    };
    let slot = match state.resolve(id, &headers).await {
        Ok(slot) => slot,
        Err(response) => return response,
    };
    state.keep_alive(&slot).await;

    let live = slot.live.subscribe();
    let cursor = cursor_for(state.store.as_ref(), &slot.id, &headers).await;
    let backlog = match backlog(state.store.as_ref(), &slot.id, cursor).await {
        Ok(events) => events,
        Err(response) => return response,
    };
    tracing::debug!(session_id = %slot.id, cursor, backlog = backlog.len(), "event stream attached");

    let stream = event_stream(
        Arc::clone(&state),
        Arc::clone(&slot),
        live,
        backlog,
        cursor,
        None,
    );
    (
        [(SESSION_ID_HEADER, slot.id.clone())],
        Sse::new(stream).keep_alive(KeepAlive::new().interval(state.config.keep_alive)),
    )
        .into_response()
}

async fn handle_delete(State(state): State<Arc<ServiceState>>, headers: HeaderMap) -> Response {
    if let Err(response) = validate_origin(&headers, &state.config) {
        return response;
    }
    let Some(id) = header_str(&headers, SESSION_ID_HEADER) else {
        return missing_session_header();
    };

    let known = if let Some((_, slot)) = state.sessions.remove(id) {
        slot.closed.cancel();
        true
    } else {
        state.roaming && state.store.contains(id).await.unwrap_or(false)
    };
    if !known {
        return not_found(id);
    }

    if let Err(e) = state.store.expire(id).await {
        tracing::warn!(session_id = %id, error = %e, "failed to expire stream");
    }
    tracing::info!(session_id = %id, "session terminated by client");
    (StatusCode::OK, "Session closed").into_response()
}

fn to_sse_event(event: &StoredEvent) -> Option<Event> {
    match event.message.encode() {
        Ok(data) => Some(Event::default().id(event.seq.to_string()).data(data)),
        Err(e) => {
            tracing::warn!(seq = event.seq, error = %e, "dropping unencodable event");
            None
        }
    }
}

enum Wake {
    Live(Result<StoredEvent, RecvError>),
    Heartbeat,
    Closed,
}

/// Deliver `backlog`, then live events, each at most once and in sequence
/// order.
///
/// With `awaiting` set, the stream ends after the responses to those
/// requests have been delivered. Without it, the stream lasts as long as
/// the session. While attached, the stream counts as activity on the session
/// once per keep-alive interval.
fn event_stream(
    state: Arc<ServiceState>,
    slot: Arc<SessionSlot>,
    mut live: broadcast::Receiver<StoredEvent>,
    backlog: Vec<StoredEvent>,
    cursor: u64,
    mut awaiting: Option<HashSet<RequestId>>,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut last = cursor;
        let mut pending = backlog;
        let mut heartbeat = tokio::time::interval(state.config.keep_alive);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.reset();

        loop {
            for event in pending.drain(..) {
                if event.seq <= last {
                    continue;
                }
                last = event.seq;
                slot.touch();

                let finished = match awaiting.as_mut() {
                    Some(ids) => {
                        if let Message::Response(response) = &event.message {
                            ids.remove(&response.id);
                        }
                        ids.is_empty()
                    }
                    None => false,
                };
                if let Some(sse) = to_sse_event(&event) {
                    yield Ok(sse);
                }
                if finished {
                    return;
                }
            }

            let wake = tokio::select! {
                biased;
                next = live.recv() => Wake::Live(next),
                () = slot.closed.cancelled() => Wake::Closed,
                _ = heartbeat.tick() => Wake::Heartbeat,
            };

            pending = match wake {
                Wake::Heartbeat => {
                    state.keep_alive(&slot).await;
                    Vec::new()
                }
                Wake::Live(Ok(event)) if event.seq <= last + 1 => vec![event],
                // Fell behind the broadcast or saw a gap: the store has it all.
                Wake::Live(Ok(_) | Err(RecvError::Lagged(_))) => {
                    match state.store.replay(&slot.id, Some(last)).await {
                        Ok(events) => events,
                        Err(e) => {
                            tracing::warn!(session_id = %slot.id, error = %e, "live replay failed");
                            break;
                        }
                    }
                }
                Wake::Live(Err(RecvError::Closed)) | Wake::Closed => break,
            };
        }
    }
}
