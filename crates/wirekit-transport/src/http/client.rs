//! Client side of the streaming HTTP transport.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_lock::Mutex as AsyncMutex;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use wirekit_core::protocol::{EnvelopeError, Message};

use crate::error::TransportError;
use crate::event_store::StoreError;
use crate::traits::{Transport, TransportMetadata};

use super::config::{
    HttpTransportConfig, LAST_EVENT_ID_HEADER, PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER,
};
use super::sse::{Admission, SseParser, Watermark};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Conditions that end the session for good.
#[derive(Debug, Clone)]
enum Fatal {
    SessionNotFound(String),
    Store(StoreError),
    Framing(EnvelopeError),
    Protocol(String),
    Lost(String),
}

impl Fatal {
    fn to_error(&self) -> TransportError {
        match self {
            Self::SessionNotFound(session_id) => TransportError::SessionNotFound {
                session_id: session_id.clone(),
            },
            Self::Store(e) => TransportError::Store(e.clone()),
            Self::Framing(e) => TransportError::Framing(e.clone()),
            Self::Protocol(message) => TransportError::protocol(message.clone()),
            Self::Lost(message) => TransportError::connection(message.clone()),
        }
    }
}

#[derive(Debug)]
struct ClientState {
    queue: VecDeque<Message>,
    mark: Watermark,
    session_id: Option<String>,
    fatal: Option<Fatal>,
}

enum Opened {
    Stream(Response),
    Unsupported,
    Fatal,
    Retry(String),
}

struct ClientShared {
    config: HttpTransportConfig,
    client: Client,
    state: AsyncMutex<ClientState>,
    notify: Notify,
    closed: AtomicBool,
    failed: AtomicBool,
    listener_started: AtomicBool,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// HTTP client transport with resumable SSE streams.
///
/// `send` POSTs the message and returns as soon as the server has accepted
/// it; response streams are read by background tasks. Every event carries a
/// sequence number, and events are released to `recv` strictly in sequence
/// order, each exactly once, however many streams deliver them.
///
/// If a stream breaks, a standalone GET stream reconnects with the last
/// delivered sequence number and the server replays what was missed.
pub struct HttpClientTransport {
    shared: Arc<ClientShared>,
    metadata: TransportMetadata,
}

impl HttpClientTransport {
    /// Create the transport. No request is made until the first `send`.
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::connection(format!("failed to create HTTP client: {e}")))?;

        let mut metadata = TransportMetadata::new("http").with_peer(config.endpoint.clone());
        if let Some(session_id) = &config.session_id {
            metadata = metadata.with_session_id(session_id.clone());
        }

        let state = ClientState {
            queue: VecDeque::new(),
            mark: Watermark::new(config.last_event_id),
            session_id: config.session_id.clone(),
            fatal: None,
        };

        Ok(Self {
            shared: Arc::new(ClientShared {
                config,
                client,
                state: AsyncMutex::new(state),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                listener_started: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
            metadata,
        })
    }

    /// Create the transport and, when resuming a known session, open the
    /// standalone event stream right away.
    pub async fn connect(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let transport = Self::new(config)?;
        if transport.shared.config.session_id.is_some() && transport.shared.config.open_event_stream
        {
            transport.shared.ensure_listener();
        }
        Ok(transport)
    }

    /// The session identifier, once the server has assigned one.
    pub async fn session_id(&self) -> Option<String> {
        self.shared.state.lock().await.session_id.clone()
    }

    /// The highest sequence number such that every event up to it has been
    /// delivered. Pass it to [`HttpTransportConfig::with_session`] to resume.
    pub async fn last_event_id(&self) -> u64 {
        self.shared.state.lock().await.mark.floor()
    }
}

impl ClientShared {
    async fn headers(&self, accept: &'static str) -> Result<HeaderMap, TransportError> {
        let (session_id, floor) = {
            let state = self.state.lock().await;
            (state.session_id.clone(), state.mark.floor())
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        headers.insert(
            PROTOCOL_VERSION_HEADER,
            HeaderValue::from_str(&self.config.protocol_version).map_err(|e| {
                TransportError::connection(format!("invalid protocol version header: {e}"))
            })?,
        );
        if let Some(sid) = session_id {
            headers.insert(
                SESSION_ID_HEADER,
                HeaderValue::from_str(&sid)
                    .map_err(|e| TransportError::connection(format!("invalid session ID header: {e}")))?,
            );
            headers.insert(LAST_EVENT_ID_HEADER, HeaderValue::from(floor));
        }
        for (name, value) in &self.config.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                    TransportError::connection(format!("invalid header name '{name}': {e}"))
                })?,
                HeaderValue::from_str(value).map_err(|e| {
                    TransportError::connection(format!("invalid header value for '{name}': {e}"))
                })?,
            );
        }
        Ok(headers)
    }

    async fn fail(&self, fatal: Fatal) {
        {
            let mut state = self.state.lock().await;
            if state.fatal.is_none() && !self.failed.load(Ordering::Acquire) {
                tracing::warn!(error = %fatal.to_error(), "HTTP session failed");
                state.fatal = Some(fatal);
            }
        }
        self.failed.store(true, Ordering::Release);
        self.shutdown.cancel();
        self.wake();
    }

    fn wake(&self) {
        self.notify.notify_one();
        self.notify.notify_waiters();
    }

    async fn remember_session(&self, response: &Response) {
        let Some(sid) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        let mut state = self.state.lock().await;
        if state.session_id.as_deref() != Some(sid) {
            tracing::debug!(session_id = %sid, "session established");
            state.session_id = Some(sid.to_string());
        }
    }

    /// Map a rejection status to the condition it reports.
    async fn rejection(&self, status: StatusCode, response: Response) -> TransportError {
        let session_id = self.state.lock().await.session_id.clone().unwrap_or_default();
        let body = response.bytes().await.unwrap_or_default();

        match status {
            StatusCode::NOT_FOUND => {
                let fatal = Fatal::SessionNotFound(session_id);
                let err = fatal.to_error();
                self.fail(fatal).await;
                err
            }
            StatusCode::GONE => {
                let data = serde_json::from_slice::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.pointer("/error/data").cloned())
                    .unwrap_or_default();
                let fatal = Fatal::Store(StoreError::ReplayExpired {
                    stream_id: session_id,
                    after: data.get("after").and_then(serde_json::Value::as_u64).unwrap_or(0),
                    earliest: data
                        .get("earliest")
                        .and_then(serde_json::Value::as_u64)
                        .unwrap_or(0),
                });
                let err = fatal.to_error();
                self.fail(fatal).await;
                err
            }
            _ => TransportError::protocol(format!(
                "HTTP {status}: {}",
                String::from_utf8_lossy(&body)
            )),
        }
    }

    async fn handle_post_response(self: &Arc<Self>, response: Response) -> Result<(), TransportError> {
        self.remember_session(&response).await;
        let status = response.status();

        if !status.is_success() {
            return Err(self.rejection(status, response).await);
        }
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_stream {
            let shared = Arc::clone(self);
            self.tasks.spawn(async move {
                if let Err(e) = shared.read_stream(response).await {
                    tracing::debug!(error = %e, "response stream broken; resuming via event stream");
                    shared.ensure_listener();
                }
            });
            if self.config.open_event_stream {
                self.ensure_listener();
            }
            return Ok(());
        }

        // A plain JSON body carries its messages directly.
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::connection(format!("failed to read response body: {e}")))?;
        if body.is_empty() {
            return Ok(());
        }
        if body.len() > self.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: body.len(),
                max: self.config.max_message_size,
            });
        }
        let messages = Message::decode_batch(&body)?;
        self.state.lock().await.queue.extend(messages);
        self.wake();
        Ok(())
    }

    /// Read one SSE response to its end.
    ///
    /// `Ok` means the stream ended cleanly or the session is over; `Err`
    /// means the stream broke and may be resumed.
    async fn read_stream(&self, response: Response) -> Result<(), TransportError> {
        let mut parser = SseParser::new(self.config.max_message_size);
        let mut body = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else {
                return Ok(());
            };
            let chunk =
                chunk.map_err(|e| TransportError::connection(format!("event stream error: {e}")))?;

            let events = match parser.push(&chunk) {
                Ok(events) => events,
                Err(e) => {
                    self.fail(Fatal::Protocol(e.to_string())).await;
                    return Ok(());
                }
            };

            let mut delivered = false;
            for event in events {
                if event.data.is_empty() {
                    continue;
                }
                let msg = match Message::decode(event.data.as_bytes()) {
                    Ok(msg) => msg,
                    Err(e) => {
                        self.fail(Fatal::Framing(e)).await;
                        return Ok(());
                    }
                };

                // Admission and enqueue happen under one lock so concurrent
                // streams cannot interleave out of order.
                let mut state = self.state.lock().await;
                match event.seq() {
                    None => state.queue.push_back(msg),
                    Some(seq) => match state.mark.admit(seq) {
                        Admission::Deliver => state.queue.push_back(msg),
                        Admission::Duplicate => {
                            tracing::trace!(seq, "dropping replayed event");
                            continue;
                        }
                        Admission::Gap => {
                            let floor = state.mark.floor();
                            drop(state);
                            if delivered {
                                self.wake();
                            }
                            return Err(TransportError::protocol(format!(
                                "event {seq} arrived before {}",
                                floor + 1
                            )));
                        }
                    },
                }
                delivered = true;
            }
            if delivered {
                self.wake();
            }
        }
    }

    fn ensure_listener(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() || self.listener_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(self);
        self.tasks.spawn(async move { shared.listen().await });
    }

    /// Keep the standalone GET stream open, reconnecting with backoff.
    async fn listen(self: Arc<Self>) {
        let mut attempts: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.open_event_stream().await {
                Opened::Stream(response) => {
                    attempts = 0;
                    if let Err(e) = self.read_stream(response).await {
                        tracing::debug!(error = %e, "event stream broken");
                    }
                }
                Opened::Unsupported => {
                    tracing::debug!("server does not offer a standalone event stream");
                    self.listener_started.store(false, Ordering::Release);
                    return;
                }
                Opened::Fatal => return,
                Opened::Retry(reason) => {
                    attempts += 1;
                    if attempts > self.config.max_reconnect_attempts {
                        self.fail(Fatal::Lost(format!(
                            "event stream lost after {} attempts: {reason}",
                            attempts - 1
                        )))
                        .await;
                        return;
                    }
                    tracing::debug!(attempts, reason = %reason, "event stream reconnect failed");
                }
            }

            let delay = self
                .config
                .reconnect_backoff
                .saturating_mul(1 << attempts.min(8))
                .min(MAX_BACKOFF);
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn open_event_stream(&self) -> Opened {
        if self.state.lock().await.session_id.is_none() {
            return Opened::Unsupported;
        }
        let headers = match self.headers("text/event-stream").await {
            Ok(headers) => headers,
            Err(e) => return Opened::Retry(e.to_string()),
        };

        let request = self.client.get(&self.config.endpoint).headers(headers).send();
        let response = match tokio::time::timeout(self.config.request_timeout, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Opened::Retry(e.to_string()),
            Err(_) => return Opened::Retry("timed out".to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return Opened::Stream(response);
        }
        match status {
            StatusCode::METHOD_NOT_ALLOWED => Opened::Unsupported,
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                let _ = self.rejection(status, response).await;
                Opened::Fatal
            }
            status => Opened::Retry(format!("HTTP {status}")),
        }
    }
}

impl Transport for HttpClientTransport {
    type Error = TransportError;

    async fn send(&self, msg: Message) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let body = msg.encode()?;
        if body.len() > self.shared.config.max_message_size {
            return Err(TransportError::MessageTooLarge {
                size: body.len(),
                max: self.shared.config.max_message_size,
            });
        }

        let headers = self
            .shared
            .headers("application/json, text/event-stream")
            .await?;
        let request = self
            .shared
            .client
            .post(&self.shared.config.endpoint)
            .headers(headers)
            .body(body)
            .send();

        let timeout = self.shared.config.request_timeout;
        let response = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "HTTP POST".to_string(),
                duration: timeout,
            })?
            .map_err(|e| TransportError::connection(format!("HTTP POST failed: {e}")))?;

        self.shared.handle_post_response(response).await
    }

    async fn recv(&self) -> Result<Option<Message>, Self::Error> {
        loop {
            let notified = self.shared.notify.notified();
            {
                let mut state = self.shared.state.lock().await;
                if let Some(msg) = state.queue.pop_front() {
                    return Ok(Some(msg));
                }
                if let Some(fatal) = state.fatal.take() {
                    return Err(fatal.to_error());
                }
            }
            if self.shared.closed.load(Ordering::Acquire) || self.shared.failed.load(Ordering::Acquire)
            {
                return Ok(None);
            }
            notified.await;
        }
    }

    /// Terminate the session on the server and stop background streams.
    async fn close(&self) -> Result<(), Self::Error> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.shutdown.cancel();
        self.shared.tasks.close();
        self.shared.wake();

        let session_id = self.shared.state.lock().await.session_id.clone();
        if let Some(sid) = session_id {
            let headers = self.shared.headers("application/json").await?;
            let request = self
                .shared
                .client
                .delete(&self.shared.config.endpoint)
                .headers(headers)
                .send();
            match tokio::time::timeout(self.shared.config.request_timeout, request).await {
                Ok(Ok(response)) => {
                    tracing::debug!(session_id = %sid, status = %response.status(), "session terminated");
                }
                Ok(Err(e)) => tracing::debug!(session_id = %sid, error = %e, "DELETE failed"),
                Err(_) => tracing::debug!(session_id = %sid, "DELETE timed out"),
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire) && !self.shared.failed.load(Ordering::Acquire)
    }

    fn metadata(&self) -> TransportMetadata {
        self.metadata.clone()
    }
}

impl Drop for HttpClientTransport {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_construction() -> Result<(), TransportError> {
        let transport = HttpClientTransport::new(HttpTransportConfig::new("http://localhost:8080/mcp"))?;
        assert!(transport.is_connected());

        let metadata = transport.metadata();
        assert_eq!(metadata.kind, "http");
        assert_eq!(metadata.peer.as_deref(), Some("http://localhost:8080/mcp"));
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_settings() -> Result<(), TransportError> {
        let transport = HttpClientTransport::new(
            HttpTransportConfig::new("http://localhost:8080/mcp").with_session("abc", 9),
        )?;
        assert_eq!(transport.session_id().await.as_deref(), Some("abc"));
        assert_eq!(transport.last_event_id().await, 9);

        let headers = transport.shared.headers("text/event-stream").await?;
        assert_eq!(
            headers.get(LAST_EVENT_ID_HEADER).and_then(|v| v.to_str().ok()),
            Some("9")
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_fatal_error_surfaces_once() -> Result<(), TransportError> {
        let transport = HttpClientTransport::new(HttpTransportConfig::new("http://localhost:8080/mcp"))?;
        transport
            .shared
            .fail(Fatal::SessionNotFound("gone".to_string()))
            .await;

        assert!(!transport.is_connected());
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::SessionNotFound { .. })
        ));
        assert!(transport.recv().await?.is_none());
        Ok(())
    }
}
