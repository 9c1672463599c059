//! HTTP transport configuration types and constants.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use wirekit_core::capability::PROTOCOL_VERSION;

use crate::event_store::EventStore;

/// Header carrying the negotiated protocol version.
///
/// HTTP/2 requires lowercase header names and HTTP/1.1 is
/// case-insensitive, so lowercase works everywhere.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Header carrying the session identifier.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header carrying the last stream sequence number the client processed.
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

/// Default maximum message size (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default endpoint path served by the HTTP service.
pub const DEFAULT_ENDPOINT_PATH: &str = "/mcp";

/// Configuration for the HTTP client transport.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Endpoint URL.
    pub endpoint: String,
    /// Session to resume instead of starting a new one.
    pub session_id: Option<String>,
    /// Last sequence number already processed on the resumed session.
    pub last_event_id: u64,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Time allowed for the server to answer a POST with response headers.
    pub request_timeout: Duration,
    /// Whether to keep a standalone GET event stream open for
    /// server-initiated messages.
    pub open_event_stream: bool,
    /// Reconnection attempts for a broken event stream before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection attempt; doubles on each retry.
    pub reconnect_backoff: Duration,
    /// Custom headers to include in requests.
    pub headers: Vec<(String, String)>,
    /// Protocol version header value.
    pub protocol_version: String,
    /// Maximum message size in bytes.
    pub max_message_size: usize,
}

impl HttpTransportConfig {
    /// Create a new HTTP transport configuration.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            session_id: None,
            last_event_id: 0,
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            open_event_stream: true,
            max_reconnect_attempts: 5,
            reconnect_backoff: Duration::from_millis(250),
            headers: Vec::new(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Resume an existing session, having processed events up to
    /// `last_event_id`.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>, last_event_id: u64) -> Self {
        self.session_id = Some(session_id.into());
        self.last_event_id = last_event_id;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Do not open the standalone event stream.
    ///
    /// Responses still arrive on each POST's own stream.
    #[must_use]
    pub const fn without_event_stream(mut self) -> Self {
        self.open_event_stream = false;
        self
    }

    /// Set maximum reconnection attempts.
    #[must_use]
    pub const fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the initial reconnection backoff.
    #[must_use]
    pub const fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Add a custom header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set the protocol version.
    #[must_use]
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Set the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080/mcp")
    }
}

/// Server-side configuration for the streaming HTTP service.
#[derive(Clone)]
pub struct HttpServerConfig {
    /// Path the service is mounted at.
    pub endpoint_path: String,
    /// Allowed origins for DNS rebinding protection.
    /// If empty, origin validation is disabled.
    pub allowed_origins: Vec<String>,
    /// Maximum request body size in bytes.
    pub max_message_size: usize,
    /// Shared event store. When set, sessions unknown to this instance are
    /// resumed from the store; when unset, they are rejected.
    pub event_store: Option<Arc<dyn EventStore>>,
    /// Interval between SSE keep-alive comments.
    pub keep_alive: Duration,
    /// Capacity of each session's live broadcast channel.
    pub channel_capacity: usize,
    /// Local sessions idle for this long are dropped.
    pub session_idle_timeout: Duration,
}

impl fmt::Debug for HttpServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServerConfig")
            .field("endpoint_path", &self.endpoint_path)
            .field("allowed_origins", &self.allowed_origins)
            .field("max_message_size", &self.max_message_size)
            .field("event_store", &self.event_store.is_some())
            .field("keep_alive", &self.keep_alive)
            .field("channel_capacity", &self.channel_capacity)
            .field("session_idle_timeout", &self.session_idle_timeout)
            .finish()
    }
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpServerConfig {
    /// Create a new server configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoint_path: DEFAULT_ENDPOINT_PATH.to_string(),
            allowed_origins: Vec::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            event_store: None,
            keep_alive: Duration::from_secs(15),
            channel_capacity: 256,
            session_idle_timeout: Duration::from_secs(3600),
        }
    }

    /// Mount the service at a different path.
    #[must_use]
    pub fn with_endpoint_path(mut self, path: impl Into<String>) -> Self {
        self.endpoint_path = path.into();
        self
    }

    /// Add an allowed origin for DNS rebinding protection.
    #[must_use]
    pub fn with_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        self.allowed_origins.push(origin.into());
        self
    }

    /// Set multiple allowed origins at once.
    #[must_use]
    pub fn with_allowed_origins(
        mut self,
        origins: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.allowed_origins
            .extend(origins.into_iter().map(Into::into));
        self
    }

    /// Set maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Use a shared event store, enabling session roaming.
    #[must_use]
    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = Some(store);
        self
    }

    /// Set the keep-alive interval.
    #[must_use]
    pub const fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Set the per-session broadcast capacity (at least 1).
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the idle timeout for local sessions.
    #[must_use]
    pub const fn with_session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = timeout;
        self
    }

    /// Check if an origin is allowed.
    #[must_use]
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == origin)
    }
}
