//! Session configuration.

use std::time::Duration;

use wirekit_core::capability::{Capabilities, PROTOCOL_VERSION, PeerInfo};

/// Default timeout for outgoing requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for the `initialize` exchange.
pub const DEFAULT_INITIALIZE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time `close` waits for in-flight work to drain.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default capacity of the outbound message queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Default limit on incoming requests handled at once.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 100;

/// Configuration shared by every session a builder starts.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Timeout applied to outgoing requests that do not set their own.
    pub request_timeout: Duration,
    /// Timeout for the `initialize` round trip.
    pub initialize_timeout: Duration,
    /// How long `close` waits for outstanding requests and handlers.
    pub close_timeout: Duration,
    /// Capacity of the queue between callers and the writer task.
    pub outbound_capacity: usize,
    /// Incoming requests beyond this many wait for a free slot.
    pub max_concurrent_handlers: usize,
    /// Name and version announced during the handshake.
    pub info: PeerInfo,
    /// Capabilities announced during the handshake.
    pub capabilities: Capabilities,
    /// Protocol version offered (client) or preferred (server).
    pub protocol_version: String,
    /// Usage instructions returned to the peer by the accepting side.
    pub instructions: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            initialize_timeout: DEFAULT_INITIALIZE_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            info: PeerInfo::default(),
            capabilities: Capabilities::default(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            instructions: None,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub const fn with_initialize_timeout(mut self, timeout: Duration) -> Self {
        self.initialize_timeout = timeout;
        self
    }

    /// Set the drain timeout used by `close`.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity (at least 1).
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Set the concurrent handler limit (at least 1).
    #[must_use]
    pub fn with_max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit.max(1);
        self
    }

    /// Set the local peer identity.
    #[must_use]
    pub fn with_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.info = PeerInfo::new(name, version);
        self
    }

    /// Set the advertised capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the protocol version.
    #[must_use]
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Set usage instructions for the peer.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}
