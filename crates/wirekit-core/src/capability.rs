//! Initialize handshake payloads and protocol version negotiation.
//!
//! A session starts with one `initialize` request/response exchange. The
//! initiating side offers a protocol version, its capabilities and its
//! identity; the accepting side answers with the negotiated version and its
//! own capabilities. Capabilities are an open JSON map: this crate only
//! carries them, the layers above decide what each key means.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The protocol version this crate prefers.
pub const PROTOCOL_VERSION: &str = "2025-11-25";

/// All protocol versions this crate can speak, latest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &["2025-11-25", "2025-06-18", "2025-03-26", "2024-11-05"];

/// Check if a protocol version is supported.
#[must_use]
pub fn is_version_supported(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Pick the version to answer an `initialize` with.
///
/// The requested version is echoed back when supported; otherwise the
/// preferred version is offered and the initiator decides whether to continue.
///
/// ```
/// use wirekit_core::capability::{negotiate_version, PROTOCOL_VERSION};
///
/// assert_eq!(negotiate_version("2024-11-05"), "2024-11-05");
/// assert_eq!(negotiate_version("1.0.0"), PROTOCOL_VERSION);
/// ```
#[must_use]
pub fn negotiate_version(requested_version: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|&&v| v == requested_version)
        .copied()
        .unwrap_or(PROTOCOL_VERSION)
}

/// Name and version of one side of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    pub version: String,
}

impl PeerInfo {
    /// Create peer info.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for PeerInfo {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
    }
}

/// An open set of advertised capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(Map<String, Value>);

impl Capabilities {
    /// An empty capability set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise a capability with an empty options object.
    #[must_use]
    pub fn with(self, name: impl Into<String>) -> Self {
        self.with_options(name, Value::Object(Map::new()))
    }

    /// Advertise a capability with explicit options.
    #[must_use]
    pub fn with_options(mut self, name: impl Into<String>, options: Value) -> Self {
        self.0.insert(name.into(), options);
        self
    }

    /// Whether a capability is advertised.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Options of an advertised capability.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

/// Params of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Version the initiator wants to speak.
    pub protocol_version: String,
    /// Initiator capabilities.
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Initiator identity.
    pub client_info: PeerInfo,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Version the session will speak.
    pub protocol_version: String,
    /// Acceptor capabilities.
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Acceptor identity.
    pub server_info: PeerInfo,
    /// Free-form usage hints for the initiator.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// What a session learned about its peer during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    /// The agreed protocol version.
    pub protocol_version: String,
    /// The peer's identity, when known.
    pub peer_info: Option<PeerInfo>,
    /// The peer's capabilities.
    pub peer_capabilities: Capabilities,
}
