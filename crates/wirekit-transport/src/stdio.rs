//! Serve a session over this process's own stdin and stdout.
//!
//! Only protocol messages may be written to stdout while the transport is
//! live; route logs to stderr.

use crate::error::TransportError;
use crate::line::{LineTransport, LineTransportConfig};
use crate::traits::TransportMetadata;

/// A line transport bound to the current process's standard streams.
pub type StdioTransport = LineTransport;

impl LineTransport {
    /// Create a transport over stdin/stdout with default settings.
    pub async fn stdio() -> Result<Self, TransportError> {
        Self::stdio_with_config(LineTransportConfig::default()).await
    }

    /// Create a transport over stdin/stdout with a specific configuration.
    pub async fn stdio_with_config(config: LineTransportConfig) -> Result<Self, TransportError> {
        Self::start(
            tokio::io::stdin(),
            tokio::io::stdout(),
            config,
            TransportMetadata::new("stdio").with_peer("parent process"),
        )
        .await
    }
}
