//! Transports for wirekit sessions.
//!
//! A transport moves whole JSON-RPC messages between two peers. The session
//! engine is written against the [`Transport`] trait and never sees framing.
//!
//! # Available Transports
//!
//! | Transport | Use Case | Feature Flag |
//! |-----------|----------|--------------|
//! | [`MemoryTransport`] | Tests and in-process sessions | Always available |
//! | [`LineTransport`] | Newline-delimited JSON over any byte stream pair | Always available |
//! | [`ProcessTransport`] | Talk to a spawned child over its stdin/stdout | Always available |
//! | [`StdioTransport`] | Serve over this process's stdin/stdout | Always available |
//! | [`http::HttpClientTransport`] | Resumable streaming HTTP client | `http` (default) |
//! | [`http::StreamableHttpService`] | Streaming HTTP server (axum) | `http` (default) |
//!
//! The [`event_store`] module holds the append-only log behind the HTTP
//! transport's replay and session roaming.
//!
//! # Example
//!
//! ```no_run
//! use wirekit_transport::{ProcessTransport, Transport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wirekit_transport::TransportError> {
//!     let transport = ProcessTransport::spawn("my-server", &[] as &[&str]).await?;
//!
//!     while let Some(msg) = transport.recv().await? {
//!         println!("{msg:?}");
//!     }
//!
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod event_store;
#[cfg(feature = "http")]
pub mod http;
pub mod line;
pub mod memory;
pub mod process;
pub mod stdio;
pub mod traits;

pub use error::TransportError;
pub use event_store::{EventStore, EventStoreConfig, MemoryEventStore, StoreError, StoredEvent};
pub use line::{LineTransport, LineTransportConfig};
pub use memory::MemoryTransport;
pub use process::{ProcessTransport, ProcessTransportBuilder, StderrMode};
pub use stdio::StdioTransport;
pub use traits::{Transport, TransportMetadata};

#[cfg(feature = "http")]
pub use http::{
    HttpClientTransport, HttpServerConfig, HttpServerTransport, HttpTransportConfig, SessionStart,
    StreamableHttpService,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::TransportError;
    pub use crate::event_store::{EventStore, MemoryEventStore};
    pub use crate::line::LineTransport;
    pub use crate::memory::MemoryTransport;
    pub use crate::process::ProcessTransport;
    pub use crate::stdio::StdioTransport;
    pub use crate::traits::{Transport, TransportMetadata};

    #[cfg(feature = "http")]
    pub use crate::http::{
        HttpClientTransport, HttpServerConfig, HttpTransportConfig, SessionStart,
        StreamableHttpService,
    };
}
