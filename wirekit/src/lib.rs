//! # wirekit
//!
//! JSON-RPC 2.0 sessions over swappable transports.
//!
//! A [`Session`] correlates Requests with their Responses, serves incoming
//! Requests with registered handlers, propagates cancellation in both
//! directions, routes progress updates and walks a small lifecycle state
//! machine. It runs unchanged over any [`Transport`]: an in-memory pair, a
//! child process speaking newline-delimited JSON, this process's stdio, or
//! the resumable streaming HTTP transport.
//!
//! ## Quick Start
//!
//! ```no_run
//! use serde_json::json;
//! use wirekit::prelude::*;
//! use wirekit::transport::StdioTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RpcError> {
//!     let transport = StdioTransport::stdio().await?;
//!     let session = SessionBuilder::default()
//!         .handler("echo", |params, _ctx: RequestContext| async move {
//!             Ok(params.unwrap_or_else(|| json!({})))
//!         })
//!         .accept(transport);
//!
//!     session.closed().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming HTTP
//!
//! [`http::service`] turns a [`SessionBuilder`] into an HTTP endpoint. Every
//! message the server sends is appended to an event store before it goes
//! out, so a client that loses its connection reconnects with the last
//! sequence number it saw and receives exactly what it missed. When several
//! instances share one store, a session can move between them.
//!
//! ## Crate Organization
//!
//! - [`wirekit_core`] - Message envelope, error types, capabilities, lifecycle states
//! - [`wirekit_transport`] - Transports and the event store
//! - [`wirekit_session`] - The session engine

#![deny(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub use wirekit_core::*;

pub use wirekit_session::{
    CancellationToken, NotificationListener, ProgressSink, RequestContext, RequestHandler,
    RequestOptions, Role, Session, SessionBuilder, SessionConfig,
};

pub use wirekit_transport::{Transport, TransportError, TransportMetadata};

#[cfg(feature = "http")]
pub mod http;
pub mod prelude;

/// Session engine re-exports
pub mod session {
    //! The session engine.
    pub use wirekit_session::*;
}

/// Transport module re-exports
pub mod transport {
    //! Transport layer types.
    pub use wirekit_transport::*;
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;
        let _ = std::any::type_name::<RpcError>();
        let _ = std::any::type_name::<Session>();
    }
}
