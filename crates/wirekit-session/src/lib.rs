//! The wirekit session engine.
//!
//! A [`Session`] runs the JSON-RPC message lifecycle over any
//! [`Transport`](wirekit_transport::Transport): it correlates Responses with
//! the Requests that caused them, serves incoming Requests with registered
//! handlers, propagates cancellation both ways, routes progress updates and
//! enforces per-request timeouts.
//!
//! # Lifecycle
//!
//! A session starts `uninitialized`. The client side sends `initialize`,
//! the server answers with its negotiated version and capabilities, and the
//! client confirms with `notifications/initialized`; both sides are then
//! `active`. [`Session::close`] moves through `closing`, where in-flight work
//! drains, to `closed`.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use wirekit_session::prelude::*;
//! use wirekit_transport::MemoryTransport;
//!
//! # tokio_test::block_on(async {
//! let (client_side, server_side) = MemoryTransport::pair();
//!
//! let server = SessionBuilder::default()
//!     .handler("echo", |params, _ctx: RequestContext| async move {
//!         Ok(params.unwrap_or_default())
//!     })
//!     .accept(server_side);
//!
//! let client = SessionBuilder::default().connect(client_side).await?;
//! let reply = client.send_request("echo", Some(json!({ "text": "hi" }))).await?;
//! assert_eq!(reply, json!({ "text": "hi" }));
//!
//! client.close().await?;
//! server.closed().await;
//! # Ok::<(), wirekit_core::error::RpcError>(())
//! # }).unwrap();
//! ```

mod config;
mod context;
mod engine;
mod handler;
mod inflight;
mod session;

pub use config::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_INITIALIZE_TIMEOUT, DEFAULT_MAX_CONCURRENT_HANDLERS,
    DEFAULT_OUTBOUND_CAPACITY, DEFAULT_REQUEST_TIMEOUT, SessionConfig,
};
pub use context::RequestContext;
pub use handler::{NotificationListener, RequestHandler, Typed};
pub use inflight::ProgressSink;
pub use session::{RequestOptions, Role, Session, SessionBuilder};
pub use tokio_util::sync::CancellationToken;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::SessionConfig;
    pub use crate::context::RequestContext;
    pub use crate::handler::{NotificationListener, RequestHandler};
    pub use crate::session::{RequestOptions, Role, Session, SessionBuilder};
    pub use wirekit_core::error::RpcError;
    pub use wirekit_core::state::SessionState;
}
