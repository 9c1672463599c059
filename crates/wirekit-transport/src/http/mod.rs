//! Resumable streaming HTTP transport.
//!
//! Client messages travel as HTTP POST bodies; server messages travel as
//! Server-Sent Events. Each session owns one logical stream backed by an
//! [`EventStore`](crate::event_store::EventStore), so a client that loses
//! its connection reconnects with `Last-Event-ID` and receives everything it
//! missed, in order.
//!
//! Key protocol points:
//! - The server assigns the session id in the response to `initialize`
//!   (header `mcp-session-id`); every later request must carry it
//! - SSE event ids are stream sequence numbers
//! - Delivery is at-least-once on the wire and exactly-once at `recv`
//! - An instance with a shared event store resumes sessions it has never
//!   seen; one without rejects them with `404`
//!
//! # Example
//!
//! ```rust
//! use wirekit_transport::http::HttpTransportConfig;
//! use std::time::Duration;
//!
//! let config = HttpTransportConfig::new("http://localhost:8080/mcp")
//!     .with_connect_timeout(Duration::from_secs(30))
//!     .with_request_timeout(Duration::from_secs(60))
//!     .with_max_reconnect_attempts(3);
//!
//! assert_eq!(config.endpoint, "http://localhost:8080/mcp");
//! assert!(config.open_event_stream);
//! ```

mod client;
mod config;
mod server;
mod sse;

pub use client::HttpClientTransport;
pub use config::{
    DEFAULT_ENDPOINT_PATH, DEFAULT_MAX_MESSAGE_SIZE, HttpServerConfig, HttpTransportConfig,
    LAST_EVENT_ID_HEADER, PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER,
};
pub use server::{HttpServerTransport, SessionStart, StreamableHttpService};
pub use sse::{Admission, SseEvent, SseParser, Watermark};
