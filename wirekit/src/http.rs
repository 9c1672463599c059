//! Sessions over the resumable streaming HTTP transport.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wirekit::http;
//! use wirekit::prelude::*;
//! use wirekit::transport::MemoryEventStore;
//! use wirekit::http::HttpServerConfig;
//!
//! # async fn run() -> Result<(), RpcError> {
//! let builder = SessionBuilder::default();
//! let config = HttpServerConfig::new().with_event_store(Arc::new(MemoryEventStore::new()));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await.map_err(|e| {
//!     RpcError::internal_with_source("bind failed", e)
//! })?;
//! http::service(builder, config).serve(listener).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use wirekit_core::error::RpcError;
use wirekit_session::{Role, Session, SessionBuilder};

pub use wirekit_transport::http::*;

/// Serve sessions built by `builder` over streaming HTTP.
///
/// New sessions wait for the client's `initialize`. Sessions resumed from
/// the shared event store start out active, since their handshake happened
/// on another instance.
#[must_use]
pub fn service(builder: SessionBuilder, config: HttpServerConfig) -> StreamableHttpService {
    service_with(builder, config, |_session, _start| {})
}

/// Like [`service`], and also hands every started session to `on_session`.
#[must_use]
pub fn service_with<F>(
    builder: SessionBuilder,
    config: HttpServerConfig,
    on_session: F,
) -> StreamableHttpService
where
    F: Fn(Session, &SessionStart) + Send + Sync + 'static,
{
    let on_session = Arc::new(on_session);
    StreamableHttpService::new(config, move |transport: HttpServerTransport, start| {
        let session = match &start {
            SessionStart::New => builder.accept(transport),
            SessionStart::Resumed { protocol_version } => {
                tracing::info!(
                    session = %transport.session_id(),
                    "session roamed to this instance"
                );
                builder.resume(transport, Role::Server, protocol_version.clone())
            }
        };
        on_session(session, &start);
    })
}

/// Open a client session to a streaming HTTP endpoint.
///
/// When `config` names a session to resume, the session starts out active
/// and the server replays everything after `config.last_event_id`;
/// otherwise the handshake runs first.
pub async fn connect(builder: &SessionBuilder, config: HttpTransportConfig) -> Result<Session, RpcError> {
    let resuming = config.session_id.is_some();
    let transport = HttpClientTransport::connect(config).await?;
    if resuming {
        Ok(builder.resume(transport, Role::Client, None))
    } else {
        builder.connect(transport).await
    }
}
