//! wirekit echo server
//!
//! Serves a handful of methods over stdio (the default) or over the
//! resumable streaming HTTP transport.
//!
//! # Running
//!
//! ```bash
//! cargo run -p echo-server            # stdio
//! cargo run -p echo-server -- --http  # http://127.0.0.1:3000/mcp
//! ```
//!
//! # Methods
//!
//! - `echo` returns its params.
//! - `add` sums `a` and `b`.
//! - `count` counts to `to`, one step every `delay_ms`, reporting progress
//!   and stopping early when cancelled.
//!
//! Logs go to stderr, so stdout carries only protocol messages.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wirekit::http::{self, HttpServerConfig};
use wirekit::prelude::*;
use wirekit::transport::{EventStoreConfig, MemoryEventStore, StdioTransport};

#[derive(Debug, Deserialize)]
struct AddParams {
    a: f64,
    b: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct CountParams {
    to: u64,
    delay_ms: u64,
}

impl Default for CountParams {
    fn default() -> Self {
        Self {
            to: 5,
            delay_ms: 200,
        }
    }
}

fn builder() -> SessionBuilder {
    let config = SessionConfig::default()
        .with_info("echo-server", env!("CARGO_PKG_VERSION"))
        .with_instructions("Call `echo`, `add` or `count`.");

    SessionBuilder::new(config)
        .handler("echo", |params, _ctx: RequestContext| async move {
            Ok(params.unwrap_or_else(|| json!({})))
        })
        .typed_handler("add", |params: AddParams, _ctx| async move {
            Ok::<_, RpcError>(json!({ "sum": params.a + params.b }))
        })
        .typed_handler("count", |params: CountParams, ctx: RequestContext| async move {
            for n in 1..=params.to {
                tokio::select! {
                    () = ctx.cancelled() => {
                        info!(reached = n - 1, "count cancelled");
                        return Ok::<_, RpcError>(json!({ "counted": n - 1, "cancelled": true }));
                    }
                    () = tokio::time::sleep(Duration::from_millis(params.delay_ms)) => {}
                }
                ctx.progress(n as f64, Some(params.to as f64), None).await?;
            }
            Ok::<_, RpcError>(json!({ "counted": params.to }))
        })
        .on_notification(|note: Notification, session: Session| async move {
            info!(session = %session.label(), method = %note.method, "notification");
        })
}

async fn serve_stdio() -> Result<(), RpcError> {
    let transport = StdioTransport::stdio()
        .await
        .map_err(RpcError::from)
        .context("failed to open stdio")?;
    let session = builder().accept(transport);
    info!("serving on stdio");
    session.closed().await;
    info!(reason = session.close_reason().unwrap_or("unknown"), "session ended");
    Ok(())
}

async fn serve_http() -> Result<(), RpcError> {
    let store = Arc::new(MemoryEventStore::with_config(
        EventStoreConfig::new()
            .with_ttl(Duration::from_secs(600))
            .with_max_events_per_stream(1024),
    ));
    let _pruner = store.spawn_pruner(Duration::from_secs(30));

    let config = HttpServerConfig::new().with_event_store(store);
    let service = http::service_with(builder(), config, |session, start| {
        info!(session = %session.label(), ?start, "session started");
    });

    // Use WIREKIT_BIND_ADDR for containerized deployments (default: 127.0.0.1:3000)
    let addr =
        std::env::var("WIREKIT_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RpcError::internal_with_source(format!("failed to bind {addr}"), e))?;
    info!(%addr, "serving streaming HTTP");

    service
        .serve_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), RpcError> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if std::env::args().skip(1).any(|arg| arg == "--http") {
        serve_http().await
    } else {
        serve_stdio().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use wirekit::transport::MemoryTransport;

    #[tokio::test]
    async fn test_demo_methods() -> Result<(), RpcError> {
        let (client_side, server_side) = MemoryTransport::pair();
        let _server = builder().accept(server_side);
        let client = SessionBuilder::default().connect(client_side).await?;

        let sum: Value = client.request("add", &json!({ "a": 1.5, "b": 2.0 })).await?;
        assert_eq!(sum, json!({ "sum": 3.5 }));

        let counted = client
            .send_request("count", Some(json!({ "to": 2, "delay_ms": 1 })))
            .await?;
        assert_eq!(counted, json!({ "counted": 2 }));
        Ok(())
    }
}
