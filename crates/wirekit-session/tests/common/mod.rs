//! Helpers shared by the session integration tests.

#![allow(dead_code)]

use std::time::Duration;

use serde_json::{Value, json};
use wirekit_core::capability::{Capabilities, InitializeResult, PROTOCOL_VERSION, PeerInfo};
use wirekit_core::protocol::{Message, Notification, Request, RequestId, Response};
use wirekit_core::types::method;
use wirekit_session::{RequestContext, SessionBuilder, SessionConfig};
use wirekit_transport::{MemoryTransport, Transport};

pub const WAIT: Duration = Duration::from_secs(5);

/// Receive the next message from a raw peer, failing the test after a while.
pub async fn next(raw: &MemoryTransport) -> Message {
    tokio::time::timeout(WAIT, raw.recv())
        .await
        .expect("recv timed out")
        .expect("recv failed")
        .expect("stream ended")
}

/// Receive the next Request, skipping anything else.
pub async fn next_request(raw: &MemoryTransport) -> Request {
    loop {
        if let Message::Request(request) = next(raw).await {
            return request;
        }
    }
}

/// Receive the next Response, skipping anything else.
pub async fn next_response(raw: &MemoryTransport) -> Response {
    loop {
        if let Message::Response(response) = next(raw).await {
            return response;
        }
    }
}

/// Receive the next Notification with `method`, skipping anything else.
pub async fn next_notification(raw: &MemoryTransport, method: &str) -> Notification {
    loop {
        if let Message::Notification(note) = next(raw).await {
            if note.method() == method {
                return note;
            }
        }
    }
}

/// Play the server half of the handshake on a raw transport.
pub async fn answer_handshake(raw: &MemoryTransport) {
    let request = next_request(raw).await;
    assert_eq!(request.method(), method::INITIALIZE);
    let result = InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: Capabilities::new(),
        server_info: PeerInfo::new("raw-server", "0.0.0"),
        instructions: None,
    };
    let result = serde_json::to_value(result).expect("encode");
    raw.send(Response::success(request.id, result).into())
        .await
        .expect("send");
    next_notification(raw, method::INITIALIZED).await;
}

/// Play the client half of the handshake on a raw transport.
pub async fn send_handshake(raw: &MemoryTransport) -> Response {
    let params = json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": { "name": "raw-client", "version": "0.0.0" },
    });
    raw.send(Request::with_params(method::INITIALIZE, RequestId::Number(0), params).into())
        .await
        .expect("send");
    let response = next_response(raw).await;
    raw.send(Notification::new(method::INITIALIZED).into())
        .await
        .expect("send");
    response
}

pub fn request(id: i64, method: &'static str, params: Value) -> Message {
    Request::with_params(method, RequestId::Number(id), params).into()
}

/// A server with `echo`, `sleep` (waits `ms` or until cancelled) and
/// `panic` handlers.
pub fn server_builder() -> SessionBuilder {
    SessionBuilder::new(SessionConfig::default().with_info("test-server", "1.0.0"))
        .handler("echo", |params, _ctx: RequestContext| async move {
            Ok(params.unwrap_or_default())
        })
        .handler("sleep", |params, ctx: RequestContext| async move {
            let ms = params
                .as_ref()
                .and_then(|p| p.get("ms"))
                .and_then(Value::as_u64)
                .unwrap_or(10_000);
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!({ "slept": ms })),
                () = ctx.cancelled() => Ok(json!("stopped early")),
            }
        })
        .handler("panic", |_params, _ctx: RequestContext| async move {
            if true {
                panic!("handler exploded");
            }
            Ok(Value::Null)
        })
}
