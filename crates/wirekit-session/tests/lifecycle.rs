//! Handshake, state machine and teardown.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use wirekit_core::capability::PROTOCOL_VERSION;
use wirekit_core::error::{JsonRpcError, RpcError, codes};
use wirekit_core::protocol::{Notification, ProgressToken, RequestId, Response};
use wirekit_core::state::SessionState;
use wirekit_core::types::{ProgressParams, method};
use wirekit_session::{Role, SessionBuilder, SessionConfig};
use wirekit_transport::{LineTransport, MemoryTransport, Transport};

use common::{WAIT, answer_handshake, next_request, next_response, request, send_handshake, server_builder};

#[tokio::test]
async fn test_handshake_negotiates_on_both_sides() -> Result<(), RpcError> {
    let (client_side, server_side) = MemoryTransport::pair();
    let server = server_builder().accept(server_side);
    assert_eq!(server.state(), SessionState::Uninitialized);
    assert_eq!(server.role(), Role::Server);

    let client = SessionBuilder::default().connect(client_side).await?;
    assert_eq!(client.state(), SessionState::Active);
    server.initialized().await?;

    let negotiated = client.negotiated().expect("client negotiated");
    assert_eq!(negotiated.protocol_version, PROTOCOL_VERSION);
    assert_eq!(
        negotiated.peer_info.as_ref().map(|p| p.name.as_str()),
        Some("test-server")
    );
    let negotiated = server.negotiated().expect("server negotiated");
    assert_eq!(negotiated.protocol_version, PROTOCOL_VERSION);
    Ok(())
}

#[tokio::test]
async fn test_requests_before_initialize_are_rejected() -> Result<(), RpcError> {
    let (raw, server_side) = MemoryTransport::pair();
    let server = server_builder().accept(server_side);

    raw.send(request(1, "echo", json!({}))).await?;
    let response = next_response(&raw).await;
    assert_eq!(response.id, RequestId::Number(1));
    assert_eq!(response.error.map(|e| e.code), Some(codes::INVALID_REQUEST));

    // Liveness checks work in any state.
    raw.send(request(2, method::PING, json!({}))).await?;
    let response = next_response(&raw).await;
    assert_eq!(response.result, Some(json!({})));

    let response = send_handshake(&raw).await;
    assert!(response.error.is_none());
    server.initialized().await?;

    raw.send(request(3, "echo", json!({ "ok": true }))).await?;
    assert_eq!(next_response(&raw).await.result, Some(json!({ "ok": true })));

    let again = send_handshake(&raw).await;
    assert_eq!(again.error.map(|e| e.code), Some(codes::INVALID_REQUEST));
    Ok(())
}

#[tokio::test]
async fn test_malformed_initialize_params() -> Result<(), RpcError> {
    let (raw, server_side) = MemoryTransport::pair();
    let server = server_builder().accept(server_side);

    raw.send(request(1, method::INITIALIZE, json!({ "protocolVersion": 7 })))
        .await?;
    let response = next_response(&raw).await;
    assert_eq!(response.error.map(|e| e.code), Some(codes::INVALID_PARAMS));
    assert_eq!(server.state(), SessionState::Uninitialized);
    Ok(())
}

#[tokio::test]
async fn test_unsupported_version_fails_handshake() {
    let (client_side, raw) = MemoryTransport::pair();
    let peer = tokio::spawn(async move {
        let request = next_request(&raw).await;
        let result = json!({
            "protocolVersion": "1999-01-01",
            "capabilities": {},
            "serverInfo": { "name": "ancient", "version": "0.1.0" },
        });
        raw.send(Response::success(request.id, result).into())
            .await
            .expect("send");
        raw
    });

    let outcome = SessionBuilder::default().connect(client_side).await;
    match outcome {
        Err(RpcError::HandshakeFailed(details)) => {
            assert_eq!(details.peer_version.as_deref(), Some("1999-01-01"));
        }
        other => panic!("expected handshake failure, got {other:?}"),
    }
    drop(peer.await);
}

#[tokio::test]
async fn test_rejected_initialize_fails_handshake() {
    let (client_side, raw) = MemoryTransport::pair();
    tokio::spawn(async move {
        let request = next_request(&raw).await;
        let error = JsonRpcError::invalid_request("go away");
        raw.send(Response::error(request.id, error).into())
            .await
            .expect("send");
        raw
    });

    let outcome = SessionBuilder::default().connect(client_side).await;
    assert!(matches!(outcome, Err(RpcError::HandshakeFailed(_))));
}

#[tokio::test]
async fn test_close_drains_in_flight_requests() -> Result<(), RpcError> {
    let (client_side, server_side) = MemoryTransport::pair();
    let server = server_builder().accept(server_side);
    let client = SessionBuilder::default().connect(client_side).await?;

    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("sleep", Some(json!({ "ms": 100 })))
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.close().await?;
    assert_eq!(call.await.expect("join")?, json!({ "slept": 100 }));
    assert_eq!(client.state(), SessionState::Closed);
    assert_eq!(client.close_reason(), Some("closed locally"));

    let err = client.ping().await.expect_err("closed sessions refuse work");
    assert!(matches!(err, RpcError::SessionClosed { .. }));

    tokio::time::timeout(WAIT, server.closed())
        .await
        .expect("server notices the disconnect");
    assert_eq!(server.close_reason(), Some("peer closed the connection"));
    Ok(())
}

#[tokio::test]
async fn test_close_timeout_fails_stragglers() -> Result<(), RpcError> {
    let (client_side, server_side) = MemoryTransport::pair();
    let _server = server_builder().accept(server_side);
    let client = SessionBuilder::new(
        SessionConfig::default().with_close_timeout(Duration::from_millis(50)),
    )
    .connect(client_side)
    .await?;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.send_request("sleep", None).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    tokio::time::timeout(WAIT, client.close())
        .await
        .expect("close is bounded")?;
    let outcome = call.await.expect("join");
    assert!(matches!(outcome, Err(RpcError::SessionClosed { .. })));
    Ok(())
}

#[tokio::test]
async fn test_peer_disconnect_fails_pending_requests() -> Result<(), RpcError> {
    let (client, raw) = {
        let (client_side, raw) = MemoryTransport::pair();
        let builder = SessionBuilder::default();
        let (client, ()) = tokio::join!(
            builder.connect(client_side),
            answer_handshake(&raw)
        );
        (client?, raw)
    };
    let mut states = client.state_changes();

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.send_request("slow", None).await }
    });
    next_request(&raw).await;
    raw.close().await?;

    let outcome = call.await.expect("join");
    assert!(matches!(outcome, Err(RpcError::SessionClosed { .. })));
    states
        .wait_for(|state| state.is_closed())
        .await
        .expect("state channel open");
    assert_eq!(client.pending_requests(), 0);
    Ok(())
}

#[tokio::test]
async fn test_framing_error_tears_down_the_session() -> Result<(), RpcError> {
    let (ours, theirs) = tokio::io::duplex(1024);
    let (reader, writer) = tokio::io::split(ours);
    let transport = LineTransport::new(reader, writer).await?;
    let server = server_builder().accept(transport);

    let (_their_reader, mut their_writer) = tokio::io::split(theirs);
    their_writer
        .write_all(b"this is not json\n")
        .await
        .expect("write");

    tokio::time::timeout(WAIT, server.closed())
        .await
        .expect("framing errors are fatal");
    assert_eq!(server.state(), SessionState::Closed);
    assert!(
        server
            .close_reason()
            .is_some_and(|reason| reason.starts_with("transport error"))
    );
    Ok(())
}

#[tokio::test]
async fn test_listener_receives_notifications_in_order() -> Result<(), RpcError> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    let builder = server_builder().on_notification({
        let seen = Arc::clone(&seen);
        move |note: Notification, _session| {
            let seen = Arc::clone(&seen);
            let done_tx = done_tx.clone();
            async move {
                let method = note.method().to_string();
                seen.lock().expect("lock").push(method.clone());
                if method == "last" {
                    let _ = done_tx.send(());
                }
            }
        }
    });

    let (client_side, server_side) = MemoryTransport::pair();
    let _server = builder.accept(server_side);
    let client = SessionBuilder::default().connect(client_side).await?;

    client.send_notification("first", None).await?;
    // Progress for a token nobody registered is handed to the listener too.
    let stray = ProgressParams {
        progress_token: ProgressToken::from(&RequestId::Number(404)),
        progress: 1.0,
        total: None,
        message: None,
    };
    client
        .send_notification(method::PROGRESS, serde_json::to_value(stray).ok())
        .await?;
    client
        .send_notification("second", Some(json!({ "n": 2 })))
        .await?;
    client.send_notification("last", None).await?;

    tokio::time::timeout(WAIT, done_rx.recv())
        .await
        .expect("listener ran");
    assert_eq!(
        *seen.lock().expect("lock"),
        vec!["first", method::PROGRESS, "second", "last"]
    );
    Ok(())
}

#[tokio::test]
async fn test_resumed_session_starts_active() -> Result<(), RpcError> {
    let (client_side, server_side) = MemoryTransport::pair();
    let server = server_builder().resume(server_side, Role::Server, Some(PROTOCOL_VERSION.into()));
    assert_eq!(server.state(), SessionState::Active);

    // The client half resumes too: no second handshake.
    let client = SessionBuilder::default().resume(client_side, Role::Client, None);
    assert_eq!(client.send_request("echo", Some(json!([1, 2]))).await?, json!([1, 2]));
    client.ping().await?;
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn test_close_returns_when_child_stops_reading() -> Result<(), RpcError> {
    let child = wirekit_transport::ProcessTransport::builder("sleep")
        .arg("30")
        .stderr(wirekit_transport::StderrMode::Null)
        .close_timeout(Duration::from_secs(1))
        .spawn()
        .await?;
    let config = SessionConfig::default().with_close_timeout(Duration::from_secs(1));
    let session = SessionBuilder::new(config).resume(child, Role::Client, None);

    let padding = "x".repeat(8 * 1024);
    for n in 0..20 {
        session
            .send_notification("fill", Some(json!({ "n": n, "pad": padding })))
            .await?;
    }

    let started = std::time::Instant::now();
    tokio::time::timeout(Duration::from_secs(8), session.close())
        .await
        .expect("close finishes within the grace periods")?;
    assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
    assert_eq!(session.state(), SessionState::Closed);
    Ok(())
}
