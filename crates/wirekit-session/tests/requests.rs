//! Request correlation, cancellation, timeouts and progress.

mod common;

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wirekit_core::error::{RpcError, codes};
use wirekit_core::protocol::{RequestId, Response};
use wirekit_core::types::{CancelledParams, method};
use wirekit_session::{RequestContext, RequestOptions, Session, SessionBuilder, SessionConfig};
use wirekit_transport::{MemoryTransport, Transport};

use common::{
    WAIT, answer_handshake, next_notification, next_request, next_response, request,
    send_handshake, server_builder,
};

async fn connected(server: &SessionBuilder) -> Result<(Session, Session), RpcError> {
    let (client_side, server_side) = MemoryTransport::pair();
    let server = server.accept(server_side);
    let client = SessionBuilder::default().connect(client_side).await?;
    Ok((client, server))
}

/// A client session whose peer is driven by hand.
async fn client_with_raw_peer() -> Result<(Session, MemoryTransport), RpcError> {
    let (client_side, raw) = MemoryTransport::pair();
    let builder = SessionBuilder::default();
    let (client, ()) = tokio::join!(
        builder.connect(client_side),
        answer_handshake(&raw)
    );
    Ok((client?, raw))
}

#[tokio::test]
async fn test_echo() -> Result<(), RpcError> {
    let (client, _server) = connected(&server_builder()).await?;
    let reply = client
        .send_request("echo", Some(json!({ "text": "hi" })))
        .await?;
    assert_eq!(reply, json!({ "text": "hi" }));
    Ok(())
}

#[tokio::test]
async fn test_typed_request_and_handler() -> Result<(), RpcError> {
    #[derive(serde::Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    let builder = server_builder().typed_handler("add", |args: Add, _ctx| async move {
        Ok::<_, RpcError>(args.a + args.b)
    });
    let (client, _server) = connected(&builder).await?;

    let sum: i64 = client.request("add", &json!({ "a": 2, "b": 40 })).await?;
    assert_eq!(sum, 42);

    let err = client
        .send_request("add", Some(json!({ "a": "two" })))
        .await
        .expect_err("bad params must fail");
    assert_eq!(err.code(), codes::INVALID_PARAMS);
    Ok(())
}

#[tokio::test]
async fn test_interleaved_requests_resolve_their_own_callers() -> Result<(), RpcError> {
    let (client, _server) = connected(&server_builder()).await?;

    let (slow, fast, middle) = tokio::join!(
        client.send_request("sleep", Some(json!({ "ms": 150 }))),
        client.send_request("sleep", Some(json!({ "ms": 10 }))),
        client.send_request("sleep", Some(json!({ "ms": 60 }))),
    );
    assert_eq!(slow?, json!({ "slept": 150 }));
    assert_eq!(fast?, json!({ "slept": 10 }));
    assert_eq!(middle?, json!({ "slept": 60 }));
    assert_eq!(client.pending_requests(), 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_method() -> Result<(), RpcError> {
    let (client, _server) = connected(&server_builder()).await?;
    let err = client
        .send_request("missing", None)
        .await
        .expect_err("no handler");
    assert_eq!(err.code(), codes::METHOD_NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_and_unknown_responses_are_discarded() -> Result<(), RpcError> {
    let (client, raw) = client_with_raw_peer().await?;

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.send_request("first", None).await }
    });
    let first = next_request(&raw).await;
    raw.send(Response::success(first.id.clone(), json!("one")).into())
        .await?;
    raw.send(Response::success(first.id.clone(), json!("two")).into())
        .await?;
    raw.send(Response::success(RequestId::Number(999), json!("stray")).into())
        .await?;
    assert_eq!(call.await.expect("join")?, json!("one"));

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.send_request("second", None).await }
    });
    let second = next_request(&raw).await;
    assert_ne!(second.id, first.id);
    raw.send(Response::success(second.id, json!("fresh")).into())
        .await?;
    assert_eq!(call.await.expect("join")?, json!("fresh"));
    Ok(())
}

#[tokio::test]
async fn test_cancel_in_flight_request() -> Result<(), RpcError> {
    let (client, raw) = client_with_raw_peer().await?;

    let token = CancellationToken::new();
    let call = tokio::spawn({
        let client = client.clone();
        let token = token.clone();
        async move {
            client
                .send_request_with("slow", None, RequestOptions::new().with_cancellation(token))
                .await
        }
    });

    let slow = next_request(&raw).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let outcome = tokio::time::timeout(WAIT, call)
        .await
        .expect("cancellation is prompt")
        .expect("join");
    assert!(matches!(outcome, Err(RpcError::Cancelled { .. })));

    let note = next_notification(&raw, method::CANCELLED).await;
    let params: CancelledParams =
        serde_json::from_value(note.params.unwrap_or_default()).expect("cancelled params");
    assert_eq!(params.request_id, slow.id);

    // A late answer for the cancelled id goes nowhere.
    raw.send(Response::success(slow.id, json!("late")).into())
        .await?;
    assert_eq!(client.pending_requests(), 0);

    let call = tokio::spawn({
        let client = client.clone();
        async move { client.send_request("next", None).await }
    });
    let next = next_request(&raw).await;
    raw.send(Response::success(next.id, json!("next result")).into())
        .await?;
    assert_eq!(call.await.expect("join")?, json!("next result"));
    Ok(())
}

#[tokio::test]
async fn test_timeout_notifies_peer() -> Result<(), RpcError> {
    let (client, raw) = client_with_raw_peer().await?;

    let call = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request_with(
                    "slow",
                    None,
                    RequestOptions::new().with_timeout(Duration::from_millis(50)),
                )
                .await
        }
    });
    let slow = next_request(&raw).await;

    let outcome = call.await.expect("join");
    match outcome {
        Err(RpcError::Timeout { method, duration }) => {
            assert_eq!(method, "slow");
            assert_eq!(duration, Duration::from_millis(50));
        }
        other => panic!("expected a timeout, got {other:?}"),
    }

    let note = next_notification(&raw, method::CANCELLED).await;
    let params: CancelledParams =
        serde_json::from_value(note.params.unwrap_or_default()).expect("cancelled params");
    assert_eq!(params.request_id, slow.id);
    assert_eq!(params.reason.as_deref(), Some("timeout"));
    Ok(())
}

#[tokio::test]
async fn test_dropping_the_call_cancels_it() -> Result<(), RpcError> {
    let (client, raw) = client_with_raw_peer().await?;

    let abandoned =
        tokio::time::timeout(Duration::from_millis(30), client.send_request("slow", None)).await;
    assert!(abandoned.is_err());

    let slow = next_request(&raw).await;
    let note = next_notification(&raw, method::CANCELLED).await;
    let params: CancelledParams =
        serde_json::from_value(note.params.unwrap_or_default()).expect("cancelled params");
    assert_eq!(params.request_id, slow.id);
    assert_eq!(client.pending_requests(), 0);
    Ok(())
}

#[tokio::test]
async fn test_peer_cancellation_reaches_handler() -> Result<(), RpcError> {
    let (raw, server_side) = MemoryTransport::pair();
    let server = server_builder().accept(server_side);
    send_handshake(&raw).await;
    server.initialized().await?;

    raw.send(request(7, "sleep", json!({ "ms": 10_000 })))
        .await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let cancel = CancelledParams {
        request_id: RequestId::Number(7),
        reason: Some("user gave up".into()),
    };
    raw.send(cancel.into_notification().into()).await?;

    let response = tokio::time::timeout(WAIT, next_response(&raw))
        .await
        .expect("handler observed cancellation");
    assert_eq!(response.id, RequestId::Number(7));
    let error = response.error.expect("cancellation is reported as an error");
    assert_eq!(error.code, codes::REQUEST_CANCELLED);

    // Exactly one response: the next one belongs to the next request.
    raw.send(request(8, "echo", json!({ "n": 8 }))).await?;
    let response = next_response(&raw).await;
    assert_eq!(response.id, RequestId::Number(8));
    assert_eq!(server.active_handlers(), 0);
    Ok(())
}

#[tokio::test]
async fn test_reused_in_flight_id_is_rejected() -> Result<(), RpcError> {
    let (raw, server_side) = MemoryTransport::pair();
    let server = server_builder().accept(server_side);
    send_handshake(&raw).await;
    server.initialized().await?;

    raw.send(request(7, "sleep", json!({ "ms": 200 }))).await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    raw.send(request(7, "echo", json!({ "n": 7 }))).await?;

    let rejected = next_response(&raw).await;
    assert_eq!(rejected.id, RequestId::Number(7));
    let error = rejected.error.expect("reused id is answered with an error");
    assert_eq!(error.code, codes::INVALID_REQUEST);
    assert!(error.message.contains("already in flight"), "{}", error.message);

    // The first request is untouched by the duplicate.
    let original = next_response(&raw).await;
    assert_eq!(original.id, RequestId::Number(7));
    assert_eq!(original.result, Some(json!({ "slept": 200 })));
    Ok(())
}

#[tokio::test]
async fn test_handler_panic_becomes_internal_error() -> Result<(), RpcError> {
    let (client, _server) = connected(&server_builder()).await?;

    match client.send_request("panic", None).await {
        Err(RpcError::Remote(remote)) => assert_eq!(remote.code, codes::INTERNAL_ERROR),
        other => panic!("expected an internal error, got {other:?}"),
    }
    assert_eq!(client.send_request("echo", Some(json!(1))).await?, json!(1));
    Ok(())
}

#[tokio::test]
async fn test_progress_is_routed_to_the_caller() -> Result<(), RpcError> {
    let builder = server_builder().handler("work", |_params, ctx: RequestContext| async move {
        ctx.progress(1.0, Some(3.0), None).await?;
        ctx.progress(1.0, Some(3.0), None).await?;
        ctx.progress(0.5, Some(3.0), None).await?;
        ctx.progress(2.0, Some(3.0), Some("halfway".into())).await?;
        ctx.progress(3.0, Some(3.0), None).await?;
        Ok(json!("done"))
    });
    let (client, _server) = connected(&builder).await?;

    let (sink, mut updates) = mpsc::unbounded_channel();
    let result = client
        .send_request_with(
            "work",
            Some(json!({})),
            RequestOptions::new().with_progress(sink),
        )
        .await?;
    assert_eq!(result, json!("done"));

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update.progress);
    }
    assert_eq!(seen, vec![1.0, 2.0, 3.0]);
    Ok(())
}

#[tokio::test]
async fn test_progress_without_token_is_a_no_op() -> Result<(), RpcError> {
    let builder = server_builder().handler("work", |_params, ctx: RequestContext| async move {
        assert!(ctx.progress_token().is_none());
        ctx.progress(1.0, None, None).await?;
        Ok(json!("done"))
    });
    let (client, _server) = connected(&builder).await?;
    assert_eq!(client.send_request("work", None).await?, json!("done"));
    Ok(())
}

#[tokio::test]
async fn test_handlers_can_call_back_into_the_peer() -> Result<(), RpcError> {
    let server = server_builder().handler("whoami", |_params, ctx: RequestContext| async move {
        ctx.session().send_request("client/name", None).await
    });
    let (client_side, server_side) = MemoryTransport::pair();
    let _server = server.accept(server_side);
    let client = SessionBuilder::default()
        .handler("client/name", |_params, _ctx: RequestContext| async move {
            Ok(json!("test-client"))
        })
        .connect(client_side)
        .await?;

    assert_eq!(client.send_request("whoami", None).await?, json!("test-client"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_handler_concurrency_is_bounded() -> Result<(), RpcError> {
    let builder = SessionBuilder::new(SessionConfig::default().with_max_concurrent_handlers(1))
        .handler("sleep", |_params, _ctx: RequestContext| async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(json!(null))
        });
    let (client, _server) = connected(&builder).await?;

    let started = tokio::time::Instant::now();
    let (a, b) = tokio::join!(
        client.send_request("sleep", None),
        client.send_request("sleep", None)
    );
    a?;
    b?;
    assert!(started.elapsed() >= Duration::from_millis(200));
    Ok(())
}
