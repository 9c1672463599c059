//! Sessions end to end over the streaming HTTP transport.

#![cfg(feature = "http")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use wirekit::http::{
    self, HttpClientTransport, HttpServerConfig, HttpTransportConfig, SESSION_ID_HEADER,
    SessionStart, StreamableHttpService,
};
use wirekit::prelude::*;
use wirekit::transport::{EventStore, EventStoreConfig, MemoryEventStore};

const WAIT: Duration = Duration::from_secs(5);

fn server_builder() -> SessionBuilder {
    SessionBuilder::new(SessionConfig::default().with_info("http-test-server", "1.0.0"))
        .handler("echo", |params, _ctx: RequestContext| async move {
            Ok(params.unwrap_or_else(|| json!({})))
        })
        .handler("count", |params, ctx: RequestContext| async move {
            let to = params
                .as_ref()
                .and_then(|p| p.get("to"))
                .and_then(Value::as_u64)
                .unwrap_or(3);
            for n in 1..=to {
                ctx.progress(n as f64, Some(to as f64), None).await?;
            }
            Ok(json!({ "counted": to }))
        })
        .handler("sleep", |params, _ctx: RequestContext| async move {
            let ms = params
                .as_ref()
                .and_then(|p| p.get("ms"))
                .and_then(Value::as_u64)
                .unwrap_or(100);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!({ "slept": ms }))
        })
}

async fn serve(service: StreamableHttpService) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(service.serve(listener));
    format!("http://{addr}/mcp")
}

#[tokio::test]
async fn test_session_over_http() -> Result<(), RpcError> {
    let url = serve(http::service(server_builder(), HttpServerConfig::new())).await;

    let client = tokio::time::timeout(
        WAIT,
        http::connect(&SessionBuilder::default(), HttpTransportConfig::new(url)),
    )
    .await
    .expect("connect timed out")?;
    assert_eq!(client.state(), SessionState::Active);
    assert_eq!(
        client
            .negotiated()
            .and_then(|n| n.peer_info.as_ref())
            .map(|p| p.name.as_str()),
        Some("http-test-server")
    );

    let reply = client
        .send_request("echo", Some(json!({ "text": "hi" })))
        .await?;
    assert_eq!(reply, json!({ "text": "hi" }));
    client.ping().await?;
    Ok(())
}

#[tokio::test]
async fn test_progress_over_http() -> Result<(), RpcError> {
    let url = serve(http::service(server_builder(), HttpServerConfig::new())).await;
    let client = http::connect(&SessionBuilder::default(), HttpTransportConfig::new(url)).await?;

    let (sink, mut updates) = mpsc::unbounded_channel();
    let result = client
        .send_request_with(
            "count",
            Some(json!({ "to": 4 })),
            RequestOptions::new().with_progress(sink),
        )
        .await?;
    assert_eq!(result, json!({ "counted": 4 }));

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update.progress);
    }
    assert_eq!(seen, vec![1.0, 2.0, 3.0, 4.0]);
    Ok(())
}

#[tokio::test]
async fn test_session_roams_between_instances() -> Result<(), RpcError> {
    let store = Arc::new(MemoryEventStore::new());
    let starts = Arc::new(Mutex::new(Vec::new()));
    let config = HttpServerConfig::new().with_event_store(store.clone());

    let instance = |seen: Arc<Mutex<Vec<SessionStart>>>| {
        http::service_with(server_builder(), config.clone(), move |_session, start| {
            seen.lock().expect("lock").push(start.clone());
        })
    };
    let first = serve(instance(Arc::clone(&starts))).await;
    let second = serve(instance(Arc::clone(&starts))).await;

    // Keep a handle on the transport to learn the session id and cursor.
    let transport = Arc::new(HttpClientTransport::connect(
        HttpTransportConfig::new(first).without_event_stream(),
    )
    .await?);
    let client = SessionBuilder::default()
        .connect(Arc::clone(&transport))
        .await?;
    assert_eq!(
        client.send_request("echo", Some(json!({ "on": "first" }))).await?,
        json!({ "on": "first" })
    );

    let session_id = transport.session_id().await.expect("server assigned a session id");
    let cursor = transport.last_event_id().await;
    assert_eq!(
        store.last_sequence(&session_id).await.expect("store"),
        Some(cursor)
    );

    let roamed = http::connect(
        &SessionBuilder::default(),
        HttpTransportConfig::new(second)
            .with_session(session_id.clone(), cursor)
            .without_event_stream(),
    )
    .await?;
    assert_eq!(
        roamed.send_request("echo", Some(json!({ "on": "second" }))).await?,
        json!({ "on": "second" })
    );

    let starts = starts.lock().expect("lock").clone();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[0], SessionStart::New);
    assert!(matches!(starts[1], SessionStart::Resumed { .. }));
    Ok(())
}

#[tokio::test]
async fn test_quiet_hosted_session_outlives_store_ttl() -> Result<(), RpcError> {
    let store = Arc::new(MemoryEventStore::with_config(
        EventStoreConfig::new().with_ttl(Duration::from_millis(300)),
    ));
    let config = HttpServerConfig::new().with_event_store(store.clone());
    let url = serve(http::service(server_builder(), config)).await;

    let transport = Arc::new(HttpClientTransport::connect(
        HttpTransportConfig::new(url).without_event_stream(),
    )
    .await?);
    let client = SessionBuilder::default()
        .connect(Arc::clone(&transport))
        .await?;
    assert_eq!(
        client.send_request("echo", Some(json!({ "n": 1 }))).await?,
        json!({ "n": 1 })
    );

    // Go quiet for longer than the TTL and let the store expire the stream.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.prune_expired().await.expect("prune"), 2);
    let session_id = transport.session_id().await.expect("server assigned a session id");
    assert!(!store.contains(&session_id).await.expect("store"));

    // The client missed nothing, so the session carries on.
    assert_eq!(
        client.send_request("echo", Some(json!({ "n": 2 }))).await?,
        json!({ "n": 2 })
    );
    assert!(store.contains(&session_id).await.expect("store"));
    assert_eq!(store.last_sequence(&session_id).await.expect("store"), Some(3));
    assert_eq!(client.state(), SessionState::Active);
    Ok(())
}

#[tokio::test]
async fn test_post_reusing_in_flight_id_gets_an_answer() -> Result<(), RpcError> {
    let url = serve(http::service(server_builder(), HttpServerConfig::new())).await;
    let transport = Arc::new(HttpClientTransport::connect(
        HttpTransportConfig::new(url.clone()).without_event_stream(),
    )
    .await?);
    let client = SessionBuilder::default()
        .connect(Arc::clone(&transport))
        .await?;
    let session_id = transport.session_id().await.expect("server assigned a session id");

    let raw = reqwest::Client::new();
    let post = |body: Value| {
        raw.post(&url)
            .header(SESSION_ID_HEADER, &session_id)
            .header("accept", "application/json, text/event-stream")
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
    };
    let request = |method: &str, params: Value| {
        json!({ "jsonrpc": "2.0", "id": 1007, "method": method, "params": params })
    };

    let first = post(request("sleep", json!({ "ms": 300 })))
        .await
        .expect("first post");
    assert!(first.status().is_success());
    let second = post(request("echo", json!({ "n": 2 })))
        .await
        .expect("second post");
    assert!(second.status().is_success());

    // The duplicate is answered, so its response stream ends.
    let body = tokio::time::timeout(WAIT, second.text())
        .await
        .expect("response stream ended")
        .expect("body");
    assert!(body.contains("-32600"), "{body}");
    assert!(body.contains("already in flight"), "{body}");
    tokio::time::timeout(WAIT, first.text())
        .await
        .expect("first stream ended")
        .expect("body");

    assert_eq!(
        client.send_request("echo", Some(json!({ "n": 3 }))).await?,
        json!({ "n": 3 })
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_session_fails_closed() -> Result<(), RpcError> {
    let url = serve(http::service(server_builder(), HttpServerConfig::new())).await;

    let client = http::connect(
        &SessionBuilder::default(),
        HttpTransportConfig::new(url)
            .with_session("no-such-session", 0)
            .without_event_stream(),
    )
    .await?;
    let err = tokio::time::timeout(WAIT, client.send_request("echo", None))
        .await
        .expect("failure is prompt")
        .expect_err("unknown sessions are rejected");
    assert!(
        matches!(&err, RpcError::SessionNotFound { session_id } if session_id == "no-such-session"),
        "unexpected error: {err:?}"
    );

    tokio::time::timeout(WAIT, client.closed())
        .await
        .expect("session torn down");
    assert_eq!(client.state(), SessionState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_closing_the_client_ends_the_server_session() -> Result<(), RpcError> {
    let (opened_tx, mut opened) = mpsc::unbounded_channel();
    let service = http::service_with(server_builder(), HttpServerConfig::new(), move |session, _| {
        let _ = opened_tx.send(session);
    });
    let url = serve(service).await;

    let client = http::connect(&SessionBuilder::default(), HttpTransportConfig::new(url)).await?;
    let server = tokio::time::timeout(WAIT, opened.recv())
        .await
        .expect("session opened")
        .expect("service alive");
    server.initialized().await?;

    client.close().await?;
    tokio::time::timeout(WAIT, server.closed())
        .await
        .expect("server session ends when the client leaves");
    Ok(())
}
