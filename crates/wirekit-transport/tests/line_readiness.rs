//! A send issued right after construction must never deadlock, however
//! late the pump tasks get scheduled.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use wirekit_core::protocol::{Message, Request, Response};
use wirekit_transport::{LineTransport, LineTransportConfig, Transport, TransportError};

const BOUND: Duration = Duration::from_secs(2);

/// Answer every request line with an empty success response.
async fn answer_requests(reader: tokio::io::DuplexStream, mut writer: tokio::io::DuplexStream) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(Message::Request(request)) = Message::decode(line.as_bytes()) else {
            continue;
        };
        let reply = Message::from(Response::success(request.id, serde_json::json!({})));
        let encoded = reply.encode().expect("encode");
        if writer.write_all(format!("{encoded}\n").as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn request_right_after_start(config: LineTransportConfig) -> Result<(), TransportError> {
    let (transport_read, peer_write) = tokio::io::duplex(64);
    let (peer_read, transport_write) = tokio::io::duplex(64);
    tokio::spawn(answer_requests(peer_read, peer_write));

    let transport = LineTransport::with_config(transport_read, transport_write, config).await?;
    transport.send(Request::new("ping", 1).into()).await?;
    let reply = transport.recv().await?;
    assert!(reply.is_some_and(|m| m.is_response()));
    Ok(())
}

#[tokio::test]
async fn test_immediate_request_under_startup_delay() {
    for delay_ms in [0_u64, 1, 5, 20] {
        let config = LineTransportConfig::new()
            .with_channel_capacity(1)
            .with_startup_delay(Duration::from_millis(delay_ms));

        tokio::time::timeout(BOUND + Duration::from_millis(delay_ms), request_right_after_start(config))
            .await
            .unwrap_or_else(|_| panic!("request deadlocked with {delay_ms}ms pump delay"))
            .expect("request failed");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_immediate_request_on_multi_thread_runtime() {
    for delay_ms in [0_u64, 1, 5, 20] {
        let config =
            LineTransportConfig::new().with_startup_delay(Duration::from_millis(delay_ms));
        tokio::time::timeout(BOUND, request_right_after_start(config))
            .await
            .expect("request deadlocked")
            .expect("request failed");
    }
}

#[tokio::test]
async fn test_burst_through_capacity_one() -> Result<(), TransportError> {
    let (transport_read, peer_write) = tokio::io::duplex(64);
    let (peer_read, transport_write) = tokio::io::duplex(64);
    tokio::spawn(answer_requests(peer_read, peer_write));

    let config = LineTransportConfig::new().with_channel_capacity(1);
    let transport = LineTransport::with_config(transport_read, transport_write, config).await?;

    let sends = async {
        for id in 0..50_i64 {
            transport.send(Request::new("ping", id).into()).await?;
        }
        Ok::<_, TransportError>(())
    };
    let receives = async {
        let mut seen = Vec::new();
        while seen.len() < 50 {
            match transport.recv().await? {
                Some(Message::Response(r)) => seen.push(r.id),
                Some(_) => {}
                None => break,
            }
        }
        Ok::<_, TransportError>(seen)
    };

    let (sent, seen) = tokio::time::timeout(BOUND, async { tokio::join!(sends, receives) })
        .await
        .expect("burst deadlocked");
    sent?;
    let seen = seen?;
    assert_eq!(seen.len(), 50);
    assert_eq!(seen.first(), Some(&wirekit_core::protocol::RequestId::Number(0)));
    assert_eq!(seen.last(), Some(&wirekit_core::protocol::RequestId::Number(49)));
    Ok(())
}
