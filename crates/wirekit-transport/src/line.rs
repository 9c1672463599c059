//! Newline-delimited message framing over any byte stream pair.
//!
//! [`LineTransport`] is the engine behind both the process transport and the
//! stdio transport. Each message is one compact JSON document terminated by
//! `\n`.
//!
//! Two pump tasks sit between the byte streams and the transport handle:
//!
//! - the reader pump decodes lines into the inbound channel
//! - the writer pump drains the outbound channel into the writer
//!
//! Both channels are bounded with a capacity of at least one, and
//! [`LineTransport::new`] waits until each pump has reported that it is
//! running before it returns. A `send` issued right after construction
//! therefore always finds a live consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_lock::Mutex as AsyncMutex;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use wirekit_core::protocol::Message;

use crate::error::TransportError;
use crate::traits::{Transport, TransportMetadata};

/// Default maximum line length (16 MiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Default capacity of the inbound and outbound channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Default time [`Transport::close`] waits for queued lines to be written.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a [`LineTransport`].
#[derive(Debug, Clone)]
pub struct LineTransportConfig {
    /// Capacity of the inbound and outbound channels. Always at least 1.
    pub channel_capacity: usize,
    /// Longest accepted line in bytes, excluding the terminator.
    pub max_line_length: usize,
    /// How long `close` waits for queued lines to reach a peer that may have
    /// stopped reading. Lines still queued after that are discarded.
    pub flush_timeout: Duration,
    startup_delay: Option<Duration>,
}

impl Default for LineTransportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            startup_delay: None,
        }
    }
}

impl LineTransportConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the channel capacity. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the maximum line length.
    #[must_use]
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    /// Set how long `close` waits for queued lines to be written.
    #[must_use]
    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Delay each pump task before it starts, to exercise start-up ordering.
    #[doc(hidden)]
    #[must_use]
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = Some(delay);
        self
    }
}

/// A transport framing messages as newline-delimited JSON.
pub struct LineTransport {
    outbound: AsyncMutex<Option<mpsc::Sender<String>>>,
    inbound: AsyncMutex<mpsc::Receiver<Result<Message, TransportError>>>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
    writer_done: AsyncMutex<Option<oneshot::Receiver<()>>>,
    max_line_length: usize,
    flush_timeout: Duration,
    metadata: TransportMetadata,
}

impl LineTransport {
    /// Start a line transport over a reader/writer pair with default config.
    pub async fn new<R, W>(reader: R, writer: W) -> Result<Self, TransportError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_config(reader, writer, LineTransportConfig::default()).await
    }

    /// Start a line transport with a specific configuration.
    ///
    /// Returns only after both pump tasks are running.
    pub async fn with_config<R, W>(
        reader: R,
        writer: W,
        config: LineTransportConfig,
    ) -> Result<Self, TransportError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(reader, writer, config, TransportMetadata::new("line")).await
    }

    pub(crate) async fn start<R, W>(
        reader: R,
        writer: W,
        config: LineTransportConfig,
        metadata: TransportMetadata,
    ) -> Result<Self, TransportError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let capacity = config.channel_capacity.max(1);
        let (out_tx, out_rx) = mpsc::channel::<String>(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let connected = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();

        let (reader_ready_tx, reader_ready_rx) = oneshot::channel();
        let (writer_ready_tx, writer_ready_rx) = oneshot::channel();
        let (writer_done_tx, writer_done_rx) = oneshot::channel();

        let framed_reader = FramedRead::new(
            reader,
            LinesCodec::new_with_max_length(config.max_line_length),
        );
        let framed_writer = FramedWrite::new(writer, LinesCodec::new());

        tokio::spawn(read_pump(
            framed_reader,
            in_tx,
            Arc::clone(&connected),
            shutdown.clone(),
            config.max_line_length,
            config.startup_delay,
            reader_ready_tx,
        ));
        tokio::spawn(write_pump(
            framed_writer,
            out_rx,
            Arc::clone(&connected),
            shutdown.clone(),
            config.startup_delay,
            writer_ready_tx,
            writer_done_tx,
        ));

        reader_ready_rx
            .await
            .map_err(|_| TransportError::connection("reader pump exited before starting"))?;
        writer_ready_rx
            .await
            .map_err(|_| TransportError::connection("writer pump exited before starting"))?;

        tracing::debug!(
            transport = metadata.kind,
            capacity,
            "line transport pumps ready"
        );

        Ok(Self {
            outbound: AsyncMutex::new(Some(out_tx)),
            inbound: AsyncMutex::new(in_rx),
            connected,
            shutdown,
            writer_done: AsyncMutex::new(Some(writer_done_rx)),
            max_line_length: config.max_line_length,
            flush_timeout: config.flush_timeout,
            metadata,
        })
    }

    /// Stop accepting messages and let the writer drain what is queued until
    /// `deadline`. Past the deadline the writer is stopped mid-write and the
    /// rest is discarded. Either way the underlying writer is dropped, which
    /// closes a pipe. Returns whether everything queued was written.
    pub(crate) async fn shut_down_by(&self, deadline: Instant) -> bool {
        self.connected.store(false, Ordering::Release);
        // Dropping the sender lets the writer flush what is queued and exit.
        drop(self.outbound.lock().await.take());

        let mut flushed = true;
        if let Some(mut done) = self.writer_done.lock().await.take() {
            if tokio::time::timeout_at(deadline, &mut done).await.is_err() {
                tracing::warn!(
                    transport = self.metadata.kind,
                    "peer stopped reading; discarding queued lines"
                );
                flushed = false;
                self.shutdown.cancel();
                let _ = done.await;
            }
        }
        self.shutdown.cancel();
        flushed
    }
}

async fn read_pump<R>(
    mut framed: FramedRead<R, LinesCodec>,
    inbound: mpsc::Sender<Result<Message, TransportError>>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
    max_line_length: usize,
    startup_delay: Option<Duration>,
    ready: oneshot::Sender<()>,
) where
    R: AsyncRead + Unpin,
{
    if let Some(delay) = startup_delay {
        tokio::time::sleep(delay).await;
    }
    let _ = ready.send(());

    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = framed.next() => next,
        };

        let item = match next {
            None => break,
            Some(Ok(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match Message::decode(trimmed.as_bytes()) {
                    Ok(msg) => Ok(msg),
                    Err(e) => {
                        tracing::error!(error = %e, "undecodable line on the wire");
                        Err(TransportError::Framing(e))
                    }
                }
            }
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::error!(max = max_line_length, "inbound line exceeds maximum length");
                Err(TransportError::MessageTooLarge {
                    size: max_line_length + 1,
                    max: max_line_length,
                })
            }
            Some(Err(LinesCodecError::Io(e))) => Err(TransportError::Io(e)),
        };

        let fatal = item.is_err();
        if inbound.send(item).await.is_err() || fatal {
            break;
        }
    }

    connected.store(false, Ordering::Release);
    tracing::trace!("line reader pump stopped");
}

async fn write_pump<W>(
    mut framed: FramedWrite<W, LinesCodec>,
    mut outbound: mpsc::Receiver<String>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
    startup_delay: Option<Duration>,
    ready: oneshot::Sender<()>,
    done: oneshot::Sender<()>,
) where
    W: AsyncWrite + Unpin,
{
    if let Some(delay) = startup_delay {
        tokio::time::sleep(delay).await;
    }
    let _ = ready.send(());

    let mut abandoned = false;
    while let Some(line) = outbound.recv().await {
        // A peer that stops reading can block a write forever.
        let sent = tokio::select! {
            biased;
            sent = framed.send(line) => sent,
            () = shutdown.cancelled() => {
                abandoned = true;
                break;
            }
        };
        if let Err(e) = sent {
            tracing::warn!(error = %e, "line writer failed");
            connected.store(false, Ordering::Release);
            break;
        }
    }

    if !abandoned {
        tokio::select! {
            biased;
            closed = SinkExt::<String>::close(&mut framed) => {
                if let Err(e) = closed {
                    tracing::debug!(error = %e, "closing line writer failed");
                }
            }
            () = shutdown.cancelled() => {}
        }
    }
    drop(framed);
    let _ = done.send(());
    tracing::trace!("line writer pump stopped");
}

impl Transport for LineTransport {
    type Error = TransportError;

    async fn send(&self, msg: Message) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let line = msg.encode()?;
        if line.len() > self.max_line_length {
            return Err(TransportError::MessageTooLarge {
                size: line.len(),
                max: self.max_line_length,
            });
        }

        let sender = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(TransportError::AlreadyClosed)?;
        sender
            .send(line)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Option<Message>, Self::Error> {
        let mut inbound = self.inbound.lock().await;
        match inbound.recv().await {
            Some(Ok(msg)) => Ok(Some(msg)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Flush queued lines for up to the configured flush timeout, then stop.
    async fn close(&self) -> Result<(), Self::Error> {
        self.shut_down_by(Instant::now() + self.flush_timeout).await;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn metadata(&self) -> TransportMetadata {
        self.metadata.clone()
    }
}

impl Drop for LineTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use wirekit_core::protocol::{Notification, Request};

    #[tokio::test]
    async fn test_round_trip_over_duplex() -> Result<(), TransportError> {
        let (a_read, b_write) = tokio::io::duplex(1024);
        let (b_read, a_write) = tokio::io::duplex(1024);

        let a = LineTransport::new(a_read, a_write).await?;
        let b = LineTransport::new(b_read, b_write).await?;

        a.send(Request::new("ping", 1).into()).await?;
        let got = b.recv().await?.ok_or(TransportError::ConnectionClosed)?;
        assert_eq!(got.method(), Some("ping"));
        Ok(())
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() -> Result<(), TransportError> {
        let (transport_read, mut peer_write) = tokio::io::duplex(1024);
        let (_peer_read, transport_write) = tokio::io::duplex(1024);
        let transport = LineTransport::new(transport_read, transport_write).await?;

        peer_write
            .write_all(b"\n\r\n{\"jsonrpc\":\"2.0\",\"method\":\"tick\"}\n")
            .await?;
        let got = transport.recv().await?.ok_or(TransportError::ConnectionClosed)?;
        assert!(got.is_notification());
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_line_is_a_framing_error() -> Result<(), TransportError> {
        let (transport_read, mut peer_write) = tokio::io::duplex(1024);
        let (_peer_read, transport_write) = tokio::io::duplex(1024);
        let transport = LineTransport::new(transport_read, transport_write).await?;

        peer_write.write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7}\n").await?;
        let err = transport.recv().await.err();
        assert!(matches!(err, Some(ref e) if e.is_framing()), "{err:?}");

        // The reader stops after a framing error.
        assert!(transport.recv().await?.is_none());
        assert!(!transport.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_line_rejected() -> Result<(), TransportError> {
        let (transport_read, mut peer_write) = tokio::io::duplex(4096);
        let (_peer_read, transport_write) = tokio::io::duplex(4096);
        let config = LineTransportConfig::new().with_max_line_length(64);
        let transport = LineTransport::with_config(transport_read, transport_write, config).await?;

        let long = format!("{}\n", "x".repeat(200));
        peer_write.write_all(long.as_bytes()).await?;
        assert!(matches!(
            transport.recv().await,
            Err(TransportError::MessageTooLarge { max: 64, .. })
        ));

        let too_big = Notification::with_params("big", serde_json::json!({"pad": "y".repeat(100)}));
        assert!(matches!(
            transport.send(too_big.into()).await,
            Err(TransportError::NotConnected | TransportError::MessageTooLarge { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_close_flushes_queued_lines() -> Result<(), TransportError> {
        let (transport_read, _peer_write) = tokio::io::duplex(1024);
        let (peer_read, transport_write) = tokio::io::duplex(1024);
        let transport = LineTransport::new(transport_read, transport_write).await?;

        transport.send(Notification::new("one").into()).await?;
        transport.send(Notification::new("two").into()).await?;
        transport.close().await?;

        let mut lines = BufReader::new(peer_read).lines();
        let first = lines.next_line().await?.unwrap_or_default();
        let second = lines.next_line().await?.unwrap_or_default();
        assert!(first.contains("\"one\""));
        assert!(second.contains("\"two\""));
        assert!(lines.next_line().await?.is_none());

        assert!(matches!(
            transport.send(Notification::new("three").into()).await,
            Err(TransportError::NotConnected)
        ));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_gives_up_on_peer_that_stops_reading() -> Result<(), TransportError> {
        let (transport_read, _peer_write) = tokio::io::duplex(1024);
        let (_peer_read, transport_write) = tokio::io::duplex(256);
        let config = LineTransportConfig::new().with_flush_timeout(Duration::from_millis(200));
        let transport = LineTransport::with_config(transport_read, transport_write, config).await?;

        for n in 0..8 {
            let note = Notification::with_params("fill", serde_json::json!({"n": n, "pad": "z".repeat(512)}));
            transport.send(note.into()).await?;
        }

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(5), transport.close())
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "close".into(),
                duration: Duration::from_secs(5),
            })??;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!transport.is_connected());
        Ok(())
    }

    #[test]
    fn test_capacity_is_at_least_one() {
        let config = LineTransportConfig::new().with_channel_capacity(0);
        assert_eq!(config.channel_capacity, 1);
    }
}
