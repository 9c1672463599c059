//! In-memory transport for tests and in-process sessions.
//!
//! ```rust
//! use wirekit_transport::{MemoryTransport, Transport};
//!
//! let (client, server) = MemoryTransport::pair();
//! assert!(client.is_connected());
//! assert!(server.is_connected());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_lock::Mutex as AsyncMutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wirekit_core::protocol::Message;

use crate::error::TransportError;
use crate::traits::{Transport, TransportMetadata};

/// One end of an in-memory transport pair.
///
/// Closing either end stops the other end's receive stream once any
/// buffered messages have been drained.
pub struct MemoryTransport {
    sender: mpsc::Sender<Message>,
    receiver: AsyncMutex<mpsc::Receiver<Message>>,
    connected: Arc<AtomicBool>,
    closed: CancellationToken,
    metadata: TransportMetadata,
}

impl MemoryTransport {
    /// Create a connected pair of memory transports.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(32)
    }

    /// Create a connected pair with a specific buffer capacity (at least 1).
    #[must_use]
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let capacity = capacity.max(1);
        let (tx1, rx1) = mpsc::channel(capacity);
        let (tx2, rx2) = mpsc::channel(capacity);

        let connected = Arc::new(AtomicBool::new(true));
        let closed = CancellationToken::new();

        let first = Self {
            sender: tx2,
            receiver: AsyncMutex::new(rx1),
            connected: Arc::clone(&connected),
            closed: closed.clone(),
            metadata: TransportMetadata::new("memory").with_peer("peer-1"),
        };
        let second = Self {
            sender: tx1,
            receiver: AsyncMutex::new(rx2),
            connected,
            closed,
            metadata: TransportMetadata::new("memory").with_peer("peer-0"),
        };

        (first, second)
    }
}

impl Transport for MemoryTransport {
    type Error = TransportError;

    async fn send(&self, msg: Message) -> Result<(), Self::Error> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionClosed);
        }
        self.sender
            .send(msg)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Option<Message>, Self::Error> {
        let mut receiver = self.receiver.lock().await;
        tokio::select! {
            biased;
            msg = receiver.recv() => Ok(msg),
            () = self.closed.cancelled() => Ok(receiver.try_recv().ok()),
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.connected.store(false, Ordering::Release);
        self.closed.cancel();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn metadata(&self) -> TransportMetadata {
        self.metadata.clone()
    }
}
