//! Event stores backing resumable streams.
//!
//! The streaming HTTP transport appends every server-to-client message to
//! an [`EventStore`] before delivering it. A reconnecting client names the
//! last sequence number it saw and receives everything after it.
//!
//! The store is also the proof that a session exists: an instance that does
//! not know a session locally may resume it when the store holds its stream.
//!
//! # Contract
//!
//! - Sequence numbers start at 1 and increase by one per append, per stream.
//! - Each stream has a single writer. Concurrent readers are unrestricted.
//! - `replay` returns events in append order.
//! - A stream whose events were pruned past the requested cursor reports
//!   [`StoreError::ReplayExpired`] instead of returning a gap. A cursor at
//!   the end of the stream missed nothing and replays empty.
//! - Activity is an append, a replay or a [`touch`](EventStore::touch). The
//!   time-to-live runs from the last of these.

mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wirekit_core::protocol::Message;

pub use memory::MemoryEventStore;

/// Default time-to-live of a stream after its last activity.
pub const DEFAULT_EVENT_TTL: Duration = Duration::from_secs(300);

/// One stored message on a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// The stream the event belongs to.
    pub stream_id: String,
    /// Position on the stream, starting at 1.
    pub seq: u64,
    /// The message itself.
    pub message: Message,
}

/// Errors reported by an event store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested range is no longer retained.
    #[error("replay of stream {stream_id} after {after} expired (earliest retained: {earliest})")]
    ReplayExpired {
        /// The stream.
        stream_id: String,
        /// The cursor the caller asked to resume after.
        after: u64,
        /// The earliest sequence number that could still be replayed.
        earliest: u64,
    },

    /// The store has never seen the stream, or it was expired explicitly.
    #[error("stream not found: {stream_id}")]
    StreamNotFound {
        /// The stream.
        stream_id: String,
    },

    /// The cursor names an event that was never written.
    #[error("cursor {after} is ahead of stream {stream_id} (last: {last})")]
    CursorAhead {
        /// The stream.
        stream_id: String,
        /// The cursor supplied.
        after: u64,
        /// The last sequence number written.
        last: u64,
    },

    /// The backing store failed.
    #[error("event store backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Create a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Retention settings for an event store.
#[derive(Debug, Clone)]
pub struct EventStoreConfig {
    /// How long a stream is retained after its last activity.
    pub ttl: Duration,
    /// Maximum events retained per stream; the oldest are dropped first.
    pub max_events_per_stream: Option<usize>,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_EVENT_TTL,
            max_events_per_stream: None,
        }
    }
}

impl EventStoreConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the time-to-live after last activity.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Cap the number of retained events per stream.
    #[must_use]
    pub fn with_max_events_per_stream(mut self, max: usize) -> Self {
        self.max_events_per_stream = Some(max.max(1));
        self
    }
}

/// An append-only, per-stream event log.
///
/// Implementations may be shared between processes (a cache or database)
/// and must not hold locks across backend I/O.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Append a message and return its sequence number.
    ///
    /// Appending to an unknown stream creates it. Appends never wait for a
    /// reader.
    async fn append(&self, stream_id: &str, message: Message) -> Result<u64, StoreError>;

    /// Return every retained event with a sequence number greater than
    /// `after`, in order. `None` replays from the start of the stream.
    async fn replay(
        &self,
        stream_id: &str,
        after: Option<u64>,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Record activity on a stream without appending to it.
    ///
    /// Hosts call this while a client is still using the session, so a quiet
    /// session does not expire underneath it. A stream that had already
    /// expired becomes live again from its last sequence number; the events
    /// pruned before that stay expired. Returns whether the stream is known.
    async fn touch(&self, stream_id: &str) -> Result<bool, StoreError>;

    /// Drop a stream and all its events.
    async fn expire(&self, stream_id: &str) -> Result<(), StoreError>;

    /// Whether the store holds a live stream with this identifier.
    async fn contains(&self, stream_id: &str) -> Result<bool, StoreError>;

    /// The last sequence number written to a stream, if the stream exists.
    async fn last_sequence(&self, stream_id: &str) -> Result<Option<u64>, StoreError>;

    /// Remove streams whose time-to-live has elapsed. Returns the number of
    /// events dropped.
    async fn prune_expired(&self) -> Result<usize, StoreError>;
}
