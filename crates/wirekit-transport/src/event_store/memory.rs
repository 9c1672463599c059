//! In-process event store.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use wirekit_core::protocol::Message;

use super::{EventStore, EventStoreConfig, StoreError, StoredEvent};

#[derive(Debug)]
struct StreamLog {
    last_seq: u64,
    /// Everything at or below this sequence number has been dropped.
    pruned_through: u64,
    events: VecDeque<StoredEvent>,
    last_activity: Instant,
    /// Set once the TTL elapsed. The header is kept for one more TTL so late
    /// replays learn the range expired instead of that the stream never was.
    tombstoned: bool,
}

impl StreamLog {
    fn new() -> Self {
        Self {
            last_seq: 0,
            pruned_through: 0,
            events: VecDeque::new(),
            last_activity: Instant::now(),
            tombstoned: false,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn idle_for(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) >= ttl
    }
}

/// An [`EventStore`] kept in memory.
///
/// Each stream is a small log inside a [`DashMap`]; every operation takes
/// the stream's shard lock briefly and never across an await point. Appends
/// to one stream are serialized by that lock, so even several writers on the
/// same stream observe a single total order.
///
/// ```rust
/// # tokio_test::block_on(async {
/// use wirekit_core::protocol::Notification;
/// use wirekit_transport::event_store::{EventStore, MemoryEventStore};
///
/// let store = MemoryEventStore::new();
/// let seq = store.append("s1", Notification::new("tick").into()).await.unwrap();
/// assert_eq!(seq, 1);
/// assert_eq!(store.replay("s1", Some(0)).await.unwrap().len(), 1);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    streams: DashMap<String, StreamLog>,
    config: EventStoreConfig,
}

impl MemoryEventStore {
    /// Create a store with default retention.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with specific retention settings.
    #[must_use]
    pub fn with_config(config: EventStoreConfig) -> Self {
        Self {
            streams: DashMap::new(),
            config,
        }
    }

    /// The retention settings in effect.
    #[must_use]
    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    /// Number of streams currently tracked, tombstones included.
    #[must_use]
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Number of events retained for a stream.
    #[must_use]
    pub fn event_count(&self, stream_id: &str) -> usize {
        self.streams.get(stream_id).map_or(0, |log| log.events.len())
    }

    /// Run [`EventStore::prune_expired`] every `interval` until the store
    /// is dropped.
    pub fn spawn_pruner(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.prune_now();
            }
        })
    }

    fn prune_now(&self) -> usize {
        let ttl = self.config.ttl;
        let now = Instant::now();
        let mut dropped = 0;

        self.streams.retain(|stream_id, log| {
            if !log.idle_for(ttl, now) {
                return true;
            }
            if log.tombstoned {
                tracing::debug!(stream_id = %stream_id, "removing expired stream header");
                return false;
            }
            dropped += log.events.len();
            log.events.clear();
            log.pruned_through = log.last_seq;
            log.tombstoned = true;
            log.last_activity = now;
            tracing::debug!(
                stream_id = %stream_id,
                last_seq = log.last_seq,
                "stream expired after inactivity"
            );
            true
        });

        dropped
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, stream_id: &str, message: Message) -> Result<u64, StoreError> {
        let mut log = self
            .streams
            .entry(stream_id.to_string())
            .or_insert_with(StreamLog::new);

        log.tombstoned = false;
        log.last_seq += 1;
        let seq = log.last_seq;
        log.events.push_back(StoredEvent {
            stream_id: stream_id.to_string(),
            seq,
            message,
        });

        if let Some(max) = self.config.max_events_per_stream {
            while log.events.len() > max {
                if let Some(oldest) = log.events.pop_front() {
                    log.pruned_through = oldest.seq;
                }
            }
        }
        log.touch();

        tracing::trace!(stream_id = %stream_id, seq, "event appended");
        Ok(seq)
    }

    async fn replay(
        &self,
        stream_id: &str,
        after: Option<u64>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let mut log = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| StoreError::StreamNotFound {
                stream_id: stream_id.to_string(),
            })?;

        let after = after.unwrap_or(0);
        if after > log.last_seq {
            return Err(StoreError::CursorAhead {
                stream_id: stream_id.to_string(),
                after,
                last: log.last_seq,
            });
        }
        if after < log.pruned_through {
            tracing::warn!(
                stream_id = %stream_id,
                after,
                pruned_through = log.pruned_through,
                "replay range expired"
            );
            return Err(StoreError::ReplayExpired {
                stream_id: stream_id.to_string(),
                after,
                earliest: log.pruned_through + 1,
            });
        }

        log.touch();
        let skip = (after - log.pruned_through) as usize;
        let events: Vec<StoredEvent> = log.events.iter().skip(skip).cloned().collect();
        tracing::debug!(stream_id = %stream_id, after, count = events.len(), "replaying stream");
        Ok(events)
    }

    async fn touch(&self, stream_id: &str) -> Result<bool, StoreError> {
        let Some(mut log) = self.streams.get_mut(stream_id) else {
            return Ok(false);
        };
        if log.tombstoned {
            log.tombstoned = false;
            tracing::debug!(stream_id = %stream_id, last_seq = log.last_seq, "expired stream revived");
        }
        log.touch();
        Ok(true)
    }

    async fn expire(&self, stream_id: &str) -> Result<(), StoreError> {
        if self.streams.remove(stream_id).is_some() {
            tracing::debug!(stream_id = %stream_id, "stream expired");
        }
        Ok(())
    }

    async fn contains(&self, stream_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .streams
            .get(stream_id)
            .is_some_and(|log| !log.tombstoned))
    }

    async fn last_sequence(&self, stream_id: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.streams.get(stream_id).map(|log| log.last_seq))
    }

    async fn prune_expired(&self) -> Result<usize, StoreError> {
        Ok(self.prune_now())
    }
}
