//! Sync events pushed to presentation consumers
//!
//! Every visible state change produces exactly one [`SyncEvent`]. The
//! [`EventEmitter`] stamps it with a sequence number and fans it out to every
//! subscriber over an unbounded channel, so slow consumers never lose events.
//! Consumers that notice a gap in `seq` should fetch a [`FullSync`] instead of
//! patching their copy.

use crate::entry::{AnyEntry, OpenId, Tier};
use crate::error::Result;
use crate::state::{Location, QueueState};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A single queue change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncEvent {
    /// Entry added to a tier, or re-ranked within the gift line
    Add {
        tier: Tier,
        /// Zero-based position after the change
        position: usize,
        entry: AnyEntry,
    },
    /// Entry removed
    Delete {
        tier: Tier,
        /// Zero-based position the entry held before removal
        prior_position: usize,
        open_id: OpenId,
    },
    /// Online flag changed
    StateUpdate {
        tier: Tier,
        open_id: OpenId,
        is_online: bool,
    },
    /// Answer to a viewer asking where they are; not a tier change
    Locate {
        open_id: OpenId,
        location: Option<Location>,
    },
    /// All tiers emptied
    ClearAll,
}

impl SyncEvent {
    /// Directed events address one viewer rather than the whole queue
    pub fn is_directed(&self) -> bool {
        matches!(self, SyncEvent::Locate { .. })
    }

    /// Viewer this event is about, if any
    pub fn open_id(&self) -> Option<&str> {
        match self {
            SyncEvent::Add { entry, .. } => Some(&entry.base().open_id),
            SyncEvent::Delete { open_id, .. }
            | SyncEvent::StateUpdate { open_id, .. }
            | SyncEvent::Locate { open_id, .. } => Some(open_id),
            SyncEvent::ClearAll => None,
        }
    }
}

/// A sequenced sync event as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEnvelope {
    pub seq: u64,
    pub directed: bool,
    pub event: SyncEvent,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl SyncEnvelope {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Entire queue state paired with the last sequence number it reflects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullSync {
    pub seq: u64,
    pub state: QueueState,
}

impl FullSync {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

struct Subscriber {
    tx: mpsc::UnboundedSender<SyncEnvelope>,
    filter: Option<Box<dyn Fn(&SyncEnvelope) -> bool + Send + Sync>>,
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    seq: Arc<AtomicU64>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sequence number of the most recent emitted event (0 before any)
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Stamp and deliver an event; returns its sequence number
    pub fn emit(&self, event: SyncEvent) -> u64 {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // seq is assigned under the subscriber lock so delivery order matches seq order
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = SyncEnvelope {
            seq,
            directed: event.is_directed(),
            event,
            timestamp: chrono::Utc::now(),
        };

        subscribers.retain(|sub| {
            if let Some(filter) = &sub.filter {
                if !filter(&envelope) {
                    return !sub.tx.is_closed();
                }
            }
            sub.tx.send(envelope.clone()).is_ok()
        });
        seq
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(guard) => guard.iter().filter(|s| !s.tx.is_closed()).count(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Subscribe to filtered events as an `EventStream` (implements `Stream`)
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&SyncEnvelope) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        self.register(Some(Box::new(filter)))
    }

    /// Subscribe to all events as an `EventStream` (implements `Stream`)
    pub fn subscribe(&self) -> EventStream {
        self.register(None)
    }

    fn register(
        &self,
        filter: Option<Box<dyn Fn(&SyncEnvelope) -> bool + Send + Sync>>,
    ) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push(Subscriber { tx, filter });
        EventStream {
            inner: Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx)),
        }
    }
}

/// Event stream - implements `futures_core::Stream<Item = SyncEnvelope>`.
///
/// Returned by [`EventEmitter::subscribe`] and [`EventEmitter::subscribe_filtered`].
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = SyncEnvelope> + Send>>,
}

impl Stream for EventStream {
    type Item = SyncEnvelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl EventStream {
    /// Receive the next event
    pub async fn recv(&mut self) -> Option<SyncEnvelope> {
        use tokio_stream::StreamExt;
        self.next().await
    }
}
