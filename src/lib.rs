//! # Line Queue
//!
//! A three-tier viewer queue for livestream rooms.
//!
//! ## Core (always compiled)
//!
//! - Guard, gift and common lines with an O(1) position index per line
//! - Gift line ordered by accumulated gift value (stable on ties)
//! - Chat keyword enrollment, cancel and locate; paid-gift promotion
//! - Time-limited special-user allow-list for the guard line
//! - Sequenced sync events and full-state resync for presentation surfaces
//! - Persistent storage (pluggable `Storage` trait, `LocalStorage` included)
//! - Upstream session supervision with heartbeat and bounded reconnect
//!
//! ## Feature Flags
//!
//! | Feature | Default | Dependencies | Description |
//! |---------|---------|-------------|-------------|
//! | `music` | ✅ | `reqwest` | `HttpMusicClient` side channel for chat music requests |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use line_queue::{ChatEvent, LocalStorage, QueueConfig, QueueEngineBuilder};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(LocalStorage::new("./data").await?);
//!     let engine = QueueEngineBuilder::new(QueueConfig::default())
//!         .with_storage(storage)
//!         .build()
//!         .await?;
//!     engine.start().await;
//!
//!     let mut events = engine.subscribe();
//!     engine
//!         .handle_chat_event(ChatEvent {
//!             open_id: "viewer-1".into(),
//!             user_name: "Alice".into(),
//!             avatar: String::new(),
//!             message: "排队".into(),
//!         })
//!         .await?;
//!     println!("{}", events.recv().await.unwrap().to_json()?);
//!
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```

// Core modules (always compiled)
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod event;
pub mod monitor;
pub mod retry;
pub mod router;
pub mod special;
pub mod state;
pub mod storage;
pub mod upstream;

// Feature-gated modules
#[cfg(feature = "music")]
pub mod music;

// Core re-exports
pub use config::{parse_keywords, EngineOptions, PersistMode, QueueConfig};
pub use engine::{Outcome, QueueEngine, QueueEngineBuilder, Rejection};
pub use entry::{
    AnyEntry, EntryRef, GiftQueueEntry, Keyed, LineColor, OpenId, QueueEntry, Tier,
    MINOR_UNIT_SCALE,
};
pub use error::{QueueError, Result};
pub use event::{EventEmitter, EventStream, FullSync, SyncEnvelope, SyncEvent};
pub use monitor::{MonitorConfig, RefreshMonitor, Renderer};
pub use retry::RetryPolicy;
pub use router::{ChatEvent, GiftEvent, IgnoreReason, InboundEvent, Route, Router};
pub use special::{SpecialLookup, SpecialUserEntry, SpecialUsers};
pub use state::{GiftDefaults, Location, QueueState, TierLine};
pub use storage::{LocalStorage, MemoryStorage, Storage};
pub use upstream::{ConnectionSupervisor, LiveConnection, LiveSession, LiveSource};

// Feature-gated re-exports
#[cfg(feature = "music")]
pub use music::{HttpMusicClient, MusicClient};

use serde::{Deserialize, Serialize};

/// Queue summary snapshot
///
/// Per-tier counts plus the common line capacity and pause flag, as shown by
/// a "current queue size" display.
///
/// # Example
///
/// ```rust,ignore
/// let summary = engine.summary().await;
/// println!("{} queued ({} / {} common)",
///     summary.total, summary.common, summary.common_capacity);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub guard: usize,
    pub gift: usize,
    pub common: usize,
    pub total: usize,
    pub common_capacity: usize,
    pub paused: bool,
}
