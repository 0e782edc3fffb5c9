//! Queue engine: the single mutation path for queue state
//!
//! Every mutation, whether it comes from the inbound event feed or from a
//! control surface, goes through [`QueueEngine`]. The engine takes the state
//! write lock, applies one [`QueueState`] operation, emits its sync event while
//! still holding the lock, persists according to [`PersistMode`], and only
//! then releases the lock.
//!
//! Lock order: `state` before `settings`. Code that holds `settings` alone
//! never goes on to take `state`.

use crate::config::{EngineOptions, PersistMode, QueueConfig};
use crate::entry::{AnyEntry, OpenId, QueueEntry, Tier};
use crate::error::{QueueError, Result};
use crate::event::{EventEmitter, EventStream, FullSync, SyncEnvelope, SyncEvent};
#[cfg(feature = "music")]
use crate::music::MusicClient;
use crate::router::{ChatEvent, GiftEvent, IgnoreReason, InboundEvent, Route, Router};
use crate::special::{SpecialLookup, SpecialUserEntry, SpecialUsers};
use crate::state::{GiftDefaults, Location, QueueState};
use crate::storage::Storage;
use crate::QueueSummary;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Why an inbound event left the queue unchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Ignored(IgnoreReason),
    /// Viewer already holds a position
    AlreadyQueued,
    /// Enrollment is paused
    Paused,
    /// Common line is at capacity
    QueueFull,
    /// Cancel from a viewer who is not queued
    NotQueued,
    /// Gift from a guard-line viewer
    GuardViewer,
}

/// Result of handling one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// State changed (or a directed reply was sent) with this sync sequence number
    Applied { seq: u64 },
    /// Nothing happened; the viewer is not told
    Rejected(Rejection),
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }
}

struct Settings {
    config: QueueConfig,
    router: Router,
}

/// Queue engine
pub struct QueueEngine {
    state: RwLock<QueueState>,
    settings: RwLock<Settings>,
    emitter: EventEmitter,
    chat_feed: broadcast::Sender<ChatEvent>,
    storage: Option<Arc<dyn Storage>>,
    options: EngineOptions,
    paused: AtomicBool,
    dirty: AtomicBool,
    is_shutting_down: AtomicBool,
    shutdown_notify: Arc<Notify>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    #[cfg(feature = "music")]
    music: Option<Arc<dyn MusicClient>>,
}

impl QueueEngine {
    fn ensure_running(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(QueueError::ShutdownInProgress);
        }
        Ok(())
    }

    /// Apply one state operation under the write lock, emit, persist
    async fn mutate<F>(&self, op: F) -> Result<u64>
    where
        F: FnOnce(&mut QueueState) -> Result<SyncEvent> + Send,
    {
        self.ensure_running()?;
        let mut state = self.state.write().await;
        let event = op(&mut state)?;
        let seq = self.emitter.emit(event);
        self.after_mutation(&state).await;
        Ok(seq)
    }

    async fn after_mutation(&self, state: &QueueState) {
        match self.options.persist_mode {
            PersistMode::WriteThrough => {
                if let Some(storage) = &self.storage {
                    if let Err(e) = storage.save_state(state).await {
                        error!(error = %e, "failed to persist queue state");
                        self.dirty.store(true, Ordering::SeqCst);
                    }
                }
            }
            PersistMode::Interval(_) | PersistMode::Manual => {
                self.dirty.store(true, Ordering::SeqCst);
            }
        }
    }

    async fn persist_config(&self, config: &QueueConfig) {
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.save_config(config).await {
                error!(error = %e, "failed to persist queue configuration");
            }
        }
    }

    // ========================================================================
    // Queue store operations
    // ========================================================================

    /// Append an entry to a tier
    pub async fn add(&self, tier: Tier, entry: AnyEntry) -> Result<u64> {
        let capacity = self.settings.read().await.config.max_line_count;
        self.mutate(|state| state.add(tier, entry, capacity)).await
    }

    /// Remove a viewer from whichever tier holds them
    pub async fn delete(&self, open_id: &str) -> Result<u64> {
        self.mutate(|state| state.delete(open_id)).await
    }

    /// Credit a gift value (minor units) to a viewer, promoting them from the common line
    pub async fn increment_gift(
        &self,
        open_id: &str,
        amount_minor: u64,
        gift_name: &str,
        defaults: &GiftDefaults,
    ) -> Result<u64> {
        self.mutate(|state| state.increment_gift(open_id, amount_minor, gift_name, defaults))
            .await
    }

    /// Flip a queued viewer's online flag
    pub async fn toggle_online(&self, open_id: &str) -> Result<u64> {
        self.mutate(|state| state.toggle_online(open_id)).await
    }

    /// Empty every tier
    pub async fn clear_all(&self) -> Result<u64> {
        self.mutate(|state| Ok(state.clear_all())).await
    }

    /// Head-most entry across tiers
    pub async fn first(&self) -> Result<AnyEntry> {
        let state = self.state.read().await;
        state.first().map(|entry| entry.to_owned_entry())
    }

    /// Remove the head-most entry; `Empty` when there is none
    pub async fn delete_first(&self) -> Result<u64> {
        self.mutate(|state| {
            let open_id = state.first()?.base().open_id.clone();
            state.delete(&open_id)
        })
        .await
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        info!(paused, "enrollment pause toggled");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Inbound events
    // ========================================================================

    /// Dispatch a normalized inbound event
    pub async fn handle_event(&self, event: InboundEvent) -> Result<Outcome> {
        match event {
            InboundEvent::Chat(chat) => self.handle_chat_event(chat).await,
            InboundEvent::Gift(gift) => self.handle_gift_event(gift).await,
        }
    }

    pub async fn handle_chat_event(&self, chat: ChatEvent) -> Result<Outcome> {
        let _ = self.chat_feed.send(chat.clone());

        let (route, music_keyword) = {
            let settings = self.settings.read().await;
            let route = settings.router.classify_chat(&chat);
            let music_keyword = settings.router.music_request(&chat).map(str::to_string);
            (route, music_keyword)
        };

        if let Some(keyword) = music_keyword {
            self.request_music(keyword);
        }

        match route {
            Route::Cancel => match self.delete(&chat.open_id).await {
                Ok(seq) => Ok(Outcome::Applied { seq }),
                Err(QueueError::NotFound(_)) => Ok(reject(&chat.open_id, Rejection::NotQueued)),
                Err(e) => Err(e),
            },
            Route::Locate => Ok(Outcome::Applied {
                seq: self.request_locate(&chat.open_id).await,
            }),
            Route::Enroll => self.enroll(&chat).await,
            Route::Ignore(reason) => Ok(reject(&chat.open_id, Rejection::Ignored(reason))),
            Route::Gift { .. } => Ok(reject(&chat.open_id, Rejection::Ignored(IgnoreReason::NoKeyword))),
        }
    }

    pub async fn handle_gift_event(&self, gift: GiftEvent) -> Result<Outcome> {
        let (route, color) = {
            let settings = self.settings.read().await;
            (
                settings.router.classify_gift(&gift),
                settings.config.gift_color,
            )
        };

        let value_minor = match route {
            Route::Gift { value_minor } => value_minor,
            Route::Ignore(reason) => return Ok(reject(&gift.open_id, Rejection::Ignored(reason))),
            _ => return Ok(reject(&gift.open_id, Rejection::Ignored(IgnoreReason::Unpaid))),
        };

        let defaults = GiftDefaults {
            user_name: gift.user_name.clone(),
            avatar: gift.avatar.clone(),
            color,
        };
        match self
            .increment_gift(&gift.open_id, value_minor, &gift.gift_name, &defaults)
            .await
        {
            Ok(seq) => {
                debug!(
                    open_id = %gift.open_id,
                    gift = %gift.gift_name,
                    value_minor,
                    "gift credited"
                );
                Ok(Outcome::Applied { seq })
            }
            Err(QueueError::DuplicateEntry(_)) => Ok(reject(&gift.open_id, Rejection::GuardViewer)),
            Err(e) => Err(e),
        }
    }

    /// Enrollment path: guard line for current special users, else common line
    async fn enroll(&self, chat: &ChatEvent) -> Result<Outcome> {
        self.ensure_running()?;
        let mut state = self.state.write().await;

        if state.contains(&chat.open_id) {
            return Ok(reject(&chat.open_id, Rejection::AlreadyQueued));
        }
        if self.is_paused() {
            return Ok(reject(&chat.open_id, Rejection::Paused));
        }

        let (lookup, guard_color, common_color, capacity, evicted_config) = {
            let mut settings = self.settings.write().await;
            let lookup = settings
                .config
                .special_users
                .lookup(&chat.open_id, Utc::now());
            let evicted_config = match &lookup {
                SpecialLookup::Evicted(entry) => {
                    info!(
                        open_id = %chat.open_id,
                        user = %entry.user_name,
                        "special user grant expired"
                    );
                    Some(settings.config.clone())
                }
                _ => None,
            };
            (
                lookup,
                settings.config.guard_color,
                settings.config.common_color,
                settings.config.max_line_count,
                evicted_config,
            )
        };
        if let Some(config) = evicted_config {
            self.persist_config(&config).await;
        }

        let (tier, color) = match lookup {
            SpecialLookup::Valid(_) => (Tier::Guard, guard_color),
            SpecialLookup::Evicted(_) | SpecialLookup::Absent => {
                if state.tier_len(Tier::Common) >= capacity {
                    return Ok(reject(&chat.open_id, Rejection::QueueFull));
                }
                (Tier::Common, common_color)
            }
        };

        let entry = QueueEntry::new(
            chat.open_id.clone(),
            chat.user_name.clone(),
            chat.avatar.clone(),
            color,
        );
        let event = state.add(tier, AnyEntry::Plain(entry), capacity)?;
        let seq = self.emitter.emit(event);
        self.after_mutation(&state).await;
        debug!(open_id = %chat.open_id, tier = %tier, "viewer enrolled");
        Ok(Outcome::Applied { seq })
    }

    /// Send a directed location reply for one viewer
    pub async fn request_locate(&self, open_id: &str) -> u64 {
        let state = self.state.read().await;
        let location = state.locate(open_id);
        self.emitter.emit(SyncEvent::Locate {
            open_id: open_id.to_string(),
            location,
        })
    }

    #[cfg(feature = "music")]
    fn request_music(&self, keyword: String) {
        match &self.music {
            Some(client) => crate::music::spawn_search(Arc::clone(client), keyword),
            None => debug!(keyword = %keyword, "music request ignored: no client"),
        }
    }

    #[cfg(not(feature = "music"))]
    fn request_music(&self, keyword: String) {
        debug!(keyword = %keyword, "music request ignored: feature disabled");
    }

    // ========================================================================
    // Read-side projections
    // ========================================================================

    /// Copy of the current state, taken under a brief read lock
    pub async fn snapshot(&self) -> QueueState {
        self.state.read().await.clone()
    }

    /// Entire state plus the sequence number it corresponds to
    pub async fn full_sync(&self) -> FullSync {
        let state = self.state.read().await;
        FullSync {
            seq: self.emitter.last_seq(),
            state: state.clone(),
        }
    }

    /// State fingerprint for change detection
    pub async fn fingerprint(&self) -> u64 {
        self.state.read().await.fingerprint()
    }

    pub async fn locate(&self, open_id: &str) -> Option<Location> {
        self.state.read().await.locate(open_id)
    }

    pub async fn summary(&self) -> QueueSummary {
        let state = self.state.read().await;
        let capacity = self.settings.read().await.config.max_line_count;
        self.summarize(&state, capacity)
    }

    /// Current fingerprint, plus a snapshot and matching summary when it differs from `last`.
    ///
    /// All three come from one read lock, so the summary always describes the snapshot.
    pub async fn view_if_changed(
        &self,
        last: Option<u64>,
    ) -> (u64, Option<(QueueState, QueueSummary)>) {
        let state = self.state.read().await;
        let fingerprint = state.fingerprint();
        if last == Some(fingerprint) {
            return (fingerprint, None);
        }
        let capacity = self.settings.read().await.config.max_line_count;
        let summary = self.summarize(&state, capacity);
        (fingerprint, Some((state.clone(), summary)))
    }

    fn summarize(&self, state: &QueueState, common_capacity: usize) -> QueueSummary {
        QueueSummary {
            guard: state.tier_len(Tier::Guard),
            gift: state.tier_len(Tier::Gift),
            common: state.tier_len(Tier::Common),
            total: state.len(),
            common_capacity,
            paused: self.is_paused(),
        }
    }

    /// Subscribe to all sync events
    pub fn subscribe(&self) -> EventStream {
        self.emitter.subscribe()
    }

    /// Subscribe to a filtered view of sync events
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&SyncEnvelope) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        self.emitter.subscribe_filtered(filter)
    }

    /// Raw chat feed for a chat display overlay; lossy for slow receivers
    pub fn subscribe_chat(&self) -> broadcast::Receiver<ChatEvent> {
        self.chat_feed.subscribe()
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub async fn config(&self) -> QueueConfig {
        self.settings.read().await.config.clone()
    }

    /// Replace the configuration, keeping the current allow-list
    pub async fn update_config(&self, mut config: QueueConfig) -> Result<()> {
        config.validate()?;
        let saved = {
            let mut settings = self.settings.write().await;
            config.special_users = settings.config.special_users.clone();
            settings.router = Router::new(&config);
            settings.config = config;
            settings.config.clone()
        };
        self.persist_config(&saved).await;
        Ok(())
    }

    pub async fn grant_special_user(
        &self,
        open_id: impl Into<OpenId>,
        user_name: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) {
        let saved = {
            let mut settings = self.settings.write().await;
            settings
                .config
                .special_users
                .grant(open_id, user_name, expires_at);
            settings.config.clone()
        };
        self.persist_config(&saved).await;
    }

    pub async fn revoke_special_user(&self, open_id: &str) -> Option<SpecialUserEntry> {
        let (removed, saved) = {
            let mut settings = self.settings.write().await;
            let removed = settings.config.special_users.revoke(open_id);
            (removed, settings.config.clone())
        };
        if removed.is_some() {
            self.persist_config(&saved).await;
        }
        removed
    }

    pub async fn special_users(&self) -> SpecialUsers {
        self.settings.read().await.config.special_users.clone()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Whether state changed since the last successful save
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Save state and configuration if anything changed since the last save
    pub async fn flush(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let state = self.snapshot().await;
        if let Err(e) = storage.save_state(&state).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        let config = self.config().await;
        if let Err(e) = storage.save_config(&config).await {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }

    /// Start background workers (interval persistence)
    pub async fn start(self: &Arc<Self>) {
        if let PersistMode::Interval(period) = self.options.persist_mode {
            let handle = crate::monitor::spawn_snapshot_flusher(Arc::clone(self), period);
            self.workers.lock().await.push(handle);
        }
        info!("queue engine started");
    }

    pub(crate) fn shutdown_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown_notify)
    }

    /// Register a worker to be stopped at shutdown
    pub async fn attach_worker(&self, handle: JoinHandle<()>) {
        self.workers.lock().await.push(handle);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Stop workers, reject further mutations, and save a final snapshot
    pub async fn shutdown(&self) -> Result<()> {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown_notify.notify_waiters();
        for handle in self.workers.lock().await.drain(..) {
            handle.abort();
        }
        let result = self.flush().await;
        info!("queue engine stopped");
        result
    }
}

fn reject(open_id: &str, rejection: Rejection) -> Outcome {
    debug!(open_id = %open_id, reason = ?rejection, "event left queue unchanged");
    Outcome::Rejected(rejection)
}

/// Builder for [`QueueEngine`]
pub struct QueueEngineBuilder {
    config: QueueConfig,
    options: EngineOptions,
    storage: Option<Arc<dyn Storage>>,
    restore: bool,
    emitter: Option<EventEmitter>,
    #[cfg(feature = "music")]
    music: Option<Arc<dyn MusicClient>>,
}

impl QueueEngineBuilder {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            options: EngineOptions::default(),
            storage: None,
            restore: true,
            emitter: None,
            #[cfg(feature = "music")]
            music: None,
        }
    }

    /// Add storage backend for persistence
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Load saved state and configuration at build time (default: on)
    pub fn restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_persist_mode(mut self, mode: PersistMode) -> Self {
        self.options.persist_mode = mode;
        self
    }

    /// Share an existing emitter (e.g. one a transport already subscribed to)
    pub fn with_emitter(mut self, emitter: EventEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    #[cfg(feature = "music")]
    pub fn with_music_client(mut self, client: Arc<dyn MusicClient>) -> Self {
        self.music = Some(client);
        self
    }

    /// Build the engine
    pub async fn build(self) -> anyhow::Result<Arc<QueueEngine>> {
        let mut config = self.config;
        let mut state = QueueState::new();

        if let (Some(storage), true) = (&self.storage, self.restore) {
            if let Some(saved) = storage.load_config().await? {
                config = saved;
            }
            if let Some(saved) = storage.load_state().await? {
                state = saved;
                if state.repair() {
                    warn!("restored queue state had stale indexes; rebuilt");
                }
                if !state.is_consistent() {
                    anyhow::bail!("restored queue state is inconsistent after repair");
                }
            }
        }
        config.validate()?;

        let (chat_feed, _) = broadcast::channel(self.options.chat_feed_capacity.max(1));
        let router = Router::new(&config);
        info!(
            restored = state.len(),
            capacity = config.max_line_count,
            "queue engine built"
        );

        Ok(Arc::new(QueueEngine {
            state: RwLock::new(state),
            settings: RwLock::new(Settings { config, router }),
            emitter: self.emitter.unwrap_or_default(),
            chat_feed,
            storage: self.storage,
            options: self.options,
            paused: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            is_shutting_down: AtomicBool::new(false),
            shutdown_notify: Arc::new(Notify::new()),
            workers: Mutex::new(Vec::new()),
            #[cfg(feature = "music")]
            music: self.music,
        }))
    }
}
