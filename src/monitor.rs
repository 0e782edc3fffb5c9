//! Background workers that watch the engine
//!
//! [`RefreshMonitor`] polls the state fingerprint and hands a snapshot to a
//! [`Renderer`] when it changes. Rendering runs on the snapshot copy, so the
//! state lock is never held while a presentation surface redraws.

use crate::engine::QueueEngine;
use crate::state::QueueState;
use crate::QueueSummary;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Presentation surface fed by the refresh monitor
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, state: &QueueState, summary: &QueueSummary);
}

/// Refresh monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Poll interval
    pub interval: Duration,
    /// Warn once the common line reaches this share of capacity
    pub capacity_warning_ratio: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            capacity_warning_ratio: 1.0,
        }
    }
}

/// Redraws a presentation surface when queue state changes
pub struct RefreshMonitor {
    engine: Arc<QueueEngine>,
    renderer: Arc<dyn Renderer>,
    config: MonitorConfig,
}

impl RefreshMonitor {
    /// Create a monitor polling at the engine's refresh interval
    pub fn new(engine: Arc<QueueEngine>, renderer: Arc<dyn Renderer>) -> Self {
        let config = MonitorConfig {
            interval: engine.options().refresh_interval,
            ..MonitorConfig::default()
        };
        Self::with_config(engine, renderer, config)
    }

    pub fn with_config(
        engine: Arc<QueueEngine>,
        renderer: Arc<dyn Renderer>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            engine,
            renderer,
            config,
        }
    }

    /// Start polling; the task ends when the engine shuts down
    pub fn start(self) -> JoinHandle<()> {
        let shutdown = self.engine.shutdown_signal();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            let mut last_fingerprint = None;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.notified() => break,
                }
                if self.engine.is_shutting_down() {
                    break;
                }
                last_fingerprint = Some(self.refresh(last_fingerprint).await);
            }
            debug!("refresh monitor stopped");
        })
    }

    /// Render if the fingerprint moved since `last`; returns the current fingerprint
    pub async fn refresh(&self, last: Option<u64>) -> u64 {
        let (fingerprint, view) = self.engine.view_if_changed(last).await;
        let Some((state, summary)) = view else {
            return fingerprint;
        };
        self.check_capacity(&summary);
        self.renderer.render(&state, &summary).await;
        fingerprint
    }

    fn check_capacity(&self, summary: &QueueSummary) {
        if summary.common_capacity == 0 {
            return;
        }
        let ratio = summary.common as f64 / summary.common_capacity as f64;
        if ratio >= self.config.capacity_warning_ratio {
            warn!(
                common = summary.common,
                capacity = summary.common_capacity,
                "common line is at capacity"
            );
        }
    }
}

/// Periodically save dirty state; used by `PersistMode::Interval`
pub(crate) fn spawn_snapshot_flusher(engine: Arc<QueueEngine>, period: Duration) -> JoinHandle<()> {
    let shutdown = engine.shutdown_signal();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.notified() => break,
            }
            if engine.is_shutting_down() {
                break;
            }
            if let Err(e) = engine.flush().await {
                warn!(error = %e, "periodic snapshot save failed");
            }
        }
    })
}
