//! Live platform connection
//!
//! The platform client itself lives outside this crate behind [`LiveSource`].
//! [`ConnectionSupervisor`] owns one session at a time: it keeps the session
//! alive with heartbeats, pumps its events into the engine, and reconnects
//! with bounded backoff when the event stream ends.

use crate::engine::QueueEngine;
use crate::error::{QueueError, Result};
use crate::router::InboundEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// An open session with the live platform
#[async_trait]
pub trait LiveSession: Send + Sync {
    fn session_id(&self) -> &str;

    async fn heartbeat(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A session plus its inbound event stream; the stream ends when the session drops
pub struct LiveConnection {
    pub session: Arc<dyn LiveSession>,
    pub events: mpsc::Receiver<InboundEvent>,
}

/// Opens sessions for a room credential
#[async_trait]
pub trait LiveSource: Send + Sync {
    async fn connect(&self, id_code: &str) -> Result<LiveConnection>;
}

/// Keeps one live session connected and feeding the engine
pub struct ConnectionSupervisor {
    engine: Arc<QueueEngine>,
    source: Arc<dyn LiveSource>,
    current: RwLock<Option<Arc<dyn LiveSession>>>,
}

impl ConnectionSupervisor {
    pub fn new(engine: Arc<QueueEngine>, source: Arc<dyn LiveSource>) -> Self {
        Self {
            engine,
            source,
            current: RwLock::new(None),
        }
    }

    /// Id of the session currently feeding the engine
    pub async fn current_session_id(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|session| session.session_id().to_string())
    }

    /// Run the supervisor in the background
    pub fn start(self: Arc<Self>) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }

    /// Connect and supervise until shutdown or until reconnection gives up
    pub async fn run(&self) -> Result<()> {
        let id_code = self.engine.config().await.id_code;
        let mut connection = match self.connect(&id_code).await {
            Ok(connection) => connection,
            Err(e) => return Err(self.give_up(e)),
        };

        loop {
            let session = Arc::clone(&connection.session);
            let heartbeat = self.spawn_heartbeat(Arc::clone(&session));
            *self.current.write().await = Some(Arc::clone(&session));
            info!(session = %session.session_id(), "upstream session connected");

            let stopped = self.pump(&mut connection.events).await;
            if stopped {
                heartbeat.abort();
                self.retire(&session).await;
                return Ok(());
            }

            warn!(session = %session.session_id(), "upstream event stream closed, reconnecting");
            let reconnect = self.reconnect(&id_code).await;
            heartbeat.abort();
            match reconnect {
                Ok(next) => {
                    *self.current.write().await = Some(Arc::clone(&next.session));
                    self.retire(&session).await;
                    connection = next;
                }
                Err(e) => {
                    self.retire(&session).await;
                    return Err(self.give_up(e));
                }
            }
        }
    }

    /// First connection: one immediate try, then the reconnect chain
    async fn connect(&self, id_code: &str) -> Result<LiveConnection> {
        match self.source.connect(id_code).await {
            Ok(connection) => Ok(connection),
            Err(e) => {
                warn!(error = %e, "upstream connect failed, retrying");
                self.reconnect(id_code).await
            }
        }
    }

    fn give_up(&self, e: QueueError) -> QueueError {
        error!(
            error = %e,
            attempts = self.engine.options().reconnect_policy.max_attempts,
            "upstream reconnect gave up"
        );
        e
    }

    async fn reconnect(&self, id_code: &str) -> Result<LiveConnection> {
        let policy = self.engine.options().reconnect_policy.clone();
        policy
            .run(|attempt| async move {
                if self.engine.is_shutting_down() {
                    return Err(QueueError::ShutdownInProgress);
                }
                info!(attempt, "upstream reconnect attempt");
                self.source.connect(id_code).await
            })
            .await
    }

    /// Feed events to the engine; true when stopped by shutdown, false when the stream ended
    async fn pump(&self, events: &mut mpsc::Receiver<InboundEvent>) -> bool {
        let shutdown = self.engine.shutdown_signal();
        loop {
            if self.engine.is_shutting_down() {
                return true;
            }
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.notified() => return true,
            };
            let Some(event) = event else {
                return false;
            };
            match self.engine.handle_event(event).await {
                Ok(_) => {}
                Err(QueueError::ShutdownInProgress) => return true,
                Err(e) => warn!(error = %e, "failed to apply upstream event"),
            }
        }
    }

    fn spawn_heartbeat(&self, session: Arc<dyn LiveSession>) -> JoinHandle<()> {
        let period = self.engine.options().heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = session.heartbeat().await {
                    warn!(session = %session.session_id(), error = %e, "heartbeat failed");
                }
            }
        })
    }

    /// Close a session and clear it if it is still the current one
    async fn retire(&self, session: &Arc<dyn LiveSession>) {
        {
            let mut current = self.current.write().await;
            if current
                .as_ref()
                .is_some_and(|c| c.session_id() == session.session_id())
            {
                *current = None;
            }
        }
        if let Err(e) = session.close().await {
            warn!(session = %session.session_id(), error = %e, "failed to close session");
        }
    }
}
