//! Simulated livestream example
//!
//! This example drives the queue engine with a scripted room:
//! - Viewers enroll by chat keyword until the common line is full
//! - A paid gift promotes a viewer to the gift line
//! - A viewer asks for their position and another cancels
//! - Every sync event is printed as the JSON a presentation surface receives

use async_trait::async_trait;
use line_queue::{
    ChatEvent, ConnectionSupervisor, GiftEvent, InboundEvent, LiveConnection, LiveSession,
    LiveSource, QueueConfig, QueueEngineBuilder, QueueState, QueueSummary, RefreshMonitor,
    Renderer, Result,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

struct ScriptedSession;

#[async_trait]
impl LiveSession for ScriptedSession {
    fn session_id(&self) -> &str {
        "demo-session"
    }

    async fn heartbeat(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Replays a fixed script of room events
struct ScriptedRoom;

#[async_trait]
impl LiveSource for ScriptedRoom {
    async fn connect(&self, _id_code: &str) -> Result<LiveConnection> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for event in script() {
                if tx.send(event).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            // keep the stream open so the supervisor does not reconnect
            tx.closed().await;
        });
        Ok(LiveConnection {
            session: Arc::new(ScriptedSession),
            events: rx,
        })
    }
}

fn chat(open_id: &str, name: &str, message: &str) -> InboundEvent {
    InboundEvent::Chat(ChatEvent {
        open_id: open_id.into(),
        user_name: name.into(),
        avatar: String::new(),
        message: message.into(),
    })
}

fn script() -> Vec<InboundEvent> {
    vec![
        chat("u1", "Alice", "排队"),
        chat("u2", "Bob", "排队"),
        chat("u3", "Carol", "排队"),
        chat("u4", "Dave", "排队"),
        InboundEvent::Gift(GiftEvent {
            open_id: "u2".into(),
            user_name: "Bob".into(),
            avatar: String::new(),
            gift_name: "rocket".into(),
            unit_price: 500,
            quantity: 2,
            paid: true,
        }),
        chat("u3", "Carol", "我在哪"),
        chat("u1", "Alice", "取消排队"),
    ]
}

struct ConsoleRenderer;

#[async_trait]
impl Renderer for ConsoleRenderer {
    async fn render(&self, state: &QueueState, summary: &QueueSummary) {
        let names = |ids: Vec<&str>| ids.join(", ");
        println!(
            "  [display] guard: [{}] gift: [{}] common: [{}] ({}/{})",
            names(state.guard_line().entries().iter().map(|e| e.user_name.as_str()).collect()),
            names(
                state
                    .gift_line()
                    .entries()
                    .iter()
                    .map(|e| e.entry.user_name.as_str())
                    .collect()
            ),
            names(state.common_line().entries().iter().map(|e| e.user_name.as_str()).collect()),
            summary.common,
            summary.common_capacity
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("=== Line Queue: Simulated Stream Example ===\n");

    let engine = QueueEngineBuilder::new(QueueConfig::new().with_max_line_count(3))
        .build()
        .await?;
    engine.start().await;

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Some(envelope) = events.recv().await {
            match envelope.to_json() {
                Ok(json) => println!("  [sync] {}", json),
                Err(e) => eprintln!("  [sync] encode failed: {}", e),
            }
        }
    });

    let monitor = RefreshMonitor::new(Arc::clone(&engine), Arc::new(ConsoleRenderer)).start();
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::clone(&engine),
        Arc::new(ScriptedRoom),
    ));
    let upstream = Arc::clone(&supervisor).start();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let summary = engine.summary().await;
    println!("\nFinal summary: {}", serde_json::to_string_pretty(&summary)?);

    engine.shutdown().await?;
    upstream.await??;
    monitor.await?;

    println!("\n=== Example completed ===");
    Ok(())
}
