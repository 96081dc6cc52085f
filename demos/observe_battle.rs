//! # Battle Observer Example
//!
//! Demonstrates a complete observer lifecycle:
//!
//! 1. Connect to a battle server via WebSocket (handshake is automatic)
//! 2. Track connection health with a state listener
//! 3. Subscribe to battle events (ticks, hits, deaths, game start/end)
//! 4. Keep a rolling log of the most recent combat events
//! 5. Shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start a battle server on localhost:7655, then:
//! cargo run --example observe_battle
//!
//! # Override the server URL:
//! ARENA_SERVER_URL=ws://my-server:7655 cargo run --example observe_battle
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use arena_observer::{ConnectionState, EventCategory, ObserverClient};

/// Default server URL when `ARENA_SERVER_URL` is not set.
const DEFAULT_URL: &str = "ws://localhost:7655";

/// Give up if the first connection is not up within this window.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How many combat events the rolling log retains.
const EVENT_LOG_CAPACITY: usize = 25;

/// Append a line to the rolling combat log, evicting the oldest entry.
fn log_combat_event(log: &Mutex<VecDeque<String>>, line: String) {
    let mut log = log.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if log.len() == EVENT_LOG_CAPACITY {
        log.pop_front();
    }
    tracing::info!("{line}");
    log.push_back(line);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url = std::env::var("ARENA_SERVER_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
    tracing::info!("Connecting to {url}");

    let client = ObserverClient::new(&url);

    // ── Connection health ───────────────────────────────────────────
    // Mirror state transitions into a watch channel so this task can wait
    // for the connection (or a failure) with a timeout.
    let (state_tx, mut state_rx) = tokio::sync::watch::channel(ConnectionState::default());
    client.on_connection_state_change(Arc::new(move |state: &ConnectionState| {
        if let Some(error) = &state.error {
            tracing::warn!("Connection: {error}");
        }
        let _ = state_tx.send(state.clone());
    }));

    // ── Subscriptions ───────────────────────────────────────────────
    let combat_log: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));

    client.on(
        EventCategory::Tick,
        Arc::new(|tick: &Value| {
            tracing::debug!(
                "Tick: round {} with {} bot(s), {} bullet(s) in flight",
                tick["roundNumber"],
                tick["botStates"].as_array().map_or(0, Vec::len),
                tick["bulletStates"].as_array().map_or(0, Vec::len),
            );
        }),
    );

    client.on(
        EventCategory::GameStarted,
        Arc::new(|event: &Value| {
            let participants: Vec<String> = event["participants"]
                .as_array()
                .into_iter()
                .flatten()
                .map(|p| {
                    format!(
                        "{} v{}",
                        p["name"].as_str().unwrap_or("?"),
                        p["version"].as_str().unwrap_or("?")
                    )
                })
                .collect();
            tracing::info!(
                "Game started on a {}x{} arena: {}",
                event["gameSetup"]["arenaWidth"],
                event["gameSetup"]["arenaHeight"],
                participants.join(", ")
            );
        }),
    );

    {
        let combat_log = Arc::clone(&combat_log);
        client.on(
            EventCategory::GameEnded,
            Arc::new(move |event: &Value| {
                tracing::info!("Game ended after {} round(s)", event["numberOfRounds"]);
                let log = combat_log
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                tracing::info!("Last {} combat event(s):", log.len());
                for line in log.iter() {
                    tracing::info!("  {line}");
                }
            }),
        );
    }

    {
        let combat_log = Arc::clone(&combat_log);
        client.on(
            EventCategory::BulletHitBot,
            Arc::new(move |event: &Value| {
                log_combat_event(
                    &combat_log,
                    format!(
                        "Bot {} hit bot {} for {} damage",
                        event["bullet"]["ownerId"], event["victimId"], event["damage"]
                    ),
                );
            }),
        );
    }

    {
        let combat_log = Arc::clone(&combat_log);
        client.on(
            EventCategory::BotDeath,
            Arc::new(move |event: &Value| {
                log_combat_event(&combat_log, format!("Bot {} died", event["victimId"]));
            }),
        );
    }

    {
        let combat_log = Arc::clone(&combat_log);
        client.on(
            EventCategory::BotHitBot,
            Arc::new(move |event: &Value| {
                log_combat_event(
                    &combat_log,
                    format!(
                        "Bot {} rammed into bot {}",
                        event["botId"], event["victimId"]
                    ),
                );
            }),
        );
    }

    // ── Connect ─────────────────────────────────────────────────────
    client.connect().await;

    let connected = tokio::time::timeout(CONNECT_TIMEOUT, async {
        loop {
            if state_rx.borrow().is_connected {
                return true;
            }
            if state_rx.changed().await.is_err() {
                return false;
            }
        }
    })
    .await;

    match connected {
        Ok(true) => tracing::info!("Observer connected; watching the battle"),
        Ok(false) => {
            tracing::error!("Client dropped before connecting");
            return Ok(());
        }
        Err(_) => {
            // Reconnection may still be in progress in the background; this
            // example chooses to give up rather than wait indefinitely.
            tracing::error!(
                "No connection within {}s, giving up",
                CONNECT_TIMEOUT.as_secs()
            );
            client.disconnect();
            return Ok(());
        }
    }

    // ── Wait for Ctrl+C ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl+C received, shutting down…");

    client.disconnect();
    tracing::info!("Observer disconnected. Goodbye!");
    Ok(())
}
