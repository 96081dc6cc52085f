#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for the observer client.
//!
//! Uses the shared `ScriptedConnector` from `tests/common` to script
//! connection outcomes and server frames, and the paused tokio clock to
//! verify reconnection timing deterministically.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{json, Value};

use arena_observer::{ConnectionState, EventCategory, EventHandler, ObserverClient, StateHandler};

use common::{
    bot_death_json, game_ended_json, game_started_json, settle, tick_json, unknown_type_json,
    Outcome, Script, ScriptedConnector,
};

const URL: &str = "ws://localhost:7655";

/// Build a client wired to a scripted connector, plus the attempt log.
fn scripted_client(
    url: &str,
    outcomes: Vec<Outcome>,
) -> (ObserverClient, Arc<StdMutex<Vec<common::Attempt>>>) {
    let (connector, attempts) = ScriptedConnector::new(outcomes);
    (ObserverClient::with_connector(url, connector), attempts)
}

/// Register a recording handler for `category` and return the recorded frames.
fn record(client: &ObserverClient, category: EventCategory) -> Arc<StdMutex<Vec<Value>>> {
    let received: Arc<StdMutex<Vec<Value>>> = Arc::new(StdMutex::new(Vec::new()));
    let handler: EventHandler = {
        let received = Arc::clone(&received);
        Arc::new(move |msg: &Value| received.lock().unwrap().push(msg.clone()))
    };
    client.on(category, handler);
    received
}

// ════════════════════════════════════════════════════════════════════
// Connect and handshake
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn connect_opens_transport_and_sends_handshake_first() {
    let (client, attempts) = scripted_client(URL, vec![Outcome::Open(vec![])]);

    client.connect().await;
    settle().await;

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].url, URL);

    let state = client.connection_state();
    assert!(state.is_connected);
    assert!(!state.is_connecting);
    assert_eq!(state.error, None);
    assert_eq!(state.server_url.as_deref(), Some(URL));

    let sent = attempts[0].sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "exactly the handshake should be sent");
    let handshake: Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(handshake["name"], "Arena Observer");
    assert_eq!(handshake["version"], env!("CARGO_PKG_VERSION"));

    // sessionId: "observer-<millis>-<9 base-36 chars>"
    let session_id = handshake["sessionId"].as_str().unwrap();
    let mut parts = session_id.splitn(3, '-');
    assert_eq!(parts.next(), Some("observer"));
    let millis = parts.next().unwrap();
    assert!(!millis.is_empty() && millis.bytes().all(|b| b.is_ascii_digit()));
    let suffix = parts.next().unwrap();
    assert_eq!(suffix.len(), 9);
    assert!(suffix
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
}

#[tokio::test(start_paused = true)]
async fn http_url_is_normalized_before_dialing() {
    let (client, attempts) =
        scripted_client("http://localhost:7655", vec![Outcome::Open(vec![])]);

    client.connect().await;
    settle().await;

    assert_eq!(attempts.lock().unwrap()[0].url, "ws://localhost:7655");
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn state_listener_sees_connecting_then_connected() {
    let (client, _attempts) = scripted_client(URL, vec![Outcome::Open(vec![])]);

    let snapshots: Arc<StdMutex<Vec<ConnectionState>>> = Arc::new(StdMutex::new(Vec::new()));
    let listener: StateHandler = {
        let snapshots = Arc::clone(&snapshots);
        Arc::new(move |state: &ConnectionState| snapshots.lock().unwrap().push(state.clone()))
    };
    client.on_connection_state_change(listener);

    client.connect().await;
    settle().await;

    let snapshots = snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 3);
    assert_eq!(snapshots[0], ConnectionState::default()); // immediate replay
    assert!(snapshots[1].is_connecting && !snapshots[1].is_connected);
    assert!(snapshots[2].is_connected && !snapshots[2].is_connecting);
}

// ════════════════════════════════════════════════════════════════════
// Event delivery
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn inbound_frames_fan_out_to_matching_subscribers() {
    let script = vec![
        Script::Frame(game_started_json()),
        Script::Frame(tick_json(1, 1)),
        Script::Frame(tick_json(1, 2)),
        Script::Frame(bot_death_json(2)),
        Script::Frame(unknown_type_json()),
        Script::Frame(game_ended_json()),
    ];
    let (client, _attempts) = scripted_client(URL, vec![Outcome::Open(script)]);

    let started = record(&client, EventCategory::GameStarted);
    let ticks = record(&client, EventCategory::Tick);
    let deaths = record(&client, EventCategory::BotDeath);
    let ended = record(&client, EventCategory::GameEnded);
    let fired = record(&client, EventCategory::BulletFired);

    client.connect().await;
    settle().await;

    assert_eq!(started.lock().unwrap().len(), 1);
    let ticks = ticks.lock().unwrap();
    assert_eq!(ticks.len(), 2);
    assert_eq!(ticks[1]["turnNumber"], 2);
    let deaths = deaths.lock().unwrap();
    assert_eq!(deaths.len(), 1);
    assert_eq!(deaths[0]["victimId"], 2);
    assert_eq!(ended.lock().unwrap().len(), 1);
    // Unknown type reached nobody; no category received it.
    assert!(fired.lock().unwrap().is_empty());
    // And the connection is still healthy.
    assert!(client.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Closure handling
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn clean_close_surfaces_message_and_does_not_reconnect() {
    let (client, attempts) =
        scripted_client(URL, vec![Outcome::Open(vec![Script::close(1000, "")])]);

    client.connect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    let state = client.connection_state();
    assert!(!state.is_connected);
    assert!(!state.is_connecting);
    assert_eq!(state.error.as_deref(), Some("connection closed normally"));
    assert_eq!(attempts.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn close_reason_text_surfaces_and_triggers_reconnect() {
    let (client, attempts) = scripted_client(
        URL,
        vec![
            Outcome::Open(vec![Script::close(1011, "server shutting down")]),
            Outcome::Open(vec![]),
        ],
    );

    let errors: Arc<StdMutex<Vec<Option<String>>>> = Arc::new(StdMutex::new(Vec::new()));
    let listener: StateHandler = {
        let errors = Arc::clone(&errors);
        Arc::new(move |state: &ConnectionState| errors.lock().unwrap().push(state.error.clone()))
    };
    client.on_connection_state_change(listener);

    client.connect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert!(errors
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.as_deref() == Some("server shutting down")));

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[1].url, URL); // reconnect dials the same address
    assert_eq!(attempts[1].at - attempts[0].at, Duration::from_millis(2000));
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn end_of_stream_counts_as_abnormal_closure() {
    let (client, attempts) = scripted_client(
        URL,
        vec![Outcome::Open(vec![Script::End]), Outcome::Open(vec![])],
    );

    client.connect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(attempts.lock().unwrap().len(), 2);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn receive_error_surfaces_but_closure_drives_the_state_machine() {
    let (client, attempts) = scripted_client(
        URL,
        vec![
            Outcome::Open(vec![
                Script::Error("codec failure".to_string()),
                Script::close(1011, ""),
            ]),
            Outcome::Open(vec![]),
        ],
    );

    let errors: Arc<StdMutex<Vec<Option<String>>>> = Arc::new(StdMutex::new(Vec::new()));
    let listener: StateHandler = {
        let errors = Arc::clone(&errors);
        Arc::new(move |state: &ConnectionState| errors.lock().unwrap().push(state.error.clone()))
    };
    client.on_connection_state_change(listener);

    client.connect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    let errors = errors.lock().unwrap();
    assert!(errors
        .iter()
        .any(|e| e.as_deref().is_some_and(|m| m.contains("codec failure"))));
    assert!(errors
        .iter()
        .any(|e| e.as_deref() == Some("connection closed")));
    // The 1011 closure scheduled a retry that then succeeded.
    assert_eq!(attempts.lock().unwrap().len(), 2);
    assert!(client.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Reconnection backoff
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn backoff_is_linear_and_bounded() {
    // One initial attempt plus five retries, all refused.
    let outcomes = (0..6).map(|_| Outcome::fail()).collect();
    let (client, attempts) = scripted_client(URL, outcomes);

    client.connect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 6);
    let deltas: Vec<u64> = attempts
        .windows(2)
        .map(|w| (w[1].at - w[0].at).as_millis() as u64)
        .collect();
    assert_eq!(deltas, vec![2000, 4000, 6000, 8000, 10000]);

    let state = client.connection_state();
    assert!(!state.is_connected);
    assert!(!state.is_connecting);
    assert_eq!(
        state.error.as_deref(),
        Some("max reconnection attempts reached")
    );
}

#[tokio::test(start_paused = true)]
async fn exhaustion_is_terminal_until_explicit_connect() {
    let outcomes = (0..6)
        .map(|_| Outcome::fail())
        .chain([Outcome::Open(vec![])])
        .collect();
    let (client, attempts) = scripted_client(URL, outcomes);

    client.connect().await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(attempts.lock().unwrap().len(), 6);

    // A fresh explicit connect is still honored after exhaustion.
    client.connect().await;
    settle().await;
    assert_eq!(attempts.lock().unwrap().len(), 7);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_the_attempt_counter() {
    let (client, attempts) = scripted_client(
        URL,
        vec![
            Outcome::fail(),
            Outcome::fail(),
            Outcome::Open(vec![Script::close(1006, "")]),
            Outcome::Open(vec![]),
        ],
    );

    client.connect().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 4);
    let deltas: Vec<u64> = attempts
        .windows(2)
        .map(|w| (w[1].at - w[0].at).as_millis() as u64)
        .collect();
    // Third attempt succeeded, so the post-close retry starts over at 2000ms.
    assert_eq!(deltas, vec![2000, 4000, 2000]);
    assert!(client.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Disconnect
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn disconnect_closes_transport_and_clears_error() {
    let (client, attempts) = scripted_client(URL, vec![Outcome::Open(vec![])]);

    client.connect().await;
    settle().await;
    assert!(client.is_connected());

    client.disconnect();
    settle().await;

    let state = client.connection_state();
    assert!(!state.is_connected);
    assert!(!state.is_connecting);
    assert_eq!(state.error, None);
    assert_eq!(state.server_url.as_deref(), Some(URL));

    let attempts = attempts.lock().unwrap();
    assert!(attempts[0].closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let (client, attempts) = scripted_client(URL, vec![Outcome::fail()]);

    client.connect().await;
    settle().await;
    assert_eq!(attempts.lock().unwrap().len(), 1);

    client.disconnect();
    tokio::time::sleep(Duration::from_secs(60)).await;

    // The scheduled retry never fired.
    assert_eq!(attempts.lock().unwrap().len(), 1);
    assert_eq!(client.connection_state().error, None);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let (client, _attempts) = scripted_client(URL, vec![Outcome::Open(vec![])]);

    client.connect().await;
    settle().await;
    client.disconnect();
    client.disconnect();
    settle().await;

    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_dialing_closes_the_late_transport() {
    // The dial resolves only after the caller has already disconnected.
    let (client, attempts) = scripted_client(
        URL,
        vec![
            Outcome::OpenAfter(Duration::from_millis(50), vec![]),
            Outcome::Open(vec![]),
        ],
    );

    client.connect().await;
    settle().await;
    assert!(client.connection_state().is_connecting);

    client.disconnect();
    tokio::time::sleep(Duration::from_secs(60)).await;

    // The transport that opened late was shut, and the session it belonged
    // to never flipped the snapshot back to connected.
    {
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].closed.load(Ordering::SeqCst));
        assert!(attempts[0].sent.lock().unwrap().is_empty());
    }
    let state = client.connection_state();
    assert!(!state.is_connected);
    assert!(!state.is_connecting);
    assert_eq!(state.error, None);

    // And the client is still usable afterwards.
    client.connect().await;
    settle().await;
    assert_eq!(attempts.lock().unwrap().len(), 2);
    assert!(client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_disconnect_opens_a_fresh_transport() {
    let (client, attempts) = scripted_client(
        URL,
        vec![Outcome::Open(vec![]), Outcome::Open(vec![])],
    );

    client.connect().await;
    settle().await;
    client.disconnect();
    settle().await;
    client.connect().await;
    settle().await;

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 2);
    assert!(attempts[0].closed.load(Ordering::SeqCst));
    assert!(!attempts[1].closed.load(Ordering::SeqCst));
    assert!(client.is_connected());
}

// ════════════════════════════════════════════════════════════════════
// Outbound messages
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn send_reaches_the_transport_after_the_handshake() {
    let (client, attempts) = scripted_client(URL, vec![Outcome::Open(vec![])]);

    client.connect().await;
    settle().await;

    client.send(&json!({"type": "PauseGame"}));
    settle().await;

    let attempts = attempts.lock().unwrap();
    let sent = attempts[0].sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    let handshake: Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(handshake["name"], "Arena Observer");
    assert_eq!(sent[1], r#"{"type":"PauseGame"}"#);
}

#[tokio::test(start_paused = true)]
async fn send_after_disconnect_is_a_noop() {
    let (client, attempts) = scripted_client(URL, vec![Outcome::Open(vec![])]);

    client.connect().await;
    settle().await;
    client.disconnect();
    settle().await;

    client.send(&json!({"type": "PauseGame"}));
    settle().await;

    let attempts = attempts.lock().unwrap();
    let sent = attempts[0].sent.lock().unwrap();
    assert_eq!(sent.len(), 1, "only the handshake should have been sent");
}

// ════════════════════════════════════════════════════════════════════
// Late subscription
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn late_state_listener_replays_the_connected_snapshot() {
    let (client, _attempts) = scripted_client(URL, vec![Outcome::Open(vec![])]);

    client.connect().await;
    settle().await;

    let replayed = Arc::new(AtomicUsize::new(0));
    let connected = Arc::new(AtomicUsize::new(0));
    let listener: StateHandler = {
        let replayed = Arc::clone(&replayed);
        let connected = Arc::clone(&connected);
        Arc::new(move |state: &ConnectionState| {
            replayed.fetch_add(1, Ordering::SeqCst);
            if state.is_connected {
                connected.fetch_add(1, Ordering::SeqCst);
            }
        })
    };
    client.on_connection_state_change(listener);

    assert_eq!(replayed.load(Ordering::SeqCst), 1);
    assert_eq!(connected.load(Ordering::SeqCst), 1);
}
