#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for observer client integration tests.
//!
//! Provides a scripted [`MockTransport`]/[`ScriptedConnector`] pair and
//! helper functions for constructing common battle-server JSON frames.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::time::Instant;

use arena_observer::{Connector, Incoming, ObserverError, Result, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// One scripted item a [`MockTransport`] yields from `recv()`.
pub enum Script {
    /// A complete inbound text frame.
    Frame(String),
    /// The server closes the connection with this code and reason.
    Close { code: u16, reason: String },
    /// A transport-level receive error.
    Error(String),
    /// The stream ends without a close frame (`recv` returns `None`).
    End,
}

impl Script {
    pub fn close(code: u16, reason: &str) -> Self {
        Script::Close {
            code,
            reason: reason.to_string(),
        }
    }
}

/// A scripted transport for integration testing.
///
/// Items are consumed in order by `recv()`; once exhausted, `recv()` pends
/// forever (an idle connection). Messages the client sends are recorded in
/// `sent`; `close()` flips the shared `closed` flag.
pub struct MockTransport {
    script: VecDeque<Script>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ObserverError::TransportClosed);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Incoming>> {
        match self.script.pop_front() {
            Some(Script::Frame(text)) => Some(Ok(Incoming::Text(text))),
            Some(Script::Close { code, reason }) => Some(Ok(Incoming::Closed { code, reason })),
            Some(Script::Error(text)) => Some(Err(ObserverError::TransportReceive(text))),
            Some(Script::End) => None,
            // Idle connection: nothing more arrives.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// ── ScriptedConnector ───────────────────────────────────────────────

/// Outcome of one scripted connection attempt.
pub enum Outcome {
    /// The attempt fails with this error text (server unreachable).
    Fail(String),
    /// The attempt opens a [`MockTransport`] that plays this script.
    Open(Vec<Script>),
    /// The attempt opens after a delay on the test clock (a slow dial).
    OpenAfter(std::time::Duration, Vec<Script>),
}

impl Outcome {
    pub fn fail() -> Self {
        Outcome::Fail("connection refused".to_string())
    }
}

/// Record of one connection attempt made through a [`ScriptedConnector`].
pub struct Attempt {
    /// The (normalized) address the client dialed.
    pub url: String,
    /// When the attempt happened, on the tokio test clock.
    pub at: Instant,
    /// Messages sent over the transport this attempt opened.
    pub sent: Arc<StdMutex<Vec<String>>>,
    /// Whether the client closed the transport this attempt opened.
    pub closed: Arc<AtomicBool>,
}

/// A connector that plays back scripted [`Outcome`]s, one per attempt,
/// and records every attempt for inspection.
pub struct ScriptedConnector {
    outcomes: StdMutex<VecDeque<Outcome>>,
    attempts: Arc<StdMutex<Vec<Attempt>>>,
}

impl ScriptedConnector {
    /// Build a connector plus the shared attempt log.
    pub fn new(outcomes: Vec<Outcome>) -> (Arc<Self>, Arc<StdMutex<Vec<Attempt>>>) {
        let attempts = Arc::new(StdMutex::new(Vec::new()));
        let connector = Arc::new(Self {
            outcomes: StdMutex::new(VecDeque::from(outcomes)),
            attempts: Arc::clone(&attempts),
        });
        (connector, attempts)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>> {
        let outcome = self.outcomes.lock().unwrap().pop_front();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        self.attempts.lock().unwrap().push(Attempt {
            url: url.to_string(),
            at: Instant::now(),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });

        match outcome {
            Some(Outcome::Open(script)) => Ok(Box::new(MockTransport {
                script: VecDeque::from(script),
                sent,
                closed,
            })),
            Some(Outcome::OpenAfter(delay, script)) => {
                tokio::time::sleep(delay).await;
                Ok(Box::new(MockTransport {
                    script: VecDeque::from(script),
                    sent,
                    closed,
                }))
            }
            Some(Outcome::Fail(text)) => Err(ObserverError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                text,
            ))),
            None => panic!("unscripted connection attempt to {url}"),
        }
    }
}

// ── Frame helpers ───────────────────────────────────────────────────

pub fn tick_json(round_number: u32, turn_number: u32) -> String {
    format!(
        r#"{{"type":"TickEventForObserver","roundNumber":{round_number},"turnNumber":{turn_number},"botStates":[],"bulletStates":[],"events":[]}}"#
    )
}

pub fn game_started_json() -> String {
    r#"{"type":"GameStartedEventForObserver","gameSetup":{"gameType":"classic","arenaWidth":800,"arenaHeight":600,"numberOfRounds":10,"gunCoolingRate":0.1,"maxInactivityTurns":450,"turnTimeout":30000,"readyTimeout":1000000,"defaultTurnsPerSecond":30},"participants":[{"id":1,"name":"Crusher","version":"1.0"},{"id":2,"name":"Dodger","version":"2.1"}]}"#
        .to_string()
}

pub fn game_ended_json() -> String {
    r#"{"type":"GameEndedEventForObserver","numberOfRounds":10,"results":[{"id":1,"name":"Crusher","version":"1.0","rank":1}]}"#
        .to_string()
}

pub fn bot_death_json(victim_id: u32) -> String {
    format!(r#"{{"type":"BotDeathEvent","victimId":{victim_id}}}"#)
}

pub fn bullet_fired_json(bullet_id: u32, owner_id: u32) -> String {
    format!(
        r#"{{"type":"BulletFiredEvent","bullet":{{"bulletId":{bullet_id},"ownerId":{owner_id},"power":2.5,"x":100.0,"y":200.0,"direction":45.0}}}}"#
    )
}

pub fn unknown_type_json() -> String {
    r#"{"type":"BotListUpdate","bots":[]}"#.to_string()
}

/// Let spawned tasks make progress on the (paused) test clock.
///
/// Yields repeatedly and nudges the clock by one millisecond so every task
/// woken by channels or timers gets polled to a steady state.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
