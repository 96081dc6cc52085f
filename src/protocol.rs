//! Wire types for the battle-server observer protocol.
//!
//! Inbound frames are JSON objects carrying a `type` discriminator. The
//! dispatcher in [`crate::client`] only ever reads that discriminator — the
//! typed shapes in this module are advisory, for consumers that want field
//! access instead of raw [`serde_json::Value`]s. The upstream schema declares
//! open-ended extensibility, so every record keeps unrecognized fields in a
//! flattened `extra` side-map instead of dropping them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Event categories ────────────────────────────────────────────────

/// Classification bucket a recognized inbound message is routed to for
/// subscriber delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Per-turn battle snapshot (`TickEventForObserver`).
    Tick,
    /// A battle began (`GameStartedEventForObserver`).
    GameStarted,
    /// A battle finished (`GameEndedEventForObserver`).
    GameEnded,
    /// A bot fired a bullet (`BulletFiredEvent`).
    BulletFired,
    /// A bullet struck a bot (`BulletHitBotEvent`).
    BulletHitBot,
    /// A bullet struck the arena wall (`BulletHitWallEvent`).
    BulletHitWall,
    /// A bot died (`BotDeathEvent`).
    BotDeath,
    /// Two bots collided (`BotHitBotEvent`).
    BotHitBot,
    /// A bot drove into the arena wall (`BotHitWallEvent`).
    BotHitWall,
}

impl EventCategory {
    /// All deliverable categories, in wire-catalog order.
    pub const ALL: [EventCategory; 9] = [
        EventCategory::Tick,
        EventCategory::GameStarted,
        EventCategory::GameEnded,
        EventCategory::BulletFired,
        EventCategory::BulletHitBot,
        EventCategory::BulletHitWall,
        EventCategory::BotDeath,
        EventCategory::BotHitBot,
        EventCategory::BotHitWall,
    ];

    /// Short name of the category, as used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            EventCategory::Tick => "tick",
            EventCategory::GameStarted => "gameStarted",
            EventCategory::GameEnded => "gameEnded",
            EventCategory::BulletFired => "bulletFired",
            EventCategory::BulletHitBot => "bulletHitBot",
            EventCategory::BulletHitWall => "bulletHitWall",
            EventCategory::BotDeath => "botDeath",
            EventCategory::BotHitBot => "botHitBot",
            EventCategory::BotHitWall => "botHitWall",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of looking up an inbound `type` discriminator in the fixed
/// wire-type catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A battle event with subscriber delivery.
    Battle(EventCategory),
    /// A handshake frame — recognized, but never delivered to subscribers.
    Handshake,
    /// Not part of the catalog; dropped silently.
    Unknown,
}

/// Map a wire-level `type` string onto its delivery classification.
///
/// The catalog is fixed: the nine observer battle events plus the handshake.
pub fn classify(wire_type: &str) -> Classification {
    match wire_type {
        "TickEventForObserver" => Classification::Battle(EventCategory::Tick),
        "GameStartedEventForObserver" => Classification::Battle(EventCategory::GameStarted),
        "GameEndedEventForObserver" => Classification::Battle(EventCategory::GameEnded),
        "BulletFiredEvent" => Classification::Battle(EventCategory::BulletFired),
        "BulletHitBotEvent" => Classification::Battle(EventCategory::BulletHitBot),
        "BulletHitWallEvent" => Classification::Battle(EventCategory::BulletHitWall),
        "BotDeathEvent" => Classification::Battle(EventCategory::BotDeath),
        "BotHitBotEvent" => Classification::Battle(EventCategory::BotHitBot),
        "BotHitWallEvent" => Classification::Battle(EventCategory::BotHitWall),
        "ObserverHandshake" => Classification::Handshake,
        _ => Classification::Unknown,
    }
}

// ── Handshake ───────────────────────────────────────────────────────

/// Identification payload sent immediately after the transport opens.
///
/// The session id is best-effort unique, not cryptographically guaranteed:
/// `observer-<epoch millis>-<9 random base-36 chars>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverHandshake {
    /// Display name of the observer, e.g. "Arena Observer".
    pub name: String,
    /// Unique session id identifying this observer to the server.
    pub session_id: String,
    /// Observer version, e.g. "1.0".
    pub version: String,
    /// Author name, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Access-control secret, if the server requires one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl ObserverHandshake {
    /// Create a handshake with a freshly generated session id.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            session_id: generate_session_id(),
            version: version.into(),
            author: None,
            secret: None,
        }
    }
}

/// Generate an observer session id: `observer-<epoch millis>-<suffix>`.
fn generate_session_id() -> String {
    const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: String = uuid::Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(9)
        .map(|b| char::from(*ALPHABET.get(usize::from(b % 36)).unwrap_or(&b'0')))
        .collect();
    format!("observer-{millis}-{suffix}")
}

// ── Battle state records ────────────────────────────────────────────

/// State of one bot at a tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotState {
    /// Display id of the bot in the battle (like an index).
    pub id: u32,
    /// Energy level.
    pub energy: f64,
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Driving direction in degrees.
    pub direction: f64,
    /// Gun direction in degrees.
    pub gun_direction: f64,
    /// Radar direction in degrees.
    pub radar_direction: f64,
    /// Speed in units per turn.
    pub speed: f64,
    /// Gun heat; the gun can only fire at zero heat.
    pub gun_heat: f64,
    /// Enemy bots left in the current round.
    pub enemy_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gun_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radar_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bullet_color: Option<String>,
    /// Fields the schema declares but this record does not type individually.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// State of one bullet in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletState {
    /// Id of the bullet.
    pub bullet_id: u32,
    /// Id of the bot that fired the bullet.
    pub owner_id: u32,
    /// Firepower (between 0.1 and 3.0).
    pub power: f64,
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Direction in degrees.
    pub direction: f64,
    /// Color of the bullet, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Rules the battle is played under.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSetup {
    /// Type of game, e.g. "classic", "melee", "1v1".
    pub game_type: String,
    /// Arena width in units.
    pub arena_width: u32,
    /// Arena height in units.
    pub arena_height: u32,
    /// Number of rounds in the battle.
    pub number_of_rounds: u32,
    /// Gun cooling rate per turn.
    pub gun_cooling_rate: f64,
    /// Inactive turns allowed before a bot is zapped.
    pub max_inactivity_turns: u32,
    /// Turn timeout in microseconds.
    pub turn_timeout: u64,
    /// Ready timeout in microseconds.
    pub ready_timeout: u64,
    /// Default turns to show per second for an observer/UI.
    pub default_turns_per_second: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A bot participating in a battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Id of the bot in the battle.
    pub id: u32,
    /// Bot name, e.g. "Killer Bee".
    pub name: String,
    /// Bot version, e.g. "1.0".
    pub version: String,
    /// Author names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Session id matching the server handshake, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Final standing of one participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleResult {
    /// Id of the participant.
    pub id: u32,
    /// Name of the participant.
    pub name: String,
    /// Version of the participant.
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Event payloads ──────────────────────────────────────────────────

/// Per-turn snapshot of the whole battlefield.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickEvent {
    /// Current round number.
    pub round_number: u32,
    /// State of all bots.
    pub bot_states: Vec<BotState>,
    /// State of all bullets.
    pub bullet_states: Vec<BulletState>,
    /// All events occurring at this tick (opaque, schema-open).
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A battle began.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStartedEvent {
    pub game_setup: GameSetup,
    pub participants: Vec<Participant>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A battle finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEndedEvent {
    pub number_of_rounds: u32,
    pub results: Vec<BattleResult>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A bot fired a bullet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletFiredEvent {
    pub bullet: BulletState,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A bullet struck a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletHitBotEvent {
    pub bullet: BulletState,
    /// Id of the bot that got hit.
    pub victim_id: u32,
    /// Damage inflicted by the bullet.
    pub damage: f64,
    /// Remaining energy of the victim.
    pub energy: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A bullet struck the arena wall.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletHitWallEvent {
    pub bullet: BulletState,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A bot died.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotDeathEvent {
    /// Id of the bot that died.
    pub victim_id: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Two bots collided.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotHitBotEvent {
    /// Id of the bot that drove into the victim.
    pub bot_id: u32,
    /// Id of the victim bot.
    pub victim_id: u32,
    /// Remaining energy of the victim.
    pub energy: f64,
    /// Whether the victim got rammed.
    pub rammed: bool,
    /// X coordinate of the victim.
    pub x: f64,
    /// Y coordinate of the victim.
    pub y: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A bot drove into the arena wall.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotHitWallEvent {
    /// Id of the bot that hit the wall.
    pub victim_id: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ── Tagged message envelope ─────────────────────────────────────────

/// Inbound battle message, keyed by the wire `type` discriminator.
///
/// Variant names match the wire strings exactly, so this enum deserializes
/// straight from server frames. The dispatcher does not use it — handlers get
/// raw [`Value`]s — but typed consumers and tests do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[allow(clippy::large_enum_variant)]
pub enum BattleMessage {
    TickEventForObserver(TickEvent),
    GameStartedEventForObserver(GameStartedEvent),
    GameEndedEventForObserver(GameEndedEvent),
    BulletFiredEvent(BulletFiredEvent),
    BulletHitBotEvent(BulletHitBotEvent),
    BulletHitWallEvent(BulletHitWallEvent),
    BotDeathEvent(BotDeathEvent),
    BotHitBotEvent(BotHitBotEvent),
    BotHitWallEvent(BotHitWallEvent),
}

impl BattleMessage {
    /// The delivery category of this message.
    pub fn category(&self) -> EventCategory {
        match self {
            BattleMessage::TickEventForObserver(_) => EventCategory::Tick,
            BattleMessage::GameStartedEventForObserver(_) => EventCategory::GameStarted,
            BattleMessage::GameEndedEventForObserver(_) => EventCategory::GameEnded,
            BattleMessage::BulletFiredEvent(_) => EventCategory::BulletFired,
            BattleMessage::BulletHitBotEvent(_) => EventCategory::BulletHitBot,
            BattleMessage::BulletHitWallEvent(_) => EventCategory::BulletHitWall,
            BattleMessage::BotDeathEvent(_) => EventCategory::BotDeath,
            BattleMessage::BotHitBotEvent(_) => EventCategory::BotHitBot,
            BattleMessage::BotHitWallEvent(_) => EventCategory::BotHitWall,
        }
    }
}
