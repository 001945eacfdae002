/// Wire protocol for the dice table - one JSON object per text frame, tagged by `type`
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

use crate::core::error::ClientError;
use crate::core::session::DIE_FACES;

pub type PlayerId = u64;

/// Lifecycle of a table as the server reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TableStatus {
    Waiting,
    Spinning,
    Playing,
    Finished,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TableStatus::Waiting => "WAITING",
            TableStatus::Spinning => "SPINNING",
            TableStatus::Playing => "PLAYING",
            TableStatus::Finished => "FINISHED",
        };
        f.write_str(label)
    }
}

/// Prize amount in cents. Accepts `5000`, `5000.5` or `"5000.00"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money {
    cents: i64,
}

impl Money {
    pub const fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub const fn from_units(units: i64) -> Self {
        Self { cents: units * 100 }
    }

    pub fn cents(self) -> i64 {
        self.cents
    }

    pub fn times(self, factor: i64) -> Self {
        Self { cents: self.cents.saturating_mul(factor) }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let cents = self.cents.unsigned_abs();
        let digits = (cents / 100).to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, ch) in digits.chars().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        write!(f, "{sign}${grouped}.{:02}", cents % 100)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let sign = if self.cents < 0 { "-" } else { "" };
        let cents = self.cents.unsigned_abs();
        serializer.serialize_str(&format!("{sign}{}.{:02}", cents / 100, cents % 100))
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(f64),
            Text(String),
        }

        let units = match Wire::deserialize(deserializer)? {
            Wire::Number(n) => n,
            Wire::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| de::Error::custom(format!("invalid amount {s:?}")))?,
        };
        if !units.is_finite() || units < 0.0 {
            return Err(de::Error::custom(format!("invalid amount {units}")));
        }
        Ok(Money { cents: (units * 100.0).round() as i64 })
    }
}

/// Prize multiplier label such as `"100x"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiplier(String);

impl Multiplier {
    pub fn new(factor: u32) -> Self {
        Self(format!("{factor}x"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn factor(&self) -> Option<u32> {
        self.0.trim().trim_end_matches(['x', 'X']).parse().ok()
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference to a player that the server may send as a user id or a display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerRef {
    Id(PlayerId),
    Name(String),
}

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerRef::Id(id) => write!(f, "#{id}"),
            PlayerRef::Name(name) => f.write_str(name),
        }
    }
}

fn default_lives() -> u8 {
    crate::core::session::STARTING_LIVES
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub user_id: PlayerId,
    pub username: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default = "default_lives")]
    pub lives: u8,
    #[serde(default)]
    pub is_eliminated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat_position: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStatePayload {
    pub status: TableStatus,
    #[serde(default)]
    pub multiplier: Option<Multiplier>,
    #[serde(default)]
    pub final_prize: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub round_number: u32,
    #[serde(default)]
    pub players: Vec<PlayerSnapshot>,
}

/// One player's line in a round result. The named form is canonical; the
/// positional `[die1, die2, lives_remaining]` form is still accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RoundEntryWire")]
pub struct RoundEntry {
    pub die1: u8,
    pub die2: u8,
    pub lives_remaining: u8,
}

impl RoundEntry {
    pub fn total(&self) -> u8 {
        self.die1.saturating_add(self.die2)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RoundEntryWire {
    Named { die1: u8, die2: u8, lives_remaining: u8 },
    Positional(u8, u8, u8),
}

impl TryFrom<RoundEntryWire> for RoundEntry {
    type Error = String;

    fn try_from(wire: RoundEntryWire) -> Result<Self, String> {
        let (RoundEntryWire::Named { die1, die2, lives_remaining }
        | RoundEntryWire::Positional(die1, die2, lives_remaining)) = wire;
        check_die(die1)?;
        check_die(die2)?;
        Ok(RoundEntry { die1, die2, lives_remaining })
    }
}

fn check_die(value: u8) -> Result<u8, String> {
    if DIE_FACES.contains(&value) {
        Ok(value)
    } else {
        Err(format!("die value {value} is not between 1 and 6"))
    }
}

fn de_die<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    check_die(u8::deserialize(deserializer)?).map_err(de::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResultPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_number: Option<u32>,
    #[serde(deserialize_with = "de_results")]
    pub results: BTreeMap<PlayerId, RoundEntry>,
    #[serde(default)]
    pub eliminated: Option<PlayerRef>,
    #[serde(default)]
    pub is_tie: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_total: Option<u8>,
}

/// Map keys arrive as JSON strings; tagged enums buffer them, so parse by hand.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct PlayerKey(PlayerId);

impl<'de> Deserialize<'de> for PlayerKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl Visitor<'_> for KeyVisitor {
            type Value = PlayerKey;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a player id")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<PlayerKey, E> {
                Ok(PlayerKey(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<PlayerKey, E> {
                v.trim()
                    .parse()
                    .map(PlayerKey)
                    .map_err(|_| E::custom(format!("invalid player id {v:?}")))
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}

fn de_results<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<PlayerId, RoundEntry>, D::Error> {
    let raw = BTreeMap::<PlayerKey, RoundEntry>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(key, entry)| (key.0, entry)).collect())
}

/// Everything the server pushes to a table subscriber
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    GameState(GameStatePayload),
    PlayerJoined {
        player_id: PlayerId,
        username: String,
        #[serde(default)]
        avatar_url: String,
        seat_position: u8,
    },
    DiceRolled {
        user_id: PlayerId,
        #[serde(default)]
        username: String,
        #[serde(deserialize_with = "de_die")]
        die1: u8,
        #[serde(deserialize_with = "de_die")]
        die2: u8,
        total: u8,
    },
    PrizeSpun {
        multiplier: Multiplier,
        final_prize: Money,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
    },
    RoundResult(RoundResultPayload),
    GameStatusChanged {
        status: TableStatus,
        #[serde(default)]
        multiplier: Option<Multiplier>,
        #[serde(default)]
        final_prize: Option<Money>,
    },
    GameFinished {
        #[serde(default)]
        winner: Option<PlayerRef>,
        #[serde(default)]
        prize: Option<Money>,
        #[serde(default)]
        multiplier: Option<Multiplier>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

impl ServerEvent {
    /// The wire tag, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::GameState(_) => "game_state",
            ServerEvent::PlayerJoined { .. } => "player_joined",
            ServerEvent::DiceRolled { .. } => "dice_rolled",
            ServerEvent::PrizeSpun { .. } => "prize_spun",
            ServerEvent::RoundResult(_) => "round_result",
            ServerEvent::GameStatusChanged { .. } => "game_status_changed",
            ServerEvent::GameFinished { .. } => "game_finished",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// The only thing a client ever asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientAction {
    RollDice,
}

pub fn decode<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, ClientError> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode<T: Serialize>(message: &T) -> Result<String, ClientError> {
    Ok(serde_json::to_string(message)?)
}
