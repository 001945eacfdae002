/// Local projection of one table, owned by the session driver and rebuilt by the reducer
use std::fmt;
use std::ops::RangeInclusive;

use chrono::{DateTime, Utc};

use crate::core::error::ClientError;
use crate::core::protocol::{Money, Multiplier, PlayerId, PlayerRef, TableStatus};

pub const MAX_SEATS: u8 = 3;
pub const STARTING_LIVES: u8 = 3;
pub const DIE_FACES: RangeInclusive<u8> = 1..=6;

/// Room codes are upper-case alphanumerics, as routed by the server
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ClientError::InvalidRoom(raw.to_string()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A fixed slot at the table, 1 through 3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Seat(u8);

impl Seat {
    pub fn new(number: u8) -> Option<Self> {
        (1..=MAX_SEATS).contains(&number).then_some(Seat(number))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Seat> {
        (1..=MAX_SEATS).map(Seat)
    }
}

impl fmt::Display for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seat {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roll {
    pub die1: u8,
    pub die2: u8,
}

impl Roll {
    /// `None` unless both dice show a face
    pub fn new(die1: u8, die2: u8) -> Option<Self> {
        (DIE_FACES.contains(&die1) && DIE_FACES.contains(&die2)).then_some(Roll { die1, die2 })
    }

    pub fn total(&self) -> u8 {
        self.die1.saturating_add(self.die2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub avatar_url: String,
    pub seat: Seat,
    pub lives: u8,
    pub eliminated: bool,
    pub last_roll: Option<Roll>,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, seat: Seat) -> Self {
        Self {
            id,
            name: name.into(),
            avatar_url: String::new(),
            seat,
            lives: STARTING_LIVES,
            eliminated: false,
            last_roll: None,
        }
    }
}

/// How a finished game ended
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub winner: Option<String>,
    pub prize: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSession {
    pub room: RoomCode,
    pub status: TableStatus,
    pub multiplier: Option<Multiplier>,
    pub final_prize: Option<Money>,
    pub started_at: Option<DateTime<Utc>>,
    pub round: u32,
    pub outcome: Option<Outcome>,
    // kept sorted by seat
    players: Vec<Player>,
}

impl GameSession {
    pub fn new(room: RoomCode) -> Self {
        Self {
            room,
            status: TableStatus::Waiting,
            multiplier: None,
            final_prize: None,
            started_at: None,
            round: 0,
            outcome: None,
            players: Vec::new(),
        }
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_at(&self, seat: Seat) -> Option<&Player> {
        self.players.iter().find(|p| p.seat == seat)
    }

    pub fn is_finished(&self) -> bool {
        self.status == TableStatus::Finished
    }

    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| !p.eliminated)
    }

    /// Seat lookup: a bound id wins, otherwise fall back to the display name.
    pub fn resolve(&self, id: Option<PlayerId>, name: Option<&str>) -> Option<Seat> {
        id.and_then(|id| self.player(id))
            .or_else(|| {
                let name = name.filter(|n| !n.is_empty())?;
                self.players.iter().find(|p| p.name == name)
            })
            .map(|p| p.seat)
    }

    pub fn resolve_ref(&self, player: &PlayerRef) -> Option<Seat> {
        match player {
            PlayerRef::Id(id) => self.resolve(Some(*id), None),
            PlayerRef::Name(name) => self
                .resolve(None, Some(name))
                .or_else(|| self.resolve(name.trim().parse().ok(), None)),
        }
    }

    pub(crate) fn player_mut(&mut self, seat: Seat) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.seat == seat)
    }

    pub(crate) fn seat_player(&mut self, player: Player) {
        self.players.push(player);
        self.players.sort_by_key(|p| p.seat);
    }

    pub(crate) fn replace_players(&mut self, mut players: Vec<Player>) {
        players.sort_by_key(|p| p.seat);
        self.players = players;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> GameSession {
        let mut session = GameSession::new(RoomCode::parse("abc123").unwrap());
        session.seat_player(Player::new(20, "bea", Seat::new(2).unwrap()));
        session.seat_player(Player::new(10, "ana", Seat::new(1).unwrap()));
        session
    }

    #[test]
    fn room_codes_are_normalised_and_validated() {
        assert_eq!(RoomCode::parse(" abc123 ").unwrap().as_str(), "ABC123");
        assert!(RoomCode::parse("").is_err());
        assert!(RoomCode::parse("AB-12").is_err());
        assert!(RoomCode::parse("../x").is_err());
    }

    #[test]
    fn seats_only_span_one_to_three() {
        assert!(Seat::new(0).is_none());
        assert!(Seat::new(4).is_none());
        assert_eq!(Seat::all().map(Seat::number).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn rolls_only_take_real_faces() {
        assert_eq!(Roll::new(6, 6).map(|r| r.total()), Some(12));
        assert!(Roll::new(0, 3).is_none());
        assert!(Roll::new(3, 7).is_none());
        assert_eq!(Roll { die1: 200, die2: 100 }.total(), u8::MAX);
    }

    #[test]
    fn players_stay_ordered_by_seat() {
        let session = table();
        let names: Vec<_> = session.players().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["ana", "bea"]);
    }

    #[test]
    fn resolution_prefers_id_then_name() {
        let session = table();
        assert_eq!(session.resolve(Some(20), Some("ana")), Seat::new(2));
        assert_eq!(session.resolve(Some(99), Some("ana")), Seat::new(1));
        assert_eq!(session.resolve(Some(99), Some("zoe")), None);
        assert_eq!(session.resolve(None, Some("")), None);
        assert_eq!(session.resolve_ref(&PlayerRef::Name("20".into())), Seat::new(2));
        assert_eq!(session.resolve_ref(&PlayerRef::Id(10)), Seat::new(1));
    }
}
