//! Rules of one dice table, independent of any socket
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;

use crate::core::protocol::{
    GameStatePayload, Money, Multiplier, PlayerId, PlayerRef, PlayerSnapshot, RoundEntry,
    RoundResultPayload, ServerEvent, TableStatus,
};
use crate::core::session::{Player, Roll, Seat, MAX_SEATS};

/// Prize wheel: multiplier and relative weight
const WHEEL: [(u32, u32); 8] = [
    (2, 400),
    (3, 250),
    (5, 150),
    (10, 100),
    (25, 60),
    (100, 30),
    (500, 9),
    (1000, 1),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("the table is full")]
    Full,
    #[error("the game has already started")]
    Started,
    #[error("the game has not started yet, wait for the prize wheel")]
    NotPlaying(TableStatus),
    #[error("you are not part of this game")]
    NotSeated,
    #[error("you are already eliminated")]
    Eliminated,
    #[error("you already rolled this round, wait for the others")]
    AlreadyRolled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatOutcome {
    Seated(Seat),
    /// The player was already at the table (a reconnect)
    Returning(Seat),
}

impl SeatOutcome {
    pub fn seat(self) -> Seat {
        match self {
            SeatOutcome::Seated(seat) | SeatOutcome::Returning(seat) => seat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    pub number: u32,
    pub entries: BTreeMap<PlayerId, RoundEntry>,
    /// Shared total when every active player rolled the same
    pub tie: Option<u8>,
    pub eliminated: Option<PlayerId>,
    pub winner: Option<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollOutcome {
    pub player: PlayerId,
    pub name: String,
    pub roll: Roll,
    /// Present when this roll completed the round
    pub round: Option<RoundSummary>,
}

#[derive(Debug, Clone)]
pub struct Table {
    stake: Money,
    lives: u8,
    status: TableStatus,
    multiplier: Option<Multiplier>,
    final_prize: Option<Money>,
    started_at: Option<DateTime<Utc>>,
    /// Completed rounds, ties excluded
    round: u32,
    players: Vec<Player>,
    rolls: BTreeMap<PlayerId, Roll>,
    winner: Option<PlayerId>,
}

impl Table {
    pub fn new(stake: Money, lives: u8) -> Self {
        Self {
            stake,
            lives,
            status: TableStatus::Waiting,
            multiplier: None,
            final_prize: None,
            started_at: None,
            round: 0,
            players: Vec::new(),
            rolls: BTreeMap::new(),
            winner: None,
        }
    }

    pub fn status(&self) -> TableStatus {
        self.status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_SEATS as usize
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn seat(&mut self, id: PlayerId, name: &str) -> Result<SeatOutcome, TableError> {
        if let Some(player) = self.player(id) {
            return Ok(SeatOutcome::Returning(player.seat));
        }
        if self.status != TableStatus::Waiting {
            return Err(TableError::Started);
        }
        let seat = Seat::all()
            .find(|seat| self.players.iter().all(|p| p.seat != *seat))
            .ok_or(TableError::Full)?;
        let mut player = Player::new(id, name, seat);
        player.lives = self.lives;
        self.players.push(player);
        self.players.sort_by_key(|p| p.seat);
        Ok(SeatOutcome::Seated(seat))
    }

    /// Draws the multiplier once the table is full. Returns `None` if it is not time yet.
    pub fn begin_spin<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Option<(Multiplier, Money)> {
        if self.status != TableStatus::Waiting || !self.is_full() {
            return None;
        }
        let factor = spin_wheel(rng);
        let multiplier = Multiplier::new(factor);
        let prize = self.stake.times(self.players.len() as i64).times(i64::from(factor));
        self.status = TableStatus::Spinning;
        self.multiplier = Some(multiplier.clone());
        self.final_prize = Some(prize);
        self.started_at = Some(now);
        Some((multiplier, prize))
    }

    pub fn start_play(&mut self) -> bool {
        if self.status != TableStatus::Spinning {
            return false;
        }
        self.status = TableStatus::Playing;
        true
    }

    pub fn roll<R: Rng + ?Sized>(
        &mut self,
        id: PlayerId,
        rng: &mut R,
    ) -> Result<RollOutcome, TableError> {
        let roll = Roll { die1: rng.random_range(1..=6), die2: rng.random_range(1..=6) };
        self.roll_with(id, roll)
    }

    pub fn roll_with(&mut self, id: PlayerId, roll: Roll) -> Result<RollOutcome, TableError> {
        if self.status != TableStatus::Playing {
            return Err(TableError::NotPlaying(self.status));
        }
        let player = self.player(id).ok_or(TableError::NotSeated)?;
        if player.eliminated {
            return Err(TableError::Eliminated);
        }
        if self.rolls.contains_key(&id) {
            return Err(TableError::AlreadyRolled);
        }
        let name = player.name.clone();

        self.rolls.insert(id, roll);
        if let Some(player) = self.players.iter_mut().find(|p| p.id == id) {
            player.last_roll = Some(roll);
        }

        let everyone = self
            .players
            .iter()
            .filter(|p| !p.eliminated)
            .all(|p| self.rolls.contains_key(&p.id));
        let round = everyone.then(|| self.resolve_round());
        Ok(RollOutcome { player: id, name, roll, round })
    }

    fn resolve_round(&mut self) -> RoundSummary {
        let rolls = std::mem::take(&mut self.rolls);
        let totals: Vec<(PlayerId, u8)> = self
            .players
            .iter()
            .filter_map(|p| rolls.get(&p.id).map(|r| (p.id, r.total())))
            .collect();

        let first = totals.first().map(|(_, total)| *total);
        let tie = first.filter(|total| totals.len() > 1 && totals.iter().all(|(_, t)| t == total));

        let mut eliminated = None;
        if tie.is_none() {
            // players are in seat order, so the first lowest total loses
            if let Some((loser, _)) = totals.iter().min_by_key(|(_, total)| *total) {
                if let Some(player) = self.players.iter_mut().find(|p| p.id == *loser) {
                    player.lives = player.lives.saturating_sub(1);
                    if player.lives == 0 {
                        player.eliminated = true;
                        eliminated = Some(player.id);
                    }
                }
            }
            self.round += 1;
        }

        let entries = rolls
            .iter()
            .filter_map(|(id, roll)| {
                let player = self.player(*id)?;
                let entry =
                    RoundEntry { die1: roll.die1, die2: roll.die2, lives_remaining: player.lives };
                Some((*id, entry))
            })
            .collect();

        let mut survivors = self.players.iter().filter(|p| !p.eliminated);
        let winner = match (survivors.next(), survivors.next()) {
            (Some(last), None) => Some(last.id),
            _ => None,
        };
        if winner.is_some() {
            self.status = TableStatus::Finished;
            self.winner = winner;
        }

        RoundSummary { number: self.round, entries, tie, eliminated, winner }
    }

    pub fn snapshot(&self) -> GameStatePayload {
        GameStatePayload {
            status: self.status,
            multiplier: self.multiplier.clone(),
            final_prize: self.final_prize,
            started_at: self.started_at,
            round_number: self.round,
            players: self
                .players
                .iter()
                .map(|p| PlayerSnapshot {
                    user_id: p.id,
                    username: p.name.clone(),
                    avatar_url: p.avatar_url.clone(),
                    lives: p.lives,
                    is_eliminated: p.eliminated,
                    seat_position: Some(p.seat.number()),
                })
                .collect(),
        }
    }

    pub fn joined_event(&self, id: PlayerId) -> Option<ServerEvent> {
        let player = self.player(id)?;
        Some(ServerEvent::PlayerJoined {
            player_id: player.id,
            username: player.name.clone(),
            avatar_url: player.avatar_url.clone(),
            seat_position: player.seat.number(),
        })
    }

    pub fn round_event(&self, summary: &RoundSummary) -> ServerEvent {
        ServerEvent::RoundResult(RoundResultPayload {
            round_number: Some(summary.number),
            results: summary.entries.clone(),
            eliminated: summary.eliminated.map(PlayerRef::Id),
            is_tie: summary.tie.is_some(),
            tie_total: summary.tie,
        })
    }

    pub fn finished_event(&self) -> Option<ServerEvent> {
        let winner = self.player(self.winner?)?;
        Some(ServerEvent::GameFinished {
            winner: Some(PlayerRef::Name(winner.name.clone())),
            prize: self.final_prize,
            multiplier: self.multiplier.clone(),
        })
    }
}

fn spin_wheel<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    let total: u32 = WHEEL.iter().map(|(_, weight)| weight).sum();
    let mut pick = rng.random_range(0..total);
    for (factor, weight) in WHEEL {
        if pick < weight {
            return factor;
        }
        pick -= weight;
    }
    WHEEL[0].0
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn roll(die1: u8, die2: u8) -> Roll {
        Roll { die1, die2 }
    }

    fn playing() -> Table {
        let mut table = Table::new(Money::from_units(100), 3);
        for (id, name) in [(1, "ana"), (2, "bea"), (3, "cruz")] {
            table.seat(id, name).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(7);
        table.begin_spin(&mut rng, Utc::now()).unwrap();
        assert!(table.start_play());
        table
    }

    #[test]
    fn seats_fill_in_order_and_cap_at_three() {
        let mut table = Table::new(Money::from_units(100), 3);
        assert_eq!(table.seat(1, "ana"), Ok(SeatOutcome::Seated(Seat::new(1).unwrap())));
        assert_eq!(table.seat(2, "bea"), Ok(SeatOutcome::Seated(Seat::new(2).unwrap())));
        assert_eq!(table.seat(1, "ana"), Ok(SeatOutcome::Returning(Seat::new(1).unwrap())));
        assert!(table.begin_spin(&mut StdRng::seed_from_u64(1), Utc::now()).is_none());
        table.seat(3, "cruz").unwrap();
        assert!(table.is_full());
        // a fourth player is turned away before and after the spin
        assert_eq!(table.seat(4, "dan"), Err(TableError::Full));
        table.begin_spin(&mut StdRng::seed_from_u64(1), Utc::now()).unwrap();
        assert_eq!(table.seat(4, "dan"), Err(TableError::Started));
    }

    #[test]
    fn prize_is_stake_times_seats_times_multiplier() {
        let mut table = Table::new(Money::from_units(100), 3);
        for id in 1..=3 {
            table.seat(id, &format!("p{id}")).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(99);
        let (multiplier, prize) = table.begin_spin(&mut rng, Utc::now()).unwrap();
        let factor = multiplier.factor().unwrap();
        assert!(WHEEL.iter().any(|(f, _)| *f == factor));
        assert_eq!(prize, Money::from_units(300 * i64::from(factor)));
        assert_eq!(table.status(), TableStatus::Spinning);
    }

    #[test]
    fn lowest_total_loses_a_life() {
        let mut table = playing();
        assert!(table.roll_with(1, roll(3, 4)).unwrap().round.is_none());
        assert!(table.roll_with(2, roll(1, 1)).unwrap().round.is_none());
        let summary = table.roll_with(3, roll(6, 6)).unwrap().round.unwrap();
        assert_eq!(summary.number, 1);
        assert_eq!(summary.tie, None);
        assert_eq!(summary.entries[&2].lives_remaining, 2);
        assert_eq!(summary.entries[&1].lives_remaining, 3);
        assert_eq!(table.player(2).unwrap().lives, 2);
    }

    #[test]
    fn first_seat_breaks_a_shared_low() {
        let mut table = playing();
        table.roll_with(1, roll(6, 6)).unwrap();
        table.roll_with(2, roll(1, 2)).unwrap();
        table.roll_with(3, roll(2, 1)).unwrap();
        assert_eq!(table.player(2).unwrap().lives, 2);
        assert_eq!(table.player(3).unwrap().lives, 3);
    }

    #[test]
    fn all_equal_totals_replay_the_round() {
        let mut table = playing();
        table.roll_with(1, roll(3, 4)).unwrap();
        table.roll_with(2, roll(2, 5)).unwrap();
        let summary = table.roll_with(3, roll(1, 6)).unwrap().round.unwrap();
        assert_eq!(summary.tie, Some(7));
        assert_eq!(summary.number, 0);
        assert!(table.players.iter().all(|p| p.lives == 3));
        // everyone may roll again
        assert!(table.roll_with(1, roll(1, 1)).is_ok());
    }

    #[test]
    fn rolls_are_validated() {
        let mut table = playing();
        table.roll_with(1, roll(1, 1)).unwrap();
        assert_eq!(table.roll_with(1, roll(1, 1)), Err(TableError::AlreadyRolled));
        assert_eq!(table.roll_with(9, roll(1, 1)), Err(TableError::NotSeated));

        let mut waiting = Table::new(Money::from_units(1), 3);
        waiting.seat(1, "ana").unwrap();
        assert_eq!(
            waiting.roll_with(1, roll(1, 1)),
            Err(TableError::NotPlaying(TableStatus::Waiting))
        );
    }

    #[test]
    fn last_survivor_wins() {
        let mut table = Table::new(Money::from_units(100), 1);
        for (id, name) in [(1, "ana"), (2, "bea"), (3, "cruz")] {
            table.seat(id, name).unwrap();
        }
        table.begin_spin(&mut StdRng::seed_from_u64(3), Utc::now()).unwrap();
        table.start_play();

        table.roll_with(1, roll(1, 1)).unwrap();
        table.roll_with(2, roll(5, 5)).unwrap();
        let first = table.roll_with(3, roll(6, 6)).unwrap().round.unwrap();
        assert_eq!(first.eliminated, Some(1));
        assert_eq!(first.winner, None);
        assert_eq!(table.roll_with(1, roll(6, 6)), Err(TableError::Eliminated));

        table.roll_with(2, roll(6, 5)).unwrap();
        let last = table.roll_with(3, roll(1, 2)).unwrap().round.unwrap();
        assert_eq!(last.eliminated, Some(3));
        assert_eq!(last.winner, Some(2));
        assert_eq!(table.status(), TableStatus::Finished);
        assert!(matches!(
            table.finished_event(),
            Some(ServerEvent::GameFinished { winner: Some(PlayerRef::Name(name)), .. })
                if name == "bea"
        ));
    }

    #[test]
    fn random_rolls_stay_on_the_die() {
        let mut table = playing();
        let mut rng = StdRng::seed_from_u64(11);
        let outcome = table.roll(1, &mut rng).unwrap();
        assert!((1..=6).contains(&outcome.roll.die1));
        assert!((1..=6).contains(&outcome.roll.die2));
    }
}
