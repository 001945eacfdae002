//! Pure state reducer: `(previous session, server event) -> next session + effects`.
//!
//! Nothing in here touches the terminal, the socket or a timer. The session
//! driver performs the returned [`Effect`]s.
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::gate::GateRejection;
use crate::core::protocol::{
    GameStatePayload, Money, Multiplier, PlayerId, PlayerRef, RoundResultPayload, ServerEvent,
    TableStatus,
};
use crate::core::session::{GameSession, Outcome, Player, Roll, Seat, MAX_SEATS};

/// Inputs the reducer needs besides the event itself
#[derive(Debug, Clone, Copy)]
pub struct ReduceContext {
    pub local: PlayerId,
    pub now: DateTime<Utc>,
    pub prize_display: Duration,
}

/// Why an event was dropped without touching the session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Ignored {
    #[error("the game is already finished")]
    Finished,
    #[error("{event} is not valid while the table is {status}")]
    WrongStatus { event: &'static str, status: TableStatus },
    #[error("unknown player (id {id:?}, name {name:?})")]
    UnknownPlayer { id: Option<PlayerId>, name: Option<String> },
    #[error("player {0} is eliminated")]
    Eliminated(PlayerId),
    #[error("snapshot lists {0} players")]
    TooManyPlayers(usize),
    #[error("seat {0} does not exist")]
    InvalidSeat(u8),
    #[error("{seat} is already held by player {holder}")]
    SeatTaken { seat: Seat, holder: PlayerId },
    #[error("{die1} and {die2} are not dice faces")]
    BadRoll { die1: u8, die2: u8 },
    #[error("player {id} reported {reported} lives but has {held}")]
    LivesIncrease { id: PlayerId, held: u8, reported: u8 },
}

/// Something the user should read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Server(String),
    Tie { total: Option<u8> },
    Eliminated { name: String },
    Winner { name: Option<String>, prize: Option<Money> },
    Rejected(GateRejection),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Server(message) if message.is_empty() => {
                f.write_str("The server reported an error")
            }
            Notice::Server(message) => f.write_str(message),
            Notice::Tie { total: Some(total) } => {
                write!(f, "Tie! Everybody rolled {total}. Nobody loses a life, roll again")
            }
            Notice::Tie { total: None } => f.write_str("Tie! Nobody loses a life, roll again"),
            Notice::Eliminated { name } => write!(f, "{name} is out of lives"),
            Notice::Winner { name, prize } => {
                match name {
                    Some(name) => write!(f, "{name} wins")?,
                    None => f.write_str("Game over")?,
                }
                if let Some(prize) = prize {
                    write!(f, " {prize}")?;
                }
                Ok(())
            }
            Notice::Rejected(reason) => write!(f, "Can't roll: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Clear a pending roll so the local player may act again
    ReleaseInput,
    /// Close the input gate for good
    SealInput,
    PrizeCountdown { multiplier: Multiplier, final_prize: Money, remaining: Duration },
    RollShown { seat: Seat, roll: Roll },
    RoundResolved { tie: bool, eliminated: Vec<Seat> },
    Notice(Notice),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub session: GameSession,
    pub effects: Vec<Effect>,
    /// Parts of the event that could not be applied (the rest was)
    pub skipped: Vec<Ignored>,
}

/// Time left on the prize display, anchored to the server's start timestamp.
/// Never negative and never longer than the display itself.
pub fn prize_remaining(
    started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    display: Duration,
) -> Duration {
    let Some(started_at) = started_at else {
        return display;
    };
    let elapsed = (now - started_at).to_std().unwrap_or(Duration::ZERO);
    display.saturating_sub(elapsed)
}

pub fn reduce(
    prev: &GameSession,
    event: &ServerEvent,
    ctx: &ReduceContext,
) -> Result<Transition, Ignored> {
    if prev.is_finished() && !matches!(event, ServerEvent::Error { .. }) {
        return Err(Ignored::Finished);
    }

    let mut next = prev.clone();
    let mut effects = Vec::new();
    let mut skipped = Vec::new();

    match event {
        ServerEvent::GameState(snapshot) => {
            apply_snapshot(&mut next, snapshot, ctx, &mut effects)?;
        }

        ServerEvent::PlayerJoined { player_id, username, avatar_url, seat_position } => {
            let seat = Seat::new(*seat_position).ok_or(Ignored::InvalidSeat(*seat_position))?;
            match next.player(*player_id).map(|p| p.seat) {
                // the first binding is kept; only the profile is refreshed
                Some(bound) => {
                    if let Some(player) = next.player_mut(bound) {
                        player.name.clone_from(username);
                        player.avatar_url.clone_from(avatar_url);
                    }
                }
                None => {
                    if let Some(holder) = next.player_at(seat) {
                        return Err(Ignored::SeatTaken { seat, holder: holder.id });
                    }
                    let mut player = Player::new(*player_id, username.clone(), seat);
                    player.avatar_url.clone_from(avatar_url);
                    next.seat_player(player);
                }
            }
        }

        ServerEvent::PrizeSpun { multiplier, final_prize, started_at } => {
            require(prev, TableStatus::Spinning, event)?;
            next.multiplier = Some(multiplier.clone());
            next.final_prize = Some(*final_prize);
            if started_at.is_some() {
                next.started_at = *started_at;
            }
            effects.push(Effect::PrizeCountdown {
                multiplier: multiplier.clone(),
                final_prize: *final_prize,
                remaining: prize_remaining(next.started_at, ctx.now, ctx.prize_display),
            });
        }

        ServerEvent::DiceRolled { user_id, username, die1, die2, .. } => {
            require(prev, TableStatus::Playing, event)?;
            let seat = next.resolve(Some(*user_id), Some(username)).ok_or_else(|| {
                Ignored::UnknownPlayer { id: Some(*user_id), name: Some(username.clone()) }
            })?;
            let roll =
                Roll::new(*die1, *die2).ok_or(Ignored::BadRoll { die1: *die1, die2: *die2 })?;
            let Some(player) = next.player_mut(seat) else {
                return Err(Ignored::UnknownPlayer { id: Some(*user_id), name: None });
            };
            if player.eliminated {
                return Err(Ignored::Eliminated(player.id));
            }
            player.last_roll = Some(roll);
            let local = player.id == ctx.local;
            effects.push(Effect::RollShown { seat, roll });
            if local {
                effects.push(Effect::ReleaseInput);
            }
        }

        ServerEvent::RoundResult(payload) => {
            require(prev, TableStatus::Playing, event)?;
            apply_round(&mut next, payload, &mut effects, &mut skipped);
        }

        ServerEvent::GameStatusChanged { status, multiplier, final_prize } => {
            next.status = *status;
            if multiplier.is_some() {
                next.multiplier.clone_from(multiplier);
            }
            if final_prize.is_some() {
                next.final_prize = *final_prize;
            }
            if *status == TableStatus::Finished {
                next.outcome.get_or_insert_with(Outcome::default);
                effects.push(Effect::SealInput);
            }
        }

        ServerEvent::GameFinished { winner, prize, multiplier } => {
            let name = winner.as_ref().map(|w| {
                next.resolve_ref(w)
                    .and_then(|seat| next.player_at(seat))
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| w.to_string())
            });
            let prize = prize.or(next.final_prize);
            if multiplier.is_some() {
                next.multiplier.clone_from(multiplier);
            }
            next.status = TableStatus::Finished;
            next.outcome = Some(Outcome { winner: name.clone(), prize });
            effects.push(Effect::SealInput);
            effects.push(Effect::Notice(Notice::Winner { name, prize }));
        }

        ServerEvent::Error { message } => {
            effects.push(Effect::ReleaseInput);
            effects.push(Effect::Notice(Notice::Server(message.clone())));
        }
    }

    Ok(Transition { session: next, effects, skipped })
}

fn require(session: &GameSession, status: TableStatus, event: &ServerEvent) -> Result<(), Ignored> {
    if session.status == status {
        Ok(())
    } else {
        Err(Ignored::WrongStatus { event: event.kind(), status: session.status })
    }
}

fn apply_snapshot(
    next: &mut GameSession,
    snapshot: &GameStatePayload,
    ctx: &ReduceContext,
    effects: &mut Vec<Effect>,
) -> Result<(), Ignored> {
    if snapshot.players.len() > MAX_SEATS as usize {
        return Err(Ignored::TooManyPlayers(snapshot.players.len()));
    }

    let mut players = Vec::with_capacity(snapshot.players.len());
    let mut taken = HashSet::new();
    for (index, p) in snapshot.players.iter().enumerate() {
        // the server lists players in seat order when it omits the position
        let number = p.seat_position.unwrap_or(index as u8 + 1);
        let seat = Seat::new(number).ok_or(Ignored::InvalidSeat(number))?;
        if !taken.insert(seat) {
            let holder = players.iter().find(|q: &&Player| q.seat == seat).map_or(0, |q| q.id);
            return Err(Ignored::SeatTaken { seat, holder });
        }
        let mut player = Player::new(p.user_id, p.username.clone(), seat);
        player.avatar_url.clone_from(&p.avatar_url);
        player.lives = p.lives;
        player.eliminated = p.is_eliminated || p.lives == 0;
        players.push(player);
    }

    next.replace_players(players);
    next.status = snapshot.status;
    next.multiplier.clone_from(&snapshot.multiplier);
    next.final_prize = snapshot.final_prize;
    next.started_at = snapshot.started_at;
    next.round = snapshot.round_number;

    match snapshot.status {
        TableStatus::Finished => {
            next.outcome.get_or_insert_with(Outcome::default);
            effects.push(Effect::SealInput);
        }
        TableStatus::Spinning => {
            effects.push(Effect::ReleaseInput);
            if let (Some(multiplier), Some(final_prize)) = (&next.multiplier, next.final_prize) {
                effects.push(Effect::PrizeCountdown {
                    multiplier: multiplier.clone(),
                    final_prize,
                    remaining: prize_remaining(next.started_at, ctx.now, ctx.prize_display),
                });
            }
        }
        TableStatus::Waiting | TableStatus::Playing => effects.push(Effect::ReleaseInput),
    }
    Ok(())
}

fn apply_round(
    next: &mut GameSession,
    payload: &RoundResultPayload,
    effects: &mut Vec<Effect>,
    skipped: &mut Vec<Ignored>,
) {
    let mut eliminated = Vec::new();

    for (id, entry) in &payload.results {
        let Some(seat) = next.resolve(Some(*id), None) else {
            skipped.push(Ignored::UnknownPlayer { id: Some(*id), name: None });
            continue;
        };
        let Some(player) = next.player_mut(seat) else { continue };
        if player.eliminated {
            skipped.push(Ignored::Eliminated(player.id));
            continue;
        }
        let Some(roll) = Roll::new(entry.die1, entry.die2) else {
            skipped.push(Ignored::BadRoll { die1: entry.die1, die2: entry.die2 });
            continue;
        };
        player.last_roll = Some(roll);
        if payload.is_tie {
            continue;
        }
        if entry.lives_remaining > player.lives {
            skipped.push(Ignored::LivesIncrease {
                id: player.id,
                held: player.lives,
                reported: entry.lives_remaining,
            });
            continue;
        }
        player.lives = entry.lives_remaining;
        if player.lives == 0 {
            player.eliminated = true;
            eliminated.push(seat);
        }
    }

    if let Some(reference) = payload.eliminated.as_ref().filter(|_| !payload.is_tie) {
        match next.resolve_ref(reference) {
            Some(seat) => {
                if let Some(player) = next.player_mut(seat) {
                    if !player.eliminated {
                        player.eliminated = true;
                        player.lives = 0;
                        eliminated.push(seat);
                    }
                }
            }
            None => skipped.push(Ignored::UnknownPlayer {
                id: match reference {
                    PlayerRef::Id(id) => Some(*id),
                    PlayerRef::Name(_) => None,
                },
                name: Some(reference.to_string()),
            }),
        }
    }

    next.round = match payload.round_number {
        Some(round) => round,
        None if payload.is_tie => next.round,
        None => next.round.saturating_add(1),
    };

    effects.push(Effect::RoundResolved { tie: payload.is_tie, eliminated: eliminated.clone() });
    effects.push(Effect::ReleaseInput);
    if payload.is_tie {
        effects.push(Effect::Notice(Notice::Tie { total: payload.tie_total }));
    }
    for seat in eliminated {
        if let Some(player) = next.player_at(seat) {
            effects.push(Effect::Notice(Notice::Eliminated { name: player.name.clone() }));
        }
    }
}
