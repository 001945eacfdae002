//! Local guard in front of `roll_dice`. Every refusal happens without a network call.
use thiserror::Error;

use crate::core::protocol::{PlayerId, TableStatus};
use crate::core::session::GameSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateRejection {
    #[error("not connected")]
    Disconnected,
    #[error("waiting for the last roll")]
    InFlight,
    #[error("you are out of lives")]
    Eliminated,
    #[error("you have no seat at this table")]
    NotSeated,
    #[error("the table is {0}")]
    NotPlaying(TableStatus),
    #[error("the game is over")]
    Finished,
}

/// What the status line shows about the local player's ability to roll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    Ready,
    Pending,
    Blocked(GateRejection),
}

#[derive(Debug, Default)]
pub struct InputGate {
    pending: bool,
    sealed: bool,
}

impl InputGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &self,
        session: &GameSession,
        local: PlayerId,
        connected: bool,
    ) -> Result<(), GateRejection> {
        if self.sealed || session.is_finished() {
            return Err(GateRejection::Finished);
        }
        if !connected {
            return Err(GateRejection::Disconnected);
        }
        if self.pending {
            return Err(GateRejection::InFlight);
        }
        let player = session.player(local).ok_or(GateRejection::NotSeated)?;
        if player.eliminated {
            return Err(GateRejection::Eliminated);
        }
        if session.status != TableStatus::Playing {
            return Err(GateRejection::NotPlaying(session.status));
        }
        Ok(())
    }

    pub fn state(&self, session: &GameSession, local: PlayerId, connected: bool) -> InputState {
        match self.check(session, local, connected) {
            Ok(()) => InputState::Ready,
            Err(GateRejection::InFlight) => InputState::Pending,
            Err(reason) => InputState::Blocked(reason),
        }
    }

    /// Marks a submission as in flight
    pub fn begin(&mut self) {
        if !self.sealed {
            self.pending = true;
        }
    }

    /// Returns whether a pending submission was actually cleared
    pub fn release(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    pub fn seal(&mut self) {
        self.sealed = true;
        self.pending = false;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{Player, RoomCode, Seat};

    fn table(status: TableStatus) -> GameSession {
        let mut session = GameSession::new(RoomCode::parse("G1").unwrap());
        session.seat_player(Player::new(1, "ana", Seat::new(1).unwrap()));
        session.status = status;
        session
    }

    #[test]
    fn ready_only_when_playing_seated_and_connected() {
        let gate = InputGate::new();
        assert_eq!(gate.check(&table(TableStatus::Playing), 1, true), Ok(()));
        assert_eq!(
            gate.check(&table(TableStatus::Playing), 1, false),
            Err(GateRejection::Disconnected)
        );
        assert_eq!(
            gate.check(&table(TableStatus::Spinning), 1, true),
            Err(GateRejection::NotPlaying(TableStatus::Spinning))
        );
        assert_eq!(
            gate.check(&table(TableStatus::Playing), 2, true),
            Err(GateRejection::NotSeated)
        );
    }

    #[test]
    fn eliminated_players_cannot_roll() {
        let mut session = table(TableStatus::Playing);
        session.player_mut(Seat::new(1).unwrap()).unwrap().eliminated = true;
        assert_eq!(InputGate::new().check(&session, 1, true), Err(GateRejection::Eliminated));
    }

    #[test]
    fn in_flight_blocks_until_released() {
        let session = table(TableStatus::Playing);
        let mut gate = InputGate::new();
        gate.begin();
        assert_eq!(gate.state(&session, 1, true), InputState::Pending);
        assert!(gate.release());
        assert!(!gate.release());
        assert_eq!(gate.state(&session, 1, true), InputState::Ready);
    }

    #[test]
    fn sealed_gate_never_reopens() {
        let session = table(TableStatus::Playing);
        let mut gate = InputGate::new();
        gate.begin();
        gate.seal();
        assert!(!gate.release());
        gate.begin();
        assert!(!gate.is_pending());
        assert_eq!(gate.check(&session, 1, true), Err(GateRejection::Finished));
    }
}
