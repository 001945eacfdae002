//! Ordering of server events for display.
//!
//! Visual events hold the queue for a dwell so each roll and round stays on
//! screen long enough to read. Control events never overtake them.
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::Timings;
use crate::core::protocol::ServerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Applied as soon as it arrives
    Immediate,
    /// Applied in arrival order, then holds the queue for `dwell`
    Ordered { dwell: Duration },
}

pub fn lane_for(event: &ServerEvent, timings: &Timings) -> Lane {
    match event {
        ServerEvent::GameState(_)
        | ServerEvent::PlayerJoined { .. }
        | ServerEvent::Error { .. } => Lane::Immediate,
        ServerEvent::DiceRolled { .. } => Lane::Ordered { dwell: timings.dice_dwell },
        ServerEvent::RoundResult(result) if result.is_tie => {
            Lane::Ordered { dwell: timings.tie_dwell }
        }
        ServerEvent::RoundResult(_) => Lane::Ordered { dwell: timings.round_dwell },
        ServerEvent::PrizeSpun { .. }
        | ServerEvent::GameStatusChanged { .. }
        | ServerEvent::GameFinished { .. } => Lane::Ordered { dwell: Duration::ZERO },
    }
}

#[derive(Debug, Default)]
pub struct DisplayQueue {
    waiting: VecDeque<ServerEvent>,
    holding: bool,
}

impl DisplayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes an ordered event. Hands it straight back when nothing is ahead of it.
    pub fn admit(&mut self, event: ServerEvent) -> Option<ServerEvent> {
        if self.holding || !self.waiting.is_empty() {
            self.waiting.push_back(event);
            None
        } else {
            Some(event)
        }
    }

    /// Blocks the queue until [`DisplayQueue::release`]
    pub fn hold(&mut self) {
        self.holding = true;
    }

    pub fn is_holding(&self) -> bool {
        self.holding
    }

    /// Ends the current dwell and returns the next event to apply, if any
    pub fn release(&mut self) -> Option<ServerEvent> {
        self.holding = false;
        self.waiting.pop_front()
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    pub fn clear(&mut self) {
        self.waiting.clear();
        self.holding = false;
    }
}
