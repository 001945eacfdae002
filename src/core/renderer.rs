/// Renderer seam: the session hands an owned `Scene` to whatever draws it
use std::time::Duration;

use crate::client::connection::LinkState;
use crate::core::gate::InputState;
use crate::core::protocol::{Money, Multiplier, PlayerId};
use crate::core::reducer::Notice;
use crate::core::session::GameSession;

/// Prize panel contents while the wheel spins and after it stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrizeView {
    pub multiplier: Multiplier,
    pub final_prize: Money,
    /// Zero once the result is revealed
    pub remaining: Duration,
}

impl PrizeView {
    pub fn revealed(&self) -> bool {
        self.remaining.is_zero()
    }
}

/// Everything a renderer needs for one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scene {
    pub local: PlayerId,
    pub session: GameSession,
    pub input: InputState,
    pub link: LinkState,
    pub prize: Option<PrizeView>,
    pub notice: Option<Notice>,
    /// Events still waiting behind the current dwell
    pub queued: usize,
}

/// Injected renderer - the session never draws on its own
pub trait TableRenderer: Send {
    fn render(&mut self, scene: &Scene) -> anyhow::Result<()>;
}

impl<R: TableRenderer + ?Sized> TableRenderer for Box<R> {
    fn render(&mut self, scene: &Scene) -> anyhow::Result<()> {
        (**self).render(scene)
    }
}
