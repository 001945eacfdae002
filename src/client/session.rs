//! Session driver: one task that owns the table state and everything hanging off it.
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::connection::{ConnectionManager, LinkEvent, LinkState, NORMAL};
use crate::client::endpoint::Endpoint;
use crate::config::{ClientConfig, LocalPlayer, Timings};
use crate::core::error::ClientError;
use crate::core::gate::{GateRejection, InputGate};
use crate::core::protocol::{decode, ClientAction, ServerEvent};
use crate::core::queue::{lane_for, DisplayQueue, Lane};
use crate::core::reducer::{reduce, Effect, Notice, ReduceContext, Transition};
use crate::core::renderer::{PrizeView, Scene, TableRenderer};
use crate::core::session::{GameSession, RoomCode};
use crate::core::timers::{TimerFired, TimerKind, TimerSet};

/// What the keyboard (or a test) asks of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiCommand {
    Roll,
    Dismiss,
    Quit,
}

/// Final state handed back when the session ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session: GameSession,
    pub link: LinkState,
}

struct PrizeDisplay {
    view: PrizeView,
    reveal_at: Instant,
}

pub struct TableSession<R: TableRenderer> {
    room: RoomCode,
    local: LocalPlayer,
    timings: Timings,
    renderer: R,
    connection: ConnectionManager,
    link_rx: mpsc::Receiver<LinkEvent>,
    timers: TimerSet,
    timer_rx: mpsc::UnboundedReceiver<TimerFired>,
    session: GameSession,
    gate: InputGate,
    queue: DisplayQueue,
    prize: Option<PrizeDisplay>,
    notice: Option<Notice>,
}

impl<R: TableRenderer> TableSession<R> {
    pub fn new(config: &ClientConfig, renderer: R) -> Result<Self, ClientError> {
        let endpoint = Endpoint::from_origin(&config.origin, &config.local)?;
        let (connection, link_rx) =
            ConnectionManager::new(endpoint, config.timings.reconnect_policy());
        let (timers, timer_rx) = TimerSet::new();

        Ok(Self {
            room: config.room.clone(),
            local: config.local.clone(),
            timings: config.timings,
            renderer,
            connection,
            link_rx,
            timers,
            timer_rx,
            session: GameSession::new(config.room.clone()),
            gate: InputGate::new(),
            queue: DisplayQueue::new(),
            prize: None,
            notice: None,
        })
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    /// Runs until `Quit` or until the command channel closes.
    /// Only a renderer failure ends the session early.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<UiCommand>,
    ) -> anyhow::Result<SessionSummary> {
        info!(room = %self.room, player = self.local.id, "joining table");
        self.connection.connect(&self.room);
        self.render()?;

        let mut frame = tokio::time::interval(self.timings.frame);
        frame.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let counting = self.prize.as_ref().is_some_and(|p| !p.view.revealed());

            tokio::select! {
                Some(event) = self.link_rx.recv() => self.on_link(event),
                Some(fired) = self.timer_rx.recv() => self.on_timer(fired),
                command = commands.recv() => match command {
                    Some(UiCommand::Roll) => self.submit_roll(),
                    Some(UiCommand::Dismiss) => self.notice = None,
                    Some(UiCommand::Quit) | None => break,
                },
                _ = frame.tick(), if counting => self.tick_prize(),
            }

            self.render()?;
        }

        Ok(self.teardown().await)
    }

    fn on_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::State(state) => match state {
                LinkState::Open => info!(room = %self.room, "connected"),
                LinkState::Reconnecting { attempt, code } => {
                    warn!(room = %self.room, attempt, code, "connection lost, retrying")
                }
                LinkState::Disconnected { code } => {
                    info!(room = %self.room, code, "disconnected");
                    if code == NORMAL {
                        self.wind_down();
                    }
                }
                LinkState::Idle | LinkState::Connecting => debug!(?state, "link state"),
            },
            LinkEvent::Frame(text) => match decode::<ServerEvent>(&text) {
                Ok(event) => self.route(event),
                Err(e) => warn!(error = %e, frame = %text, "dropping malformed frame"),
            },
        }
    }

    pub(crate) fn route(&mut self, event: ServerEvent) {
        match lane_for(&event, &self.timings) {
            Lane::Immediate => {
                self.apply(event);
            }
            Lane::Ordered { .. } => {
                if let Some(event) = self.queue.admit(event) {
                    self.present(event);
                }
            }
        }
    }

    /// Applies ordered events, holding the queue while a visual one dwells
    fn present(&mut self, first: ServerEvent) {
        let mut next = Some(first);
        while let Some(event) = next.take() {
            let dwell = match lane_for(&event, &self.timings) {
                Lane::Ordered { dwell } => dwell,
                Lane::Immediate => Default::default(),
            };
            if self.apply(event) && !dwell.is_zero() {
                self.queue.hold();
                self.timers.arm(TimerKind::DisplayDwell, dwell);
            } else {
                next = self.queue.release();
            }
        }
    }

    fn apply(&mut self, event: ServerEvent) -> bool {
        let ctx = ReduceContext {
            local: self.local.id,
            now: Utc::now(),
            prize_display: self.timings.prize_display,
        };

        match reduce(&self.session, &event, &ctx) {
            Ok(Transition { session, effects, skipped }) => {
                debug!(kind = event.kind(), "event applied");
                if let ServerEvent::Error { message } = &event {
                    warn!(error = %ClientError::Server(message.clone()), "server error");
                }
                for reason in skipped {
                    let error = ClientError::from(reason);
                    warn!(kind = event.kind(), %error, "part of event ignored");
                }
                self.session = session;
                for effect in effects {
                    self.perform(effect);
                }
                true
            }
            Err(reason) => {
                info!(kind = event.kind(), error = %ClientError::from(reason), "event ignored");
                false
            }
        }
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::ReleaseInput => {
                if self.gate.release() {
                    self.timers.cancel(TimerKind::InputFallback);
                }
            }
            Effect::SealInput => {
                self.gate.seal();
                self.timers.cancel(TimerKind::InputFallback);
            }
            Effect::PrizeCountdown { multiplier, final_prize, remaining } => {
                if remaining.is_zero() {
                    self.timers.cancel(TimerKind::PrizeReveal);
                } else {
                    self.timers.arm(TimerKind::PrizeReveal, remaining);
                }
                self.prize = Some(PrizeDisplay {
                    view: PrizeView { multiplier, final_prize, remaining },
                    reveal_at: Instant::now() + remaining,
                });
            }
            Effect::RollShown { seat, roll } => {
                debug!(%seat, die1 = roll.die1, die2 = roll.die2, "roll shown")
            }
            Effect::RoundResolved { tie, eliminated } => {
                info!(round = self.session.round, tie, ?eliminated, "round resolved")
            }
            Effect::Notice(notice) => self.notice = Some(notice),
        }
    }

    pub(crate) fn on_timer(&mut self, fired: TimerFired) {
        if !self.timers.accept(fired) {
            debug!(?fired, "stale timer");
            return;
        }
        match fired.kind {
            TimerKind::InputFallback => {
                if self.gate.release() {
                    warn!("no confirmation for roll, releasing input");
                }
            }
            TimerKind::DisplayDwell => {
                if let Some(next) = self.queue.release() {
                    self.present(next);
                }
            }
            TimerKind::PrizeReveal => {
                if let Some(prize) = &mut self.prize {
                    prize.view.remaining = Default::default();
                }
            }
        }
    }

    /// The server closed normally: show what is still queued and stop every timer
    fn wind_down(&mut self) {
        let mut flushed = 0;
        while let Some(event) = self.queue.release() {
            self.apply(event);
            flushed += 1;
        }
        if self.gate.release() {
            debug!("pending roll dropped with the link");
        }
        self.timers.cancel_all();
        if let Some(prize) = &mut self.prize {
            prize.view.remaining = Default::default();
        }
        info!(room = %self.room, flushed, "link closed by the server, timers stopped");
    }

    fn tick_prize(&mut self) {
        if let Some(prize) = &mut self.prize {
            prize.view.remaining = prize.reveal_at.saturating_duration_since(Instant::now());
        }
    }

    pub(crate) fn submit_roll(&mut self) {
        let connected = self.connection.is_live();
        if let Err(reason) = self.gate.check(&self.session, self.local.id, connected) {
            debug!(%reason, "roll refused locally");
            self.notice = Some(Notice::Rejected(reason));
            return;
        }
        match self.connection.send(ClientAction::RollDice) {
            Ok(()) => {
                self.gate.begin();
                self.timers.arm(TimerKind::InputFallback, self.timings.input_fallback);
                info!(round = self.session.round, "roll submitted");
            }
            Err(e) => {
                warn!(error = %e, "roll not sent");
                self.notice = Some(Notice::Rejected(GateRejection::Disconnected));
            }
        }
    }

    fn scene(&self) -> Scene {
        let connected = self.connection.is_live();
        Scene {
            local: self.local.id,
            session: self.session.clone(),
            input: self.gate.state(&self.session, self.local.id, connected),
            link: self.connection.state(),
            prize: self.prize.as_ref().map(|p| p.view.clone()),
            notice: self.notice.clone(),
            queued: self.queue.len(),
        }
    }

    fn render(&mut self) -> anyhow::Result<()> {
        let scene = self.scene();
        self.renderer.render(&scene)
    }

    async fn teardown(mut self) -> SessionSummary {
        self.timers.cancel_all();
        self.queue.clear();
        let summary =
            SessionSummary { session: self.session.clone(), link: self.connection.state() };
        info!(room = %self.room, status = %self.session.status, "leaving table");
        self.connection.shutdown().await;
        summary
    }
}
