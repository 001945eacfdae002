use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    prelude::*,
    widgets::{Block, Borders, Paragraph},
    DefaultTerminal,
};

use crate::client::connection::LinkState;
use crate::core::gate::InputState;
use crate::core::protocol::TableStatus;
use crate::core::renderer::{PrizeView, Scene, TableRenderer};
use crate::core::session::{Player, Seat};

/// Draws scenes to the real terminal
pub struct TerminalRenderer {
    terminal: DefaultTerminal,
}

impl TerminalRenderer {
    pub fn new(terminal: DefaultTerminal) -> Self {
        Self { terminal }
    }
}

impl TableRenderer for TerminalRenderer {
    fn render(&mut self, scene: &Scene) -> anyhow::Result<()> {
        self.terminal.draw(|frame| draw(frame, scene))?;
        Ok(())
    }
}

pub fn draw(frame: &mut Frame, scene: &Scene) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(7),    // Seats
            Constraint::Length(4), // Prize
            Constraint::Length(3), // Status
        ])
        .split(frame.area());

    let session = &scene.session;
    let round = match session.status {
        TableStatus::Playing => format!("round {}", session.round + 1),
        _ => format!("{} rounds played", session.round),
    };
    let header = Paragraph::new(format!(
        "🎲 ═══ DICE TABLE {} ═══ 🎲   {}   {}",
        session.room, round, session.status
    ))
    .block(Block::default().borders(Borders::ALL).title(link_label(scene.link)))
    .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
    .alignment(Alignment::Center);
    frame.render_widget(header, chunks[0]);

    let seats = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 3), Constraint::Ratio(1, 3), Constraint::Ratio(1, 3)])
        .split(chunks[1]);
    for (seat, area) in Seat::all().zip(seats.iter()) {
        draw_seat(frame, *area, seat, session.player_at(seat), scene.local);
    }

    let prize = Paragraph::new(prize_lines(scene.prize.as_ref(), session.status))
        .block(Block::default().borders(Borders::ALL).title("Prize"))
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center);
    frame.render_widget(prize, chunks[2]);

    let status = Paragraph::new(status_line(scene))
        .block(Block::default().borders(Borders::ALL).title("space roll · q quit"))
        .style(Style::default().fg(Color::White));
    frame.render_widget(status, chunks[3]);
}

fn draw_seat(frame: &mut Frame, area: Rect, seat: Seat, player: Option<&Player>, local: u64) {
    let Some(player) = player else {
        let empty = Paragraph::new("empty")
            .block(Block::default().borders(Borders::ALL).title(seat.to_string()))
            .style(Style::default().fg(Color::DarkGray))
            .alignment(Alignment::Center);
        frame.render_widget(empty, area);
        return;
    };

    let lives = if player.eliminated {
        "💀 out".to_string()
    } else {
        "❤".repeat(player.lives as usize)
    };
    let roll = match player.last_roll {
        Some(roll) => format!("⚀ {} + {} = {}", roll.die1, roll.die2, roll.total()),
        None => "-".to_string(),
    };
    let title = if player.id == local {
        format!("{seat} · you")
    } else {
        seat.to_string()
    };
    let style = if player.eliminated {
        Style::default().fg(Color::DarkGray)
    } else if player.id == local {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::White)
    };

    let body = Paragraph::new(vec![
        Line::from(player.name.clone()).bold(),
        Line::from(lives).red(),
        Line::from(roll),
    ])
    .block(Block::default().borders(Borders::ALL).title(title))
    .style(style)
    .alignment(Alignment::Center);
    frame.render_widget(body, area);
}

fn prize_lines(prize: Option<&PrizeView>, status: TableStatus) -> Vec<Line<'static>> {
    match prize {
        Some(view) if view.revealed() => vec![
            Line::from(format!("{} multiplier", view.multiplier)),
            Line::from(view.final_prize.to_string()).bold(),
        ],
        Some(view) => vec![
            Line::from("spinning the wheel..."),
            Line::from(format!("{:.1}s", view.remaining.as_secs_f32())),
        ],
        None if status == TableStatus::Waiting => vec![Line::from("waiting for three players")],
        None => vec![Line::from("-")],
    }
}

fn link_label(link: LinkState) -> String {
    match link {
        LinkState::Idle => "offline".to_string(),
        LinkState::Connecting => "connecting".to_string(),
        LinkState::Open => "● online".to_string(),
        LinkState::Reconnecting { attempt, .. } => format!("reconnecting (attempt {attempt})"),
        LinkState::Disconnected { code } => format!("disconnected ({code})"),
    }
}

fn status_line(scene: &Scene) -> String {
    if let Some(notice) = &scene.notice {
        return format!("📢 {notice}");
    }
    if let Some(outcome) = &scene.session.outcome {
        return match (&outcome.winner, outcome.prize) {
            (Some(winner), Some(prize)) => format!("🏁 {winner} wins {prize}"),
            (Some(winner), None) => format!("🏁 {winner} wins"),
            _ => "🏁 Game over".to_string(),
        };
    }
    match scene.input {
        InputState::Ready => "🎯 Your turn! Press space to roll".to_string(),
        InputState::Pending => "⏳ Rolling...".to_string(),
        InputState::Blocked(reason) => format!("⏳ {reason}"),
    }
}
