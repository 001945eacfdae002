use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::session::UiCommand;

const POLL: Duration = Duration::from_millis(100);

pub fn command_for(key: KeyEvent) -> Option<UiCommand> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char(' ') | KeyCode::Enter | KeyCode::Char('r') => Some(UiCommand::Roll),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(UiCommand::Quit)
        }
        KeyCode::Char('q') | KeyCode::Esc => Some(UiCommand::Quit),
        KeyCode::Char('x') | KeyCode::Backspace => Some(UiCommand::Dismiss),
        _ => None,
    }
}

/// Reads the keyboard on a blocking thread until `Quit` or until the session hangs up
pub fn spawn_keyboard(tx: mpsc::Sender<UiCommand>) -> JoinHandle<std::io::Result<()>> {
    tokio::task::spawn_blocking(move || {
        while !tx.is_closed() {
            if !event::poll(POLL)? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            if let Some(command) = command_for(key) {
                debug!(?command, "key");
                if tx.blocking_send(command).is_err() || command == UiCommand::Quit {
                    break;
                }
            }
        }
        Ok(())
    })
}
