//! Terminal front end for a table session
pub mod input;
pub mod renderer;

use anyhow::Result;
use tokio::sync::mpsc;

use crate::client::session::{SessionSummary, TableSession};
use crate::config::ClientConfig;

pub use renderer::TerminalRenderer;

/// Joins a table and plays it in the current terminal
pub async fn play(config: ClientConfig) -> Result<SessionSummary> {
    let terminal = ratatui::init();
    let (tx, rx) = mpsc::channel(16);
    let keyboard = input::spawn_keyboard(tx);

    let result = match TableSession::new(&config, TerminalRenderer::new(terminal)) {
        Ok(session) => session.run(rx).await,
        Err(e) => {
            drop(rx);
            Err(e.into())
        }
    };

    // the receiver is gone now, so the keyboard thread exits on its next poll
    let _ = keyboard.await;
    ratatui::restore();
    result
}
